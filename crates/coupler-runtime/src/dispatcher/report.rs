//! Run report.

use super::BlockedOn;
use crate::error::DispatchError;
use crate::lifecycle::RunResult;
use coupler_types::ComponentId;
use serde::{Deserialize, Serialize};

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// One result per component.
    pub results: Vec<RunResult>,
    /// Wait edges at the time a deadlock was declared; empty otherwise.
    pub deadlock: Vec<BlockedOn>,
}

impl RunReport {
    /// `true` iff every component succeeded and no deadlock was detected.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.deadlock.is_empty() && self.results.iter().all(RunResult::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    #[must_use]
    pub fn result(&self, component: &ComponentId) -> Option<&RunResult> {
        self.results.iter().find(|r| &r.component == component)
    }

    /// Components that reused cached output.
    pub fn skipped(&self) -> impl Iterator<Item = &ComponentId> {
        self.results
            .iter()
            .filter(|r| r.skipped)
            .map(|r| &r.component)
    }

    /// One line per failed component naming its root cause.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        self.failures()
            .map(|r| match &r.cause {
                Some(cause) => format!("{}: {cause}", r.component),
                None => format!("{}: {}", r.component, r.state),
            })
            .collect()
    }

    /// Combines the reports of several processes.
    #[must_use]
    pub fn merge(reports: impl IntoIterator<Item = RunReport>) -> Self {
        reports
            .into_iter()
            .fold(Self::default(), |mut merged, report| {
                merged.results.extend(report.results);
                merged.deadlock.extend(report.deadlock);
                merged
            })
    }

    /// Converts an unsuccessful report into the matching error.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Deadlock`] takes precedence over
    /// [`DispatchError::ComponentsFailed`].
    pub fn into_result(self) -> Result<Self, DispatchError> {
        if !self.deadlock.is_empty() {
            return Err(DispatchError::Deadlock {
                blocked: self.deadlock,
            });
        }
        let summary = self.summary_lines();
        if summary.is_empty() {
            Ok(self)
        } else {
            Err(DispatchError::ComponentsFailed {
                failed: summary.len(),
                total: self.results.len(),
                summary,
            })
        }
    }
}
