//! Deadlock detection.
//!
//! The dispatcher imposes no ordering, so a configuration whose components
//! wait on each other's data blocks forever. The watchdog notices this:
//!
//! ```text
//!   every live runner blocked in acquire()  ─┐
//!   on a capability hosted in this process   ├─► stalled for `timeout` ─► deadlock
//!   registry epoch unchanged                ─┘
//! ```
//!
//! A runner that is computing (not blocked) or any readiness transition
//! anywhere resets the clock. Waits on capabilities hosted by another
//! process never count here; in a distributed run the coordinator times
//! those stalls from every process's [`blocked_runners`] reports.

use crate::lifecycle::RunnerTable;
use crate::registry::CapabilityRegistry;
use coupler_types::ComponentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// One edge of a deadlock: a component waiting for a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedOn {
    pub component: ComponentId,
    pub capability: String,
}

impl fmt::Display for BlockedOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} waits for '{}'", self.component, self.capability)
    }
}

/// What every live runner waits for.
///
/// `None` if any live runner is computing, or if none is live.
#[must_use]
pub fn blocked_runners(table: &RunnerTable) -> Option<Vec<BlockedOn>> {
    let blocked: Option<Vec<BlockedOn>> = table
        .live()
        .into_iter()
        .map(|(component, status)| {
            status.blocked_on.map(|capability| BlockedOn {
                component,
                capability,
            })
        })
        .collect();
    blocked.filter(|blocked| !blocked.is_empty())
}

/// Stall detector polled by the dispatcher.
#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    last_epoch: Option<u64>,
    stalled_since: Option<Instant>,
}

impl Watchdog {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_epoch: None,
            stalled_since: None,
        }
    }

    /// Returns the blocked set once a stall has lasted `timeout`.
    pub fn observe(
        &mut self,
        table: &RunnerTable,
        registry: &CapabilityRegistry,
    ) -> Option<Vec<BlockedOn>> {
        self.observe_at(Instant::now(), table, registry)
    }

    fn observe_at(
        &mut self,
        now: Instant,
        table: &RunnerTable,
        registry: &CapabilityRegistry,
    ) -> Option<Vec<BlockedOn>> {
        let blocked = match blocked_runners(table) {
            Some(blocked) if blocked.iter().all(|b| registry.is_local(&b.capability)) => blocked,
            _ => {
                self.reset();
                return None;
            }
        };

        let epoch = registry.epoch();
        if self.last_epoch != Some(epoch) {
            self.last_epoch = Some(epoch);
            self.stalled_since = Some(now);
            return None;
        }

        let since = *self.stalled_since.get_or_insert(now);
        (now.duration_since(since) >= self.timeout).then_some(blocked)
    }

    fn reset(&mut self) {
        self.last_epoch = None;
        self.stalled_since = None;
    }
}
