//! Shared view of every runner's state.

use super::ComponentState;
use coupler_types::ComponentId;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::time::Duration;

/// What the dispatcher can observe about one runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerStatus {
    pub state: ComponentState,
    /// Capability the runner is currently waiting for inside `acquire`.
    pub blocked_on: Option<String>,
}

/// Runner states, written by runners and watched by the dispatcher.
#[derive(Default)]
pub struct RunnerTable {
    runners: Mutex<BTreeMap<ComponentId, RunnerStatus>>,
    changed: Condvar,
}

impl RunnerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &ComponentId, state: ComponentState) {
        self.runners.lock().insert(
            id.clone(),
            RunnerStatus {
                state,
                blocked_on: None,
            },
        );
        self.changed.notify_all();
    }

    pub fn set_state(&self, id: &ComponentId, state: ComponentState) {
        if let Some(status) = self.runners.lock().get_mut(id) {
            status.state = state;
            if state.is_terminal() {
                status.blocked_on = None;
            }
        }
        self.changed.notify_all();
    }

    pub fn set_blocked(&self, id: &ComponentId, capability: Option<&str>) {
        if let Some(status) = self.runners.lock().get_mut(id) {
            status.blocked_on = capability.map(str::to_string);
        }
    }

    #[must_use]
    pub fn status(&self, id: &ComponentId) -> Option<RunnerStatus> {
        self.runners.lock().get(id).cloned()
    }

    /// Every runner that has not reached a terminal state.
    #[must_use]
    pub fn live(&self) -> Vec<(ComponentId, RunnerStatus)> {
        self.runners
            .lock()
            .iter()
            .filter(|(_, s)| !s.state.is_terminal())
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect()
    }

    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.runners.lock().values().all(|s| s.state.is_terminal())
    }

    /// Waits until a state changes or `timeout` elapses.
    ///
    /// Returns immediately when every runner is already terminal.
    pub fn wait(&self, timeout: Duration) {
        let mut runners = self.runners.lock();
        if runners.values().all(|s| s.state.is_terminal()) {
            return;
        }
        self.changed.wait_for(&mut runners, timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn id(s: &str) -> ComponentId {
        ComponentId::from_section(s)
    }

    #[test]
    fn live_excludes_terminal() {
        let table = RunnerTable::new();
        table.insert(&id("A"), ComponentState::Running);
        table.insert(&id("B"), ComponentState::Running);
        table.set_state(&id("B"), ComponentState::Succeeded);

        let live: Vec<ComponentId> = table.live().into_iter().map(|(id, _)| id).collect();
        assert_eq!(live, vec![id("A")]);
        assert!(!table.all_terminal());
    }

    #[test]
    fn blocked_marker_cleared_on_terminal() {
        let table = RunnerTable::new();
        table.insert(&id("A"), ComponentState::Running);
        table.set_blocked(&id("A"), Some("raw"));
        assert_eq!(
            table.status(&id("A")).expect("known").blocked_on.as_deref(),
            Some("raw")
        );
        table.set_state(&id("A"), ComponentState::Failed);
        assert_eq!(table.status(&id("A")).expect("known").blocked_on, None);
    }

    #[test]
    fn wait_wakes_on_state_change() {
        let table = Arc::new(RunnerTable::new());
        table.insert(&id("A"), ComponentState::Running);

        let finisher = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                table.set_state(&id("A"), ComponentState::Succeeded);
            })
        };

        let start = Instant::now();
        while !table.all_terminal() {
            table.wait(Duration::from_secs(5));
        }
        assert!(start.elapsed() < Duration::from_secs(5));
        finisher.join().expect("no panic");
    }

    #[test]
    fn empty_table_is_terminal() {
        let table = RunnerTable::new();
        assert!(table.all_terminal());
        table.wait(Duration::from_secs(10));
    }
}
