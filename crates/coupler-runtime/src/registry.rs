//! Capability registry.
//!
//! The registry is the only shared mutable state of a run. It maps every
//! capability name to its producer, its readiness and, once published, its
//! payload.
//!
//! # Readiness
//!
//! ```text
//!            publish(payload, fresh)
//!   Pending ─────────────────────────► Ready
//!      │
//!      └───────────────────────────────► Failed(cause)
//!            mark_failed / fail_pending_of
//! ```
//!
//! Transitions are one-shot. Every transition bumps [`epoch`], which the
//! dispatcher's watchdog uses as its measure of forward progress.
//!
//! # Locking
//!
//! One mutex guards the table; every entry has its own condition variable,
//! so publishing one name wakes only the waiters of that name. `acquire` is
//! the only operation that blocks.
//!
//! # Distributed Mode
//!
//! Each process holds a shard with the entries of its own components plus a
//! directory of names hosted elsewhere. The first `acquire` of a remote
//! name creates a local *mirror* entry and hands one request to the
//! installed [`RemoteResolver`]; the reply settles the mirror, and every
//! later acquirer waits on (or reads) the same mirror.
//!
//! [`epoch`]: CapabilityRegistry::epoch

use coupler_component::{CapabilityError, DeclarationSink, FailureCause, Payload, Resolved};
use coupler_types::{ComponentId, Rank};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Readiness of one capability.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    Pending,
    Ready(Resolved),
    Failed(FailureCause),
}

impl Readiness {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Where the authoritative copy of a capability lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    /// Produced by a component of this process.
    Local,
    /// Mirror of a capability produced on another process.
    Remote(Rank),
}

/// Sends resolution requests for remotely hosted capabilities.
///
/// Implemented by the distributed transport.
pub trait RemoteResolver: Send + Sync {
    /// Queues one request for `name` to `host`.
    ///
    /// Must not block. The answer arrives later through
    /// [`CapabilityRegistry::settle_remote`].
    fn request(&self, name: &str, host: Rank);
}

struct Entry {
    producer: ComponentId,
    host: Host,
    readiness: Readiness,
    waiters: Arc<Condvar>,
}

impl Entry {
    fn new(producer: ComponentId, host: Host) -> Self {
        Self {
            producer,
            host,
            readiness: Readiness::Pending,
            waiters: Arc::new(Condvar::new()),
        }
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    remote: HashMap<String, (Rank, ComponentId)>,
    sealed: bool,
    epoch: u64,
}

impl State {
    fn owner_of(&self, name: &str) -> Option<&ComponentId> {
        self.entries
            .get(name)
            .map(|e| &e.producer)
            .or_else(|| self.remote.get(name).map(|(_, c)| c))
    }

    /// Applies a one-shot transition and wakes the entry's waiters.
    fn settle(&mut self, name: &str, readiness: Readiness) -> Result<(), CapabilityError> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| CapabilityError::NotFound {
                name: name.to_string(),
            })?;
        match &entry.readiness {
            Readiness::Pending => {}
            Readiness::Ready(_) => {
                return Err(CapabilityError::AlreadyPublished {
                    name: name.to_string(),
                })
            }
            Readiness::Failed(cause) => {
                return Err(CapabilityError::Failed {
                    name: name.to_string(),
                    cause: cause.clone(),
                })
            }
        }
        entry.readiness = readiness;
        entry.waiters.notify_all();
        self.epoch += 1;
        Ok(())
    }
}

/// Concurrency-safe store of every capability in this process.
///
/// # Example
///
/// ```
/// use coupler_component::Payload;
/// use coupler_runtime::CapabilityRegistry;
/// use coupler_types::ComponentId;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let registry = Arc::new(CapabilityRegistry::new());
/// registry.register("raw", &ComponentId::from_section("Source")).unwrap();
///
/// let consumer = {
///     let registry = Arc::clone(&registry);
///     std::thread::spawn(move || registry.acquire("raw"))
/// };
/// registry.publish("raw", Payload::new(json!([1, 2, 3])), true).unwrap();
///
/// let payload = consumer.join().unwrap().unwrap();
/// assert_eq!(payload.value(), &json!([1, 2, 3]));
/// ```
pub struct CapabilityRegistry {
    state: Mutex<State>,
    /// Signalled when a name is declared or the registry is sealed.
    declared: Condvar,
    resolver: Mutex<Option<Arc<dyn RemoteResolver>>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            declared: Condvar::new(),
            resolver: Mutex::new(None),
        }
    }

    /// Declares `name` as produced by `producer`.
    ///
    /// # Errors
    ///
    /// [`CapabilityError::Duplicate`] if the name is already declared here or
    /// hosted by another process.
    pub fn register(&self, name: &str, producer: &ComponentId) -> Result<(), CapabilityError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.owner_of(name) {
            return Err(CapabilityError::Duplicate {
                name: name.to_string(),
                existing: existing.to_string(),
                requested: producer.to_string(),
            });
        }
        state
            .entries
            .insert(name.to_string(), Entry::new(producer.clone(), Host::Local));
        drop(state);

        debug!(capability = %name, producer = %producer, "Capability declared");
        self.declared.notify_all();
        Ok(())
    }

    /// Waits for `name` and returns its payload.
    ///
    /// # Errors
    ///
    /// See [`acquire_resolved`](Self::acquire_resolved).
    pub fn acquire(&self, name: &str) -> Result<Payload, CapabilityError> {
        self.acquire_resolved(name).map(|r| r.payload)
    }

    /// Waits for `name` and returns its payload and freshness.
    ///
    /// Every caller of a ready capability receives a clone of the same
    /// payload handle.
    ///
    /// # Errors
    ///
    /// - [`CapabilityError::NotFound`] immediately when nobody declares `name`
    /// - [`CapabilityError::Failed`] when the producer terminated without
    ///   publishing, or the remote host could not be reached
    pub fn acquire_resolved(&self, name: &str) -> Result<Resolved, CapabilityError> {
        let mut state = self.state.lock();

        if !state.entries.contains_key(name) {
            let Some((host, producer)) = state.remote.get(name).cloned() else {
                return Err(CapabilityError::NotFound {
                    name: name.to_string(),
                });
            };
            state
                .entries
                .insert(name.to_string(), Entry::new(producer, Host::Remote(host)));
            drop(state);

            debug!(capability = %name, host = %host, "Requesting remote capability");
            self.request_remote(name, host);
            state = self.state.lock();
        }

        Self::wait_settled(&mut state, name)
    }

    /// Like [`acquire_resolved`](Self::acquire_resolved), for serving other
    /// processes: a name not declared yet is waited for until the registry
    /// is sealed, then reported as not found.
    ///
    /// Mirrors of remote names are never served.
    pub fn hosted_acquire(&self, name: &str) -> Result<Resolved, CapabilityError> {
        let mut state = self.state.lock();
        loop {
            if matches!(state.entries.get(name), Some(e) if e.host == Host::Local) {
                break;
            }
            if state.sealed {
                return Err(CapabilityError::NotFound {
                    name: name.to_string(),
                });
            }
            self.declared.wait(&mut state);
        }
        Self::wait_settled(&mut state, name)
    }

    fn wait_settled(
        state: &mut MutexGuard<'_, State>,
        name: &str,
    ) -> Result<Resolved, CapabilityError> {
        loop {
            let Some(entry) = state.entries.get(name) else {
                return Err(CapabilityError::NotFound {
                    name: name.to_string(),
                });
            };
            match &entry.readiness {
                Readiness::Ready(resolved) => return Ok(resolved.clone()),
                Readiness::Failed(cause) => {
                    return Err(CapabilityError::Failed {
                        name: name.to_string(),
                        cause: cause.clone(),
                    })
                }
                Readiness::Pending => {
                    let waiters = Arc::clone(&entry.waiters);
                    waiters.wait(state);
                }
            }
        }
    }

    fn request_remote(&self, name: &str, host: Rank) {
        let resolver = self.resolver.lock().clone();
        match resolver {
            Some(resolver) => resolver.request(name, host),
            None => {
                self.mark_failed(
                    name,
                    FailureCause::new("transport", format!("no transport to reach {host}")),
                );
            }
        }
    }

    /// Attaches the payload of `name`: pending to ready, waking every waiter.
    ///
    /// # Errors
    ///
    /// - [`CapabilityError::NotFound`] for an undeclared name
    /// - [`CapabilityError::AlreadyPublished`] on a second publish
    /// - [`CapabilityError::Failed`] if the capability was already failed
    pub fn publish(&self, name: &str, payload: Payload, fresh: bool) -> Result<(), CapabilityError> {
        self.state
            .lock()
            .settle(name, Readiness::Ready(Resolved { payload, fresh }))?;
        debug!(capability = %name, fresh, "Capability published");
        Ok(())
    }

    /// Fails a pending capability, waking every waiter with `cause`.
    ///
    /// Returns `false` if the capability is unknown or already settled.
    pub fn mark_failed(&self, name: &str, cause: FailureCause) -> bool {
        let settled = self
            .state
            .lock()
            .settle(name, Readiness::Failed(cause.clone()))
            .is_ok();
        if settled {
            warn!(capability = %name, cause = %cause, "Capability failed");
        }
        settled
    }

    /// Fails every pending, locally hosted capability of `producers`.
    ///
    /// Returns the failed names.
    pub fn fail_pending_of(&self, producers: &[ComponentId], cause: &FailureCause) -> Vec<String> {
        let mut state = self.state.lock();
        let names: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| {
                e.host == Host::Local
                    && e.readiness.is_pending()
                    && producers.contains(&e.producer)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            // Pending was checked under the same lock.
            let _ = state.settle(name, Readiness::Failed(cause.clone()));
            warn!(capability = %name, cause = %cause, "Capability failed");
        }
        names
    }

    /// Marks the end of declaration.
    ///
    /// After sealing, [`hosted_acquire`](Self::hosted_acquire) of an unknown
    /// name fails instead of waiting.
    pub fn seal(&self) {
        self.state.lock().sealed = true;
        self.declared.notify_all();
        debug!("Registry sealed");
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Number of readiness transitions so far.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Current readiness of `name`, if declared or mirrored here.
    #[must_use]
    pub fn readiness(&self, name: &str) -> Option<Readiness> {
        self.state.lock().entries.get(name).map(|e| e.readiness.clone())
    }

    /// Producer of `name`, local or remote.
    #[must_use]
    pub fn producer(&self, name: &str) -> Option<ComponentId> {
        self.state.lock().owner_of(name).cloned()
    }

    /// Returns `true` if `name` is produced by a component of this process.
    #[must_use]
    pub fn is_local(&self, name: &str) -> bool {
        matches!(self.state.lock().entries.get(name), Some(e) if e.host == Host::Local)
    }

    /// Every locally hosted capability and its producer, sorted by name.
    #[must_use]
    pub fn local_capabilities(&self) -> Vec<(String, ComponentId)> {
        let state = self.state.lock();
        let mut names: Vec<(String, ComponentId)> = state
            .entries
            .iter()
            .filter(|(_, e)| e.host == Host::Local)
            .map(|(name, e)| (name.clone(), e.producer.clone()))
            .collect();
        names.sort();
        names
    }

    /// Records capabilities hosted on other processes.
    ///
    /// Names this process hosts itself are skipped.
    pub fn install_directory<I>(&self, owners: I)
    where
        I: IntoIterator<Item = (String, Rank, ComponentId)>,
    {
        let mut state = self.state.lock();
        for (name, rank, producer) in owners {
            if state.entries.contains_key(&name) {
                continue;
            }
            state.remote.insert(name, (rank, producer));
        }
        debug!(remote = state.remote.len(), "Remote directory installed");
    }

    /// Installs the transport used for remote names.
    pub fn set_resolver(&self, resolver: Arc<dyn RemoteResolver>) {
        *self.resolver.lock() = Some(resolver);
    }

    /// Settles a mirror with the reply from its host.
    pub fn settle_remote(&self, name: &str, outcome: Result<Resolved, FailureCause>) {
        let readiness = match outcome {
            Ok(resolved) => Readiness::Ready(resolved),
            Err(cause) => Readiness::Failed(cause),
        };
        let mut state = self.state.lock();
        if !matches!(state.entries.get(name), Some(e) if matches!(e.host, Host::Remote(_))) {
            warn!(capability = %name, "Reply for a capability that is not mirrored");
            return;
        }
        if let Err(e) = state.settle(name, readiness) {
            warn!(capability = %name, error = %e, "Duplicate reply ignored");
        }
    }

    /// Fails every pending mirror hosted on `host`.
    ///
    /// Returns the failed names.
    pub fn fail_remote_from(&self, host: Rank, cause: &FailureCause) -> Vec<String> {
        let mut state = self.state.lock();
        let names: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.host == Host::Remote(host) && e.readiness.is_pending())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            let _ = state.settle(name, Readiness::Failed(cause.clone()));
            warn!(capability = %name, host = %host, cause = %cause, "Remote capability failed");
        }
        names
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeclarationSink for CapabilityRegistry {
    fn register(&self, name: &str, producer: &ComponentId) -> Result<(), CapabilityError> {
        CapabilityRegistry::register(self, name, producer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn id(s: &str) -> ComponentId {
        ComponentId::from_section(s)
    }

    fn declared(names: &[(&str, &str)]) -> Arc<CapabilityRegistry> {
        let registry = Arc::new(CapabilityRegistry::new());
        for (name, producer) in names {
            registry.register(name, &id(producer)).expect("unique");
        }
        registry
    }

    #[test]
    fn duplicate_declaration_rejected() {
        let registry = declared(&[("raw", "Source")]);
        let err = registry
            .register("raw", &id("Other"))
            .expect_err("duplicate");
        assert_eq!(
            err,
            CapabilityError::Duplicate {
                name: "raw".into(),
                existing: "Source".into(),
                requested: "Other".into(),
            }
        );
    }

    #[test]
    fn undeclared_acquire_fails_immediately() {
        let registry = CapabilityRegistry::new();
        let start = Instant::now();
        let err = registry.acquire("nothing").expect_err("undeclared");
        assert!(err.is_not_found());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn second_publish_rejected() {
        let registry = declared(&[("raw", "Source")]);
        registry
            .publish("raw", Payload::new(json!(1)), true)
            .expect("first publish");
        let err = registry
            .publish("raw", Payload::new(json!(2)), true)
            .expect_err("second publish");
        assert!(matches!(err, CapabilityError::AlreadyPublished { .. }));
        assert_eq!(registry.acquire("raw").expect("ready").value(), &json!(1));
    }

    #[test]
    fn publish_after_failure_reports_cause() {
        let registry = declared(&[("raw", "Source")]);
        assert!(registry.mark_failed("raw", FailureCause::new("Source", "crashed")));
        let err = registry
            .publish("raw", Payload::new(json!(1)), true)
            .expect_err("already failed");
        assert!(matches!(err, CapabilityError::Failed { .. }));
        assert!(!registry.mark_failed("raw", FailureCause::new("Source", "again")));
    }

    #[test]
    fn acquire_blocks_until_publish() {
        let registry = declared(&[("raw", "Source")]);
        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.acquire_resolved("raw"))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        registry
            .publish("raw", Payload::new(json!("grid")), false)
            .expect("publish");
        let resolved = waiter.join().expect("no panic").expect("ready");
        assert_eq!(resolved.payload.value(), &json!("grid"));
        assert!(!resolved.fresh);
    }

    #[test]
    fn concurrent_waiters_share_payload() {
        let registry = declared(&[("raw", "Source")]);
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.acquire("raw"))
            })
            .collect();

        let published = Payload::new(json!({"cells": 4096}));
        registry
            .publish("raw", published.clone(), true)
            .expect("publish");

        for waiter in waiters {
            let got = waiter.join().expect("no panic").expect("ready");
            assert!(got.ptr_eq(&published));
        }
    }

    #[test]
    fn failure_reaches_past_and_future_waiters() {
        let registry = declared(&[("raw", "Source")]);
        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.acquire("raw"))
        };
        thread::sleep(Duration::from_millis(20));

        let cause = FailureCause::new("Source", "input missing");
        registry.mark_failed("raw", cause.clone());

        let past = waiter.join().expect("no panic").expect_err("failed");
        let future = registry.acquire("raw").expect_err("failed");
        for err in [past, future] {
            assert_eq!(
                err,
                CapabilityError::Failed {
                    name: "raw".into(),
                    cause: cause.clone(),
                }
            );
        }
    }

    #[test]
    fn epoch_counts_transitions() {
        let registry = declared(&[("a", "A"), ("b", "B")]);
        assert_eq!(registry.epoch(), 0);
        registry
            .publish("a", Payload::new(json!(null)), true)
            .expect("publish");
        registry.mark_failed("b", FailureCause::new("B", "x"));
        registry.mark_failed("b", FailureCause::new("B", "y"));
        assert_eq!(registry.epoch(), 2);
    }

    #[test]
    fn fail_pending_of_only_touches_given_producers() {
        let registry = declared(&[("a", "A"), ("b", "B"), ("c", "A")]);
        registry
            .publish("c", Payload::new(json!(0)), true)
            .expect("publish");

        let failed = registry.fail_pending_of(&[id("A")], &FailureCause::new("dispatcher", "stuck"));
        assert_eq!(failed, vec!["a"]);
        assert!(registry.readiness("b").expect("declared").is_pending());
        assert!(matches!(registry.readiness("c"), Some(Readiness::Ready(_))));
    }

    #[test]
    fn hosted_acquire_waits_for_declaration() {
        let registry = Arc::new(CapabilityRegistry::new());
        let server = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.hosted_acquire("late"))
        };
        thread::sleep(Duration::from_millis(30));
        registry.register("late", &id("Late")).expect("declare");
        registry
            .publish("late", Payload::new(json!(7)), true)
            .expect("publish");
        let resolved = server.join().expect("no panic").expect("ready");
        assert_eq!(resolved.payload.value(), &json!(7));
    }

    #[test]
    fn hosted_acquire_after_seal_is_not_found() {
        let registry = Arc::new(CapabilityRegistry::new());
        let server = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.hosted_acquire("never"))
        };
        thread::sleep(Duration::from_millis(30));
        registry.seal();
        let err = server.join().expect("no panic").expect_err("sealed");
        assert!(err.is_not_found());
    }

    struct CountingResolver {
        requests: AtomicUsize,
    }

    impl RemoteResolver for CountingResolver {
        fn request(&self, _name: &str, _host: Rank) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn remote_acquire_sends_one_request() {
        let registry = Arc::new(CapabilityRegistry::new());
        let resolver = Arc::new(CountingResolver {
            requests: AtomicUsize::new(0),
        });
        registry.set_resolver(resolver.clone());
        registry.install_directory([("raw".to_string(), Rank(1), id("Source"))]);
        assert!(!registry.is_local("raw"));
        assert_eq!(registry.producer("raw"), Some(id("Source")));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.acquire("raw"))
            })
            .collect();
        thread::sleep(Duration::from_millis(50));

        registry.settle_remote(
            "raw",
            Ok(Resolved {
                payload: Payload::new(json!([1.5])),
                fresh: true,
            }),
        );
        for waiter in waiters {
            assert_eq!(
                waiter.join().expect("no panic").expect("ready").value(),
                &json!([1.5])
            );
        }
        assert_eq!(resolver.requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remote_name_cannot_be_redeclared() {
        let registry = CapabilityRegistry::new();
        registry.install_directory([("raw".to_string(), Rank(1), id("Source"))]);
        assert!(matches!(
            registry.register("raw", &id("Impostor")),
            Err(CapabilityError::Duplicate { .. })
        ));
    }

    #[test]
    fn remote_without_transport_fails() {
        let registry = CapabilityRegistry::new();
        registry.install_directory([("raw".to_string(), Rank(1), id("Source"))]);
        let err = registry.acquire("raw").expect_err("no transport");
        assert!(matches!(err, CapabilityError::Failed { ref cause, .. } if cause.origin == "transport"));
    }

    #[test]
    fn lost_host_fails_pending_mirrors() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.set_resolver(Arc::new(CountingResolver {
            requests: AtomicUsize::new(0),
        }));
        registry.install_directory([("raw".to_string(), Rank(2), id("Source"))]);

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.acquire("raw"))
        };
        thread::sleep(Duration::from_millis(30));
        let failed = registry.fail_remote_from(Rank(2), &FailureCause::new("transport", "closed"));
        assert_eq!(failed, vec!["raw"]);
        assert!(matches!(
            waiter.join().expect("no panic"),
            Err(CapabilityError::Failed { .. })
        ));
    }

    #[test]
    fn local_capabilities_exclude_mirrors() {
        let registry = declared(&[("b", "B"), ("a", "A")]);
        registry.install_directory([("remote".to_string(), Rank(1), id("R"))]);
        let names: Vec<String> = registry
            .local_capabilities()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
