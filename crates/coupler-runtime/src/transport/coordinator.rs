//! Rank 0 bookkeeping.
//!
//! The coordinator runs two barriers: one collecting every process's
//! declarations before launch, one collecting every process's report at
//! the end. Each barrier answers all participants at once.
//!
//! Between the barriers it watches for deadlocks spanning processes:
//!
//! ```text
//!   every rank stalled or done  ─┐
//!   at least one rank stalled    ├─► unchanged for `timeout` ─► Deadlock to stalled ranks
//!   no epoch moved anywhere     ─┘
//! ```

use super::peer::Outgoing;
use super::wire::{Message, Owner};
use crate::dispatcher::RunReport;
use coupler_component::CapabilityError;
use coupler_types::{ComponentId, Rank};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Where a barrier answer goes.
pub(super) enum Responder {
    /// The coordinator's own session.
    Local(oneshot::Sender<Message>),
    /// The writer of a peer's connection.
    Remote(mpsc::UnboundedSender<Outgoing>),
}

impl Responder {
    /// Delivers `message`, waiting until a remote peer's frame is written.
    async fn deliver(self, message: Message) {
        match self {
            Self::Local(tx) => {
                let _ = tx.send(message);
            }
            Self::Remote(tx) => {
                let (ack, written) = oneshot::channel();
                if tx.send(Outgoing::Frame(message)).is_ok()
                    && tx.send(Outgoing::Flush(ack)).is_ok()
                {
                    let _ = written.await;
                }
            }
        }
    }
}

/// Where a deadlock notice goes.
pub(super) enum Notifier {
    /// The coordinator's own session.
    Local(mpsc::UnboundedSender<Message>),
    /// The writer of a peer's connection.
    Remote(mpsc::UnboundedSender<Outgoing>),
}

impl Notifier {
    fn notify(&self, message: Message) {
        let sent = match self {
            Self::Local(tx) => tx.send(message).is_ok(),
            Self::Remote(tx) => tx.send(Outgoing::Frame(message)).is_ok(),
        };
        if !sent {
            debug!("Deadlock notice not delivered, process gone");
        }
    }
}

type Declared = Result<Vec<(String, ComponentId)>, String>;

/// Last reported state of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RankStatus {
    Busy,
    /// Every live runner blocked, at this registry epoch.
    Stalled(u64),
    Done,
}

#[derive(Default)]
struct Stalls {
    status: BTreeMap<Rank, RankStatus>,
    notifiers: BTreeMap<Rank, Notifier>,
    since: Option<Instant>,
}

#[derive(Default)]
struct Barriers {
    hellos: BTreeMap<Rank, (Declared, Responder)>,
    dones: BTreeMap<Rank, (RunReport, Responder)>,
}

/// Collects control messages from every rank.
pub(super) struct Coordinator {
    world: usize,
    deadlock_timeout: Duration,
    barriers: Mutex<Barriers>,
    stalls: Mutex<Stalls>,
    runtime: Handle,
}

impl Coordinator {
    pub(super) fn new(world: usize, deadlock_timeout: Duration, runtime: Handle) -> Self {
        Self {
            world,
            deadlock_timeout,
            barriers: Mutex::new(Barriers::default()),
            stalls: Mutex::new(Stalls::default()),
            runtime,
        }
    }

    /// Records the stall status of `rank`.
    ///
    /// Stalled ranks repeat their status every poll, which is what lets the
    /// coordinator time a stall without a timer of its own.
    pub(super) fn progress(&self, rank: Rank, stalled: Option<u64>, notifier: Notifier) {
        self.progress_at(Instant::now(), rank, stalled, notifier);
    }

    fn progress_at(&self, now: Instant, rank: Rank, stalled: Option<u64>, notifier: Notifier) {
        if let Err(reason) = self.check_rank(rank) {
            warn!(reason = %reason, "Progress report ignored");
            return;
        }
        let mut stalls = self.stalls.lock();
        if stalls.status.get(&rank) == Some(&RankStatus::Done) {
            return;
        }
        stalls.notifiers.insert(rank, notifier);
        let status = stalled.map_or(RankStatus::Busy, RankStatus::Stalled);
        self.update(&mut stalls, now, rank, status);
    }

    /// Applies one status change and declares a deadlock once every rank
    /// has been stalled or done, without change, for the timeout.
    fn update(&self, stalls: &mut Stalls, now: Instant, rank: Rank, status: RankStatus) {
        if stalls.status.insert(rank, status) != Some(status) {
            stalls.since = None;
        }
        let stuck = stalls.status.len() == self.world
            && stalls.status.values().all(|s| *s != RankStatus::Busy)
            && stalls
                .status
                .values()
                .any(|s| matches!(s, RankStatus::Stalled(_)));
        if !stuck {
            stalls.since = None;
            return;
        }

        let since = *stalls.since.get_or_insert(now);
        if now.duration_since(since) < self.deadlock_timeout {
            return;
        }
        stalls.since = None;

        let stalled: Vec<Rank> = stalls
            .status
            .iter()
            .filter(|(_, s)| matches!(s, RankStatus::Stalled(_)))
            .map(|(rank, _)| *rank)
            .collect();
        warn!(ranks = ?stalled, "Deadlock across processes");
        for rank in stalled {
            if let Some(notifier) = stalls.notifiers.get(&rank) {
                notifier.notify(Message::Deadlock);
            }
        }
    }

    /// Records one control message; answers everyone once a barrier is full.
    pub(super) fn submit(&self, message: Message, responder: Responder) {
        let kind = message.kind();
        match message {
            Message::Hello { rank, capabilities } => {
                self.declare(rank, Ok(capabilities), responder);
            }
            Message::Abort { rank, reason } => {
                warn!(rank = %rank, reason = %reason, "Process aborted during declaration");
                self.declare(rank, Err(reason), responder);
            }
            Message::Done { rank, report } => self.done(rank, report, responder),
            _ => {
                warn!(kind, "Coordinator ignores message");
                self.reject(responder, format!("unexpected {kind} message"));
            }
        }
    }

    fn declare(&self, rank: Rank, declared: Declared, responder: Responder) {
        if let Err(reason) = self.check_rank(rank) {
            self.reject(responder, reason);
            return;
        }
        let complete = {
            let mut barriers = self.barriers.lock();
            if barriers.hellos.contains_key(&rank) {
                drop(barriers);
                self.reject(responder, format!("{rank} declared twice"));
                return;
            }
            barriers.hellos.insert(rank, (declared, responder));
            debug!(rank = %rank, received = barriers.hellos.len(), world = self.world, "Declarations received");
            (barriers.hellos.len() == self.world).then(|| std::mem::take(&mut barriers.hellos))
        };
        let Some(hellos) = complete else {
            return;
        };

        let (declared, responders): (Vec<_>, Vec<_>) = hellos
            .into_iter()
            .map(|(rank, (declared, responder))| ((rank, declared), (rank, responder)))
            .unzip();
        let answer = match directory(declared) {
            Ok(owners) => {
                info!(capabilities = owners.len(), "Directory complete");
                Message::Directory { owners }
            }
            Err(reason) => {
                warn!(reason = %reason, "Run rejected");
                Message::Rejected { reason }
            }
        };
        self.broadcast(responders, answer);
    }

    fn done(&self, rank: Rank, report: RunReport, responder: Responder) {
        if let Err(reason) = self.check_rank(rank) {
            self.reject(responder, reason);
            return;
        }
        {
            let mut stalls = self.stalls.lock();
            self.update(&mut stalls, Instant::now(), rank, RankStatus::Done);
        }
        let complete = {
            let mut barriers = self.barriers.lock();
            barriers.dones.insert(rank, (report, responder));
            debug!(rank = %rank, received = barriers.dones.len(), world = self.world, "Reports received");
            (barriers.dones.len() == self.world).then(|| std::mem::take(&mut barriers.dones))
        };
        let Some(dones) = complete else {
            return;
        };

        let (reports, responders): (Vec<_>, Vec<_>) = dones
            .into_iter()
            .map(|(rank, (report, responder))| (report, (rank, responder)))
            .unzip();
        let report = RunReport::merge(reports);
        info!(components = report.results.len(), "All processes finished");
        self.broadcast(responders, Message::Finished { report });
    }

    fn check_rank(&self, rank: Rank) -> Result<(), String> {
        if rank.index() < self.world {
            Ok(())
        } else {
            Err(format!("{rank} is outside a world of {} processes", self.world))
        }
    }

    fn reject(&self, responder: Responder, reason: String) {
        self.runtime
            .spawn(responder.deliver(Message::Rejected { reason }));
    }

    /// Answers every remote rank first, then the local session, so that
    /// the coordinator does not shut down with frames still queued.
    fn broadcast(&self, responders: Vec<(Rank, Responder)>, message: Message) {
        self.runtime.spawn(async move {
            let mut local = None;
            for (rank, responder) in responders {
                match responder {
                    Responder::Local(_) => local = Some(responder),
                    Responder::Remote(_) => {
                        debug!(rank = %rank, kind = message.kind(), "Answering");
                        responder.deliver(message.clone()).await;
                    }
                }
            }
            if let Some(local) = local {
                local.deliver(message).await;
            }
        });
    }
}

/// Builds the run-wide directory, or the reason the run cannot start.
fn directory(declared: Vec<(Rank, Declared)>) -> Result<Vec<Owner>, String> {
    let mut owners: BTreeMap<String, Owner> = BTreeMap::new();
    let mut aborted = Vec::new();

    for (rank, declared) in declared {
        let capabilities = match declared {
            Ok(capabilities) => capabilities,
            Err(reason) => {
                aborted.push(format!("{rank}: {reason}"));
                continue;
            }
        };
        for (name, component) in capabilities {
            if let Some(existing) = owners.get(&name) {
                return Err(CapabilityError::Duplicate {
                    name,
                    existing: existing.component.to_string(),
                    requested: component.to_string(),
                }
                .to_string());
            }
            owners.insert(
                name.clone(),
                Owner {
                    name,
                    rank,
                    component,
                },
            );
        }
    }

    if aborted.is_empty() {
        Ok(owners.into_values().collect())
    } else {
        Err(aborted.join("; "))
    }
}
