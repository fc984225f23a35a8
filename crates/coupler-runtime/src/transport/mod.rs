//! Distributed transport.
//!
//! Lets several processes run one configuration together. Each process
//! hosts the components assigned to its rank; a capability produced on one
//! rank and acquired on another travels as a request/reply pair.
//!
//! # Topology
//!
//! ```text
//!            ┌──────────── rank 0 (coordinator) ────────────┐
//!            │  listener ◄──── links from ranks 1..n        │
//!            │  links ────────► listeners of ranks 1..n     │
//!            └──────────────────────────────────────────────┘
//!                  ▲                        │
//!   Hello / Done   │                        │ Directory / Finished
//!   Request        │                        ▼ Reply
//!            ┌──────────────── rank k ──────────────────────┐
//!            │  listener ◄──── links from every other rank  │
//!            └──────────────────────────────────────────────┘
//! ```
//!
//! Every rank connects to every other rank. A connection carries requests
//! in one direction and replies in the other; the connection to rank 0
//! also carries the control exchange.
//!
//! # Session
//!
//! 1. [`Transport::bind`] opens the listener.
//! 2. [`Transport::start`] connects to every peer and installs the remote
//!    resolver on the registry.
//! 3. [`Session::exchange_directory`] sends the local declarations to the
//!    coordinator and returns the run-wide directory (first barrier).
//! 4. Components run; remote acquires are resolved over the links. Each
//!    process reports whether its runners are stalled with
//!    [`Session::report_progress`], and learns of a deadlock spanning
//!    processes from [`Session::deadlock_declared`].
//! 5. [`Session::finish`] sends the local report and returns the merged
//!    report once every rank is done (second barrier).
//!
//! A rank that fails during declaration still joins the first barrier with
//! an abort, so every rank learns the run was rejected.

mod coordinator;
mod error;
mod peer;
mod server;
pub mod wire;

pub use error::TransportError;
pub use wire::Owner;

use crate::config::GlobalSettings;
use crate::dispatcher::RunReport;
use crate::registry::{CapabilityRegistry, RemoteResolver};
use coordinator::{Coordinator, Notifier, Responder};
use coupler_types::{ComponentId, Rank};
use peer::{Links, PeerLink};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use wire::Message;

/// A bound, not yet connected, endpoint of a distributed run.
pub struct Transport {
    rank: Rank,
    runtime: Runtime,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Transport {
    /// Creates the transport runtime and binds the listener for `rank`.
    ///
    /// `addr` may use port 0; [`local_addr`](Self::local_addr) reports the
    /// port actually bound.
    ///
    /// # Errors
    ///
    /// [`TransportError::Runtime`] or [`TransportError::Bind`].
    pub fn bind(rank: Rank, addr: &str) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("coupler-transport")
            .enable_all()
            .build()
            .map_err(|e| TransportError::Runtime(e.to_string()))?;

        let listener = runtime
            .block_on(TcpListener::bind(addr))
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;
        info!(rank = %rank, addr = %local_addr, "Transport listening");

        Ok(Self {
            rank,
            runtime,
            listener,
            local_addr,
        })
    }

    #[must_use]
    pub fn rank(&self) -> Rank {
        self.rank
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts serving `registry` and connects to every peer in
    /// `global.peers`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::RankOutOfRange`] if this rank has no peer entry
    /// - [`TransportError::Connect`] if a peer never accepts a connection
    pub fn start(
        self,
        global: &GlobalSettings,
        registry: Arc<CapabilityRegistry>,
    ) -> Result<Session, TransportError> {
        let Self {
            rank,
            runtime,
            listener,
            ..
        } = self;
        let world = global.peers.len();
        if rank.index() >= world {
            return Err(TransportError::RankOutOfRange { rank, world });
        }

        let coordinator = rank
            .is_coordinator()
            .then(|| {
                Arc::new(Coordinator::new(
                    world,
                    global.deadlock_timeout,
                    runtime.handle().clone(),
                ))
            });
        runtime.spawn(server::serve(
            listener,
            Arc::clone(&registry),
            coordinator.clone(),
        ));

        let (control_tx, control) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&registry);
        let links = runtime.block_on(async {
            let mut links = Vec::with_capacity(world.saturating_sub(1));
            for (index, addr) in global.peers.iter().enumerate() {
                let peer = Rank(index);
                if peer == rank {
                    continue;
                }
                let control = peer.is_coordinator().then(|| control_tx.clone());
                let link = PeerLink::open(
                    peer,
                    addr,
                    global.connect_attempts,
                    global.connect_backoff,
                    weak.clone(),
                    control,
                )
                .await?;
                links.push(link);
            }
            Ok::<_, TransportError>(links)
        })?;
        let local_control = coordinator.is_some().then(|| control_tx.clone());
        drop(control_tx);

        let links = Arc::new(Links::new(links, weak));
        registry.set_resolver(Arc::clone(&links) as Arc<dyn RemoteResolver>);
        info!(rank = %rank, world, "Connected to all peers");

        Ok(Session {
            rank,
            runtime: Some(runtime),
            coordinator,
            links,
            control,
            local_control,
            last_progress: None,
        })
    }
}

/// A connected endpoint taking part in the run's barriers.
///
/// Dropping the session stops the transport runtime without waiting for
/// outstanding requests.
pub struct Session {
    rank: Rank,
    runtime: Option<Runtime>,
    coordinator: Option<Arc<Coordinator>>,
    links: Arc<Links>,
    control: mpsc::UnboundedReceiver<Message>,
    /// Deadlock notices from the coordinator to its own session.
    local_control: Option<mpsc::UnboundedSender<Message>>,
    last_progress: Option<Option<u64>>,
}

impl Session {
    #[must_use]
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Joins the declaration barrier.
    ///
    /// Pass the locally declared capabilities, or the reason this process
    /// cannot take part.
    ///
    /// # Errors
    ///
    /// [`TransportError::Rejected`] if any process aborted or two processes
    /// declared the same capability.
    pub fn exchange_directory(
        &mut self,
        declared: Result<Vec<(String, ComponentId)>, String>,
    ) -> Result<Vec<Owner>, TransportError> {
        let message = match declared {
            Ok(capabilities) => Message::Hello {
                rank: self.rank,
                capabilities,
            },
            Err(reason) => Message::Abort {
                rank: self.rank,
                reason,
            },
        };
        match self.round_trip(message)? {
            Message::Directory { owners } => {
                debug!(rank = %self.rank, owners = owners.len(), "Directory received");
                Ok(owners)
            }
            Message::Rejected { reason } => Err(TransportError::Rejected { reason }),
            other => Err(TransportError::Protocol(format!(
                "expected directory, got {}",
                other.kind()
            ))),
        }
    }

    /// Joins the completion barrier and returns the merged report of every
    /// process.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] if the coordinator went away.
    pub fn finish(mut self, report: RunReport) -> Result<RunReport, TransportError> {
        let message = Message::Done {
            rank: self.rank,
            report,
        };
        match self.round_trip(message)? {
            Message::Finished { report } => {
                info!(rank = %self.rank, "Run finished on all processes");
                Ok(report)
            }
            Message::Rejected { reason } => Err(TransportError::Rejected { reason }),
            other => Err(TransportError::Protocol(format!(
                "expected finished, got {}",
                other.kind()
            ))),
        }
    }

    /// Tells the coordinator whether every live local runner is blocked.
    ///
    /// `stalled` is the registry epoch while they are. A stalled status is
    /// sent on every call; a busy one only when it changes.
    pub fn report_progress(&mut self, stalled: Option<u64>) {
        if stalled.is_none() && self.last_progress == Some(None) {
            return;
        }
        self.last_progress = Some(stalled);

        if let (Some(coordinator), Some(local)) = (&self.coordinator, &self.local_control) {
            coordinator.progress(self.rank, stalled, Notifier::Local(local.clone()));
            return;
        }
        let message = Message::Progress {
            rank: self.rank,
            stalled,
        };
        let sent = self
            .links
            .get(Rank::COORDINATOR)
            .map(|link| link.send(message));
        if !matches!(sent, Some(Ok(()))) {
            debug!(rank = %self.rank, "Progress report not sent, coordinator unreachable");
        }
    }

    /// Returns `true` if the coordinator declared a deadlock spanning
    /// processes since the last call.
    pub fn deadlock_declared(&mut self) -> bool {
        let mut declared = false;
        while let Ok(message) = self.control.try_recv() {
            match message {
                Message::Deadlock => declared = true,
                other => {
                    warn!(kind = other.kind(), "Unexpected control message during run");
                }
            }
        }
        declared
    }

    /// Sends one control message to the coordinator and waits for its
    /// answer.
    fn round_trip(&mut self, message: Message) -> Result<Message, TransportError> {
        let closed = TransportError::Closed {
            peer: Rank::COORDINATOR,
        };
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| TransportError::Runtime("session already finished".into()))?;

        match &self.coordinator {
            Some(coordinator) => {
                let (tx, rx) = oneshot::channel();
                coordinator.submit(message, Responder::Local(tx));
                runtime.block_on(rx).map_err(|_| closed)
            }
            None => {
                let link = self.links.get(Rank::COORDINATOR).ok_or(closed.clone())?;
                link.send(message)?;
                loop {
                    match runtime.block_on(self.control.recv()) {
                        Some(Message::Deadlock) => debug!("Late deadlock notice ignored"),
                        Some(answer) => return Ok(answer),
                        None => return Err(closed),
                    }
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
