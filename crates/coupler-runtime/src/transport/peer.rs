//! Outgoing connections.
//!
//! Each process opens one connection to every other process. Requests for
//! remote capabilities travel over the link to their host; the link to the
//! coordinator also carries the control exchange.

use super::wire::{read_frame, write_frame, Message, Outcome};
use super::TransportError;
use crate::registry::{CapabilityRegistry, RemoteResolver};
use coupler_component::{FailureCause, Resolved};
use coupler_types::Rank;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Work for a connection's writer task.
pub(super) enum Outgoing {
    Frame(Message),
    /// Acknowledged once every earlier frame has been written.
    Flush(oneshot::Sender<()>),
}

/// Drains `rx` into `writer` until every sender is gone.
pub(super) async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) -> Result<(), TransportError> {
    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Frame(message) => write_frame(&mut writer, &message).await?,
            Outgoing::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    Ok(())
}

/// Connects to `addr`, retrying while the peer is not listening yet.
pub(super) async fn connect_with_retry(
    addr: &str,
    attempts: u32,
    backoff: Duration,
) -> Result<TcpStream, TransportError> {
    let attempts = attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!(addr = %addr, attempt, error = %e, "Peer not reachable yet");
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(TransportError::Connect {
        addr: addr.to_string(),
        attempts,
        message: last_error,
    })
}

#[derive(Default)]
struct Pending {
    requests: HashMap<u64, String>,
    closed: Option<FailureCause>,
}

/// Client side of the connection to one peer.
pub(super) struct PeerLink {
    peer: Rank,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    registry: Weak<CapabilityRegistry>,
}

impl PeerLink {
    /// Opens the link and starts its reader and writer tasks.
    ///
    /// Control messages (anything but replies) are forwarded to `control`;
    /// only the link to the coordinator should receive any.
    pub(super) async fn open(
        peer: Rank,
        addr: &str,
        attempts: u32,
        backoff: Duration,
        registry: Weak<CapabilityRegistry>,
        control: Option<mpsc::UnboundedSender<Message>>,
    ) -> Result<Arc<Self>, TransportError> {
        let stream = connect_with_retry(addr, attempts, backoff).await?;
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        let link = Arc::new(Self {
            peer,
            outgoing: tx,
            pending: Mutex::new(Pending::default()),
            next_id: AtomicU64::new(0),
            registry,
        });

        let on_write = Arc::clone(&link);
        tokio::spawn(async move {
            if let Err(e) = write_loop(writer, rx).await {
                on_write.close(&FailureCause::new("transport", e.to_string()));
            }
        });

        let on_read = Arc::clone(&link);
        tokio::spawn(async move { on_read.read_loop(reader, control).await });

        debug!(peer = %peer, addr = %addr, "Peer link open");
        Ok(link)
    }

    #[must_use]
    pub(super) fn peer(&self) -> Rank {
        self.peer
    }

    /// Queues a control message.
    pub(super) fn send(&self, message: Message) -> Result<(), TransportError> {
        self.outgoing
            .send(Outgoing::Frame(message))
            .map_err(|_| TransportError::Closed { peer: self.peer })
    }

    /// Queues a request for `name`; the reply settles the registry mirror.
    fn request(&self, name: &str) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock();
            if let Some(cause) = pending.closed.clone() {
                drop(pending);
                self.settle(name, Err(cause));
                return;
            }
            pending.requests.insert(id, name.to_string());
        }

        let frame = Outgoing::Frame(Message::Request {
            id,
            name: name.to_string(),
        });
        if self.outgoing.send(frame).is_err() {
            self.pending.lock().requests.remove(&id);
            let cause = FailureCause::new("transport", format!("connection to {} closed", self.peer));
            self.settle(name, Err(cause));
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        control: Option<mpsc::UnboundedSender<Message>>,
    ) {
        let cause = loop {
            match read_frame(&mut reader).await {
                Ok(Some(Message::Reply { id, outcome })) => self.on_reply(id, outcome),
                Ok(Some(message)) => match &control {
                    Some(control) => {
                        let _ = control.send(message);
                    }
                    None => {
                        warn!(peer = %self.peer, kind = message.kind(), "Unexpected message on peer link");
                    }
                },
                Ok(None) => {
                    break FailureCause::new("transport", format!("{} closed the connection", self.peer))
                }
                Err(e) => break FailureCause::new("transport", e.to_string()),
            }
        };
        self.close(&cause);
    }

    fn on_reply(&self, id: u64, outcome: Outcome) {
        let Some(name) = self.pending.lock().requests.remove(&id) else {
            warn!(peer = %self.peer, id, "Reply to unknown request");
            return;
        };
        let result = match outcome {
            Outcome::Ready { payload, fresh } => Ok(Resolved { payload, fresh }),
            Outcome::Failed { cause } => Err(cause),
            Outcome::NotFound => Err(FailureCause::new(
                "transport",
                format!("{} does not host '{name}'", self.peer),
            )),
        };
        self.settle(&name, result);
    }

    /// Fails every outstanding request; later requests fail immediately.
    fn close(&self, cause: &FailureCause) {
        let outstanding = {
            let mut pending = self.pending.lock();
            if pending.closed.is_some() {
                return;
            }
            pending.closed = Some(cause.clone());
            std::mem::take(&mut pending.requests)
        };
        if outstanding.is_empty() {
            debug!(peer = %self.peer, cause = %cause, "Peer link closed");
            return;
        }
        warn!(peer = %self.peer, outstanding = outstanding.len(), cause = %cause, "Peer link lost");
        if let Some(registry) = self.registry.upgrade() {
            registry.fail_remote_from(self.peer, cause);
        }
    }

    fn settle(&self, name: &str, result: Result<Resolved, FailureCause>) {
        if let Some(registry) = self.registry.upgrade() {
            registry.settle_remote(name, result);
        }
    }
}

/// Every outgoing link of this process, by rank.
pub(super) struct Links {
    links: HashMap<Rank, Arc<PeerLink>>,
    registry: Weak<CapabilityRegistry>,
}

impl Links {
    pub(super) fn new(
        links: impl IntoIterator<Item = Arc<PeerLink>>,
        registry: Weak<CapabilityRegistry>,
    ) -> Self {
        Self {
            links: links.into_iter().map(|l| (l.peer(), l)).collect(),
            registry,
        }
    }

    pub(super) fn get(&self, peer: Rank) -> Option<&Arc<PeerLink>> {
        self.links.get(&peer)
    }
}

impl RemoteResolver for Links {
    fn request(&self, name: &str, host: Rank) {
        if let Some(link) = self.links.get(&host) {
            link.request(name);
            return;
        }
        warn!(capability = %name, host = %host, "No link to capability host");
        if let Some(registry) = self.registry.upgrade() {
            registry.settle_remote(
                name,
                Err(FailureCause::new("transport", format!("no link to {host}"))),
            );
        }
    }
}
