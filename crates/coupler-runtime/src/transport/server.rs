//! Incoming connections.
//!
//! Every accepted connection is served by one reader loop. Requests are
//! answered from the local registry on the blocking pool, since a request
//! for a capability that is still being computed waits for its producer.

use super::coordinator::{Coordinator, Notifier, Responder};
use super::peer::{write_loop, Outgoing};
use super::wire::{read_frame, Message, Outcome};
use crate::registry::CapabilityRegistry;
use coupler_component::{CapabilityError, FailureCause};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Accepts connections until the runtime shuts down.
pub(super) async fn serve(
    listener: TcpListener,
    registry: Arc<CapabilityRegistry>,
    coordinator: Option<Arc<Coordinator>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(addr = %addr, "Peer connected");
                tokio::spawn(handle_connection(
                    stream,
                    Arc::clone(&registry),
                    coordinator.clone(),
                ));
            }
            Err(e) => warn!(error = %e, "Accept failed"),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<CapabilityRegistry>,
    coordinator: Option<Arc<Coordinator>>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(e) = write_loop(writer, rx).await {
            warn!(error = %e, "Writing to peer failed");
        }
    });

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(Message::Request { id, name })) => {
                tokio::spawn(answer(id, name, Arc::clone(&registry), tx.clone()));
            }
            Ok(Some(
                message @ (Message::Hello { .. } | Message::Abort { .. } | Message::Done { .. }),
            )) => match &coordinator {
                Some(coordinator) => coordinator.submit(message, Responder::Remote(tx.clone())),
                None => warn!(kind = message.kind(), "Control message sent to a non-coordinator"),
            },
            Ok(Some(Message::Progress { rank, stalled })) => match &coordinator {
                Some(coordinator) => {
                    coordinator.progress(rank, stalled, Notifier::Remote(tx.clone()));
                }
                None => warn!(rank = %rank, "Progress report sent to a non-coordinator"),
            },
            Ok(Some(message)) => {
                warn!(kind = message.kind(), "Unexpected message from peer");
            }
            Ok(None) => {
                debug!("Peer disconnected");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Reading from peer failed");
                break;
            }
        }
    }
}

/// Resolves `name` locally and sends exactly one reply.
async fn answer(
    id: u64,
    name: String,
    registry: Arc<CapabilityRegistry>,
    tx: mpsc::UnboundedSender<Outgoing>,
) {
    let lookup = name.clone();
    let resolved = tokio::task::spawn_blocking(move || registry.hosted_acquire(&lookup)).await;
    let outcome = match resolved {
        Ok(Ok(resolved)) => Outcome::Ready {
            payload: resolved.payload,
            fresh: resolved.fresh,
        },
        Ok(Err(CapabilityError::Failed { cause, .. })) => Outcome::Failed { cause },
        Ok(Err(CapabilityError::NotFound { .. })) => Outcome::NotFound,
        Ok(Err(other)) => Outcome::Failed {
            cause: FailureCause::new("transport", other.to_string()),
        },
        Err(e) => Outcome::Failed {
            cause: FailureCause::new("transport", e.to_string()),
        },
    };
    debug!(capability = %name, id, "Answering remote request");
    if tx.send(Outgoing::Frame(Message::Reply { id, outcome })).is_err() {
        debug!(capability = %name, "Requester gone before reply");
    }
}
