//! Wire format.
//!
//! Every message is one frame: a little-endian `u32` length followed by
//! that many bytes of JSON.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ len: u32 LE  │ serde_json body (len bytes)  │
//! └──────────────┴──────────────────────────────┘
//! ```

use super::TransportError;
use crate::dispatcher::RunReport;
use coupler_component::{FailureCause, Payload};
use coupler_types::{ComponentId, Rank};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Owner of one capability in the run-wide directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub name: String,
    pub rank: Rank,
    pub component: ComponentId,
}

/// Answer to a [`Message::Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ready { payload: Payload, fresh: bool },
    Failed { cause: FailureCause },
    NotFound,
}

/// One frame of the peer protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Declared capabilities of one process, sent to the coordinator.
    Hello {
        rank: Rank,
        capabilities: Vec<(String, ComponentId)>,
    },
    /// A process failed during declaration.
    Abort { rank: Rank, reason: String },
    /// Run-wide capability directory.
    Directory { owners: Vec<Owner> },
    /// The run will not start.
    Rejected { reason: String },
    /// Asks the host of `name` for its payload.
    Request { id: u64, name: String },
    /// Exactly one per request.
    Reply { id: u64, outcome: Outcome },
    /// All local components reached a terminal state.
    Done { rank: Rank, report: RunReport },
    /// Every process is done; carries the merged report.
    Finished { report: RunReport },
    /// Stall status of one process, sent to the coordinator.
    ///
    /// `stalled` holds the registry epoch while every live runner of the
    /// process is blocked in `acquire`, and is `None` otherwise.
    Progress { rank: Rank, stalled: Option<u64> },
    /// Every process is stalled: fail the capabilities of blocked runners.
    Deadlock,
}

impl Message {
    /// Variant name, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Abort { .. } => "abort",
            Self::Directory { .. } => "directory",
            Self::Rejected { .. } => "rejected",
            Self::Request { .. } => "request",
            Self::Reply { .. } => "reply",
            Self::Done { .. } => "done",
            Self::Finished { .. } => "finished",
            Self::Progress { .. } => "progress",
            Self::Deadlock => "deadlock",
        }
    }
}

/// Reads one frame.
///
/// Returns `Ok(None)` on a clean end of stream before the length header.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge { len });
    }
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;
    Ok(Some(serde_json::from_slice(&buffer)?))
}

/// Writes and flushes one frame.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge { len: body.len() });
    }
    let len = u32::try_from(body.len()).map_err(|_| TransportError::FrameTooLarge {
        len: body.len(),
    })?;
    writer.write_u32_le(len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
