//! Transport errors.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`TransportError::Bind`] | `TRANSPORT_BIND` | No |
//! | [`TransportError::Connect`] | `TRANSPORT_CONNECT` | Yes |
//! | [`TransportError::Io`] | `TRANSPORT_IO` | Yes |
//! | [`TransportError::Codec`] | `TRANSPORT_CODEC` | No |
//! | [`TransportError::FrameTooLarge`] | `TRANSPORT_FRAME_TOO_LARGE` | No |
//! | [`TransportError::Protocol`] | `TRANSPORT_PROTOCOL` | No |
//! | [`TransportError::Rejected`] | `TRANSPORT_REJECTED` | No |
//! | [`TransportError::RankOutOfRange`] | `TRANSPORT_RANK_OUT_OF_RANGE` | No |
//! | [`TransportError::Closed`] | `TRANSPORT_CLOSED` | Yes |
//! | [`TransportError::Runtime`] | `TRANSPORT_RUNTIME` | No |

use coupler_types::{ErrorCode, Rank};
use thiserror::Error;

/// Distributed transport error.
///
/// Carries messages rather than sources so that one failure can be handed
/// to every waiter of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },

    /// A peer did not accept connections in time.
    #[error("failed to connect to {addr} after {attempts} attempts: {message}")]
    Connect {
        addr: String,
        attempts: u32,
        message: String,
    },

    /// Socket read or write failed.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// A frame could not be encoded or decoded.
    #[error("invalid frame: {0}")]
    Codec(String),

    /// A frame header announced more bytes than allowed.
    #[error("frame of {len} bytes exceeds the limit")]
    FrameTooLarge { len: usize },

    /// A peer sent a message that is not valid at this point.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The coordinator refused to start the run.
    #[error("run rejected: {reason}")]
    Rejected { reason: String },

    /// This process's rank is not listed in the peer table.
    #[error("{rank} is outside a world of {world} processes")]
    RankOutOfRange { rank: Rank, world: usize },

    /// The connection to a peer closed before the exchange finished.
    #[error("connection to {peer} closed")]
    Closed { peer: Rank },

    /// The async runtime could not be created.
    #[error("transport runtime: {0}")]
    Runtime(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "TRANSPORT_BIND",
            Self::Connect { .. } => "TRANSPORT_CONNECT",
            Self::Io(_) => "TRANSPORT_IO",
            Self::Codec(_) => "TRANSPORT_CODEC",
            Self::FrameTooLarge { .. } => "TRANSPORT_FRAME_TOO_LARGE",
            Self::Protocol(_) => "TRANSPORT_PROTOCOL",
            Self::Rejected { .. } => "TRANSPORT_REJECTED",
            Self::RankOutOfRange { .. } => "TRANSPORT_RANK_OUT_OF_RANGE",
            Self::Closed { .. } => "TRANSPORT_CLOSED",
            Self::Runtime(_) => "TRANSPORT_RUNTIME",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io(_) | Self::Closed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coupler_types::assert_error_codes;

    fn all_variants() -> Vec<TransportError> {
        vec![
            TransportError::Bind {
                addr: "127.0.0.1:1".into(),
                message: "in use".into(),
            },
            TransportError::Connect {
                addr: "127.0.0.1:2".into(),
                attempts: 3,
                message: "refused".into(),
            },
            TransportError::Io("reset".into()),
            TransportError::Codec("eof".into()),
            TransportError::FrameTooLarge { len: 1 << 30 },
            TransportError::Protocol("unexpected hello".into()),
            TransportError::Rejected {
                reason: "duplicate".into(),
            },
            TransportError::RankOutOfRange {
                rank: Rank(4),
                world: 2,
            },
            TransportError::Closed { peer: Rank(0) },
            TransportError::Runtime("no threads".into()),
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "TRANSPORT_");
    }

    #[test]
    fn io_error_converts() {
        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset").into();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("peer reset"));
    }

    #[test]
    fn rank_display() {
        let err = TransportError::RankOutOfRange {
            rank: Rank(4),
            world: 2,
        };
        assert_eq!(err.to_string(), "rank 4 is outside a world of 2 processes");
    }
}
