//! Caller-misuse errors returned by the session manager.
//!
//! Protocol violations by the peer are not errors here: they move the session
//! to `ERROR` and queue an `Error` event instead.

use thiserror::Error;

use super::state::SessionStatus;
use crate::core::{Seq1, SessionId};
use crate::error::{Effect, Transience};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("cannot {action} on session {session_id} in status {status}")]
    InvalidStatus {
        session_id: SessionId,
        status: SessionStatus,
        action: &'static str,
    },

    #[error("session {session_id} already sent its close")]
    CloseAlreadySent { session_id: SessionId },

    #[error("session {session_id} cannot send init: it has already sent events")]
    InitAfterStart { session_id: SessionId },

    #[error("only the initiating side may send init (session {session_id})")]
    InitByInitiated { session_id: SessionId },

    #[error("ack events are generated by the session manager and cannot be sent directly")]
    AckNotSendable,

    #[error("data payload of {len} bytes exceeds the limit of {max}")]
    DataTooLarge { len: usize, max: usize },

    #[error("session {session_id}: expected acknowledgement of {expected}, got {got}")]
    AckOutOfOrder {
        session_id: SessionId,
        expected: Seq1,
        got: Seq1,
    },

    #[error("session {session_id}: sequence {seq} has not been received")]
    NotReceived { session_id: SessionId, seq: Seq1 },

    #[error("event for session {got} fed to session {expected}")]
    SessionMismatch { expected: SessionId, got: SessionId },

    #[error("no state for session {session_id}")]
    UnknownSession { session_id: SessionId },
}

impl SessionError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }

    /// Misuse is detected before the state is touched.
    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
