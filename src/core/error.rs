//! Core capability errors and protocol error codes.
//!
//! Core errors are domain/refusal states, not library implementation details.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Effect, Transience};

/// Invalid identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("session id `{raw}` is invalid: {reason}")]
    Session { raw: String, reason: String },
    #[error("counterparty `{raw}` is invalid: {reason}")]
    Counterparty { raw: String, reason: String },
}

/// Canonical error enum for core capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

// =============================================================================
// Protocol error codes + cause
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Close handshake
    CloseWithGap,
    DuplicateClose,
    DataAfterClose,

    // Sequencing
    AckBeyondSent,
    MissingSequence,
    UnexpectedInit,
    ReceiveBufferOverflow,

    // Lifecycle
    SessionMissing,
    HeartbeatTimeout,
    MalformedEvent,

    /// Raised by the local workflow rather than by the protocol.
    Application,

    /// Forward-compatible carrier for codes this build does not know.
    Unknown(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::CloseWithGap => "close_with_gap",
            ErrorCode::DuplicateClose => "duplicate_close",
            ErrorCode::DataAfterClose => "data_after_close",
            ErrorCode::AckBeyondSent => "ack_beyond_sent",
            ErrorCode::MissingSequence => "missing_sequence",
            ErrorCode::UnexpectedInit => "unexpected_init",
            ErrorCode::ReceiveBufferOverflow => "receive_buffer_overflow",
            ErrorCode::SessionMissing => "session_missing",
            ErrorCode::HeartbeatTimeout => "heartbeat_timeout",
            ErrorCode::MalformedEvent => "malformed_event",
            ErrorCode::Application => "application",
            ErrorCode::Unknown(raw) => raw,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "close_with_gap" => ErrorCode::CloseWithGap,
            "duplicate_close" => ErrorCode::DuplicateClose,
            "data_after_close" => ErrorCode::DataAfterClose,
            "ack_beyond_sent" => ErrorCode::AckBeyondSent,
            "missing_sequence" => ErrorCode::MissingSequence,
            "unexpected_init" => ErrorCode::UnexpectedInit,
            "receive_buffer_overflow" => ErrorCode::ReceiveBufferOverflow,
            "session_missing" => ErrorCode::SessionMissing,
            "heartbeat_timeout" => ErrorCode::HeartbeatTimeout,
            "malformed_event" => ErrorCode::MalformedEvent,
            "application" => ErrorCode::Application,
            other => ErrorCode::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ErrorCode::parse(&raw))
    }
}

/// Payload of an `Error` session event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCause {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorCause {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
