use thiserror::Error;

use crate::config::ConfigError;
use crate::core::CoreError;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::wire::{DecodeError, EncodeError};

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred (locally or remotely).
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to render output: {0}")]
    Render(#[source] serde_json::Error),

    #[error("gave up on session {session_id} after {attempts} conflicting writes")]
    ContentionExhausted {
        session_id: crate::core::SessionId,
        attempts: u32,
    },
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Core(e) => e.transience(),
            Error::Session(e) => e.transience(),
            Error::Store(e) => e.transience(),
            Error::Config(_) | Error::Encode(_) | Error::Decode(_) | Error::Render(_) => {
                Transience::Permanent
            }
            Error::ContentionExhausted { .. } => Transience::Retryable,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Core(e) => e.effect(),
            Error::Session(e) => e.effect(),
            Error::Store(e) => e.effect(),
            Error::Config(_) => Effect::Unknown,
            Error::Encode(_)
            | Error::Decode(_)
            | Error::Render(_)
            | Error::ContentionExhausted { .. } => Effect::None,
        }
    }
}
