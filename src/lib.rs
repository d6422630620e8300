#![forbid(unsafe_code)]

pub mod clock;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod runtime;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod wait;
pub mod wire;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the protocol surface at crate root for convenience
pub use crate::core::{
    CounterpartyRef, Direction, ErrorCause, ErrorCode, InitPayload, Limits, Seq0, Seq1,
    SessionEvent, SessionId, SessionPayload,
};
pub use crate::runtime::SessionRuntime;
pub use crate::session::{SessionError, SessionManager, SessionState, SessionStatus};
pub use crate::store::{FileSessionStore, InMemorySessionStore, SessionStore, Version};
