//! Session protocol: sequencing, acknowledgement, close handshake.

pub mod error;
pub mod manager;
pub mod receive;
pub mod send;
pub mod state;

pub use error::SessionError;
pub use manager::SessionManager;
pub use receive::{DeliveryError, IngestDecision, ReceiveState};
pub use send::{AckOutcome, AckViolation, SendState, UnackedEntry};
pub use state::{SessionState, SessionStatus};
