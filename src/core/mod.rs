//! Core protocol types.
//!
//! Module hierarchy follows type dependency order:
//! - seq: Seq0, Seq1
//! - error: CoreError, ErrorCode, ErrorCause
//! - identity: SessionId, CounterpartyRef
//! - event: SessionEvent, SessionPayload
//! - limits: Limits

pub mod error;
pub mod event;
pub mod identity;
pub mod limits;
pub mod seq;

pub use error::{CoreError, ErrorCause, ErrorCode, InvalidId};
pub use event::{Direction, InitPayload, SessionEvent, SessionPayload};
pub use identity::{CounterpartyRef, SessionId};
pub use limits::Limits;
pub use seq::{Seq0, Seq1};
