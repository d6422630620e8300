//! Persisted per-session record.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::receive::ReceiveState;
use super::send::SendState;
use crate::core::{CounterpartyRef, SessionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Confirmed,
    Closing,
    WaitForFinalAck,
    Closed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "CREATED",
            SessionStatus::Confirmed => "CONFIRMED",
            SessionStatus::Closing => "CLOSING",
            SessionStatus::WaitForFinalAck => "WAIT_FOR_FINAL_ACK",
            SessionStatus::Closed => "CLOSED",
            SessionStatus::Error => "ERROR",
        }
    }

    fn rank(self) -> u8 {
        match self {
            SessionStatus::Created => 0,
            SessionStatus::Confirmed => 1,
            SessionStatus::Closing => 2,
            SessionStatus::WaitForFinalAck => 3,
            SessionStatus::Closed => 4,
            SessionStatus::Error => 5,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    session_id: SessionId,
    status: SessionStatus,
    /// Unknown only for sessions that failed before any `Init` was seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    counterparty: Option<CounterpartyRef>,
    initiator: bool,
    send: SendState,
    receive: ReceiveState,
    created_at_ms: u64,
    #[serde(default)]
    last_received_at_ms: u64,
}

impl SessionState {
    /// A session this peer is about to initiate. Send an `Init` first.
    pub fn new(session_id: SessionId, counterparty: CounterpartyRef, now_ms: u64) -> Self {
        Self::build(session_id, SessionStatus::Created, Some(counterparty), true, now_ms)
    }

    /// A session whose establishment happened out of band.
    pub fn confirmed(
        session_id: SessionId,
        counterparty: CounterpartyRef,
        initiator: bool,
        now_ms: u64,
    ) -> Self {
        Self::build(
            session_id,
            SessionStatus::Confirmed,
            Some(counterparty),
            initiator,
            now_ms,
        )
    }

    pub(crate) fn initiated(session_id: SessionId, counterparty: CounterpartyRef, now_ms: u64) -> Self {
        Self::build(session_id, SessionStatus::Created, Some(counterparty), false, now_ms)
    }

    pub(crate) fn orphaned(session_id: SessionId, now_ms: u64) -> Self {
        Self::build(session_id, SessionStatus::Error, None, false, now_ms)
    }

    fn build(
        session_id: SessionId,
        status: SessionStatus,
        counterparty: Option<CounterpartyRef>,
        initiator: bool,
        now_ms: u64,
    ) -> Self {
        Self {
            session_id,
            status,
            counterparty,
            initiator,
            send: SendState::new(),
            receive: ReceiveState::new(),
            created_at_ms: now_ms,
            last_received_at_ms: now_ms,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn counterparty(&self) -> Option<&CounterpartyRef> {
        self.counterparty.as_ref()
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn send_state(&self) -> &SendState {
        &self.send
    }

    pub fn receive_state(&self) -> &ReceiveState {
        &self.receive
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn last_received_at_ms(&self) -> u64 {
        self.last_received_at_ms
    }

    pub(crate) fn send_mut(&mut self) -> &mut SendState {
        &mut self.send
    }

    pub(crate) fn receive_mut(&mut self) -> &mut ReceiveState {
        &mut self.receive
    }

    pub(crate) fn touch(&mut self, now_ms: u64) {
        self.last_received_at_ms = self.last_received_at_ms.max(now_ms);
    }

    /// Moves forward through the lifecycle. Terminal states never change and
    /// backwards moves are ignored.
    pub(crate) fn advance(&mut self, to: SessionStatus) {
        let from = self.status;
        if from == to || from.is_terminal() || to.rank() < from.rank() {
            return;
        }
        self.status = to;
        if to == SessionStatus::Error {
            tracing::warn!(session_id = %self.session_id, %from, %to, "session failed");
        } else {
            tracing::info!(session_id = %self.session_id, %from, %to, "session status changed");
        }
    }
}
