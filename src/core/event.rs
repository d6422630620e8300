//! Session wire events.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::ErrorCause;
use super::identity::{CounterpartyRef, SessionId};
use super::seq::{Seq0, Seq1};

/// Which way an event travelled. Local bookkeeping only; never encoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Inbound,
    Outbound,
}

/// Session establishment request carried by the first event of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitPayload {
    /// Protocol name the initiator wants the peer to run.
    pub protocol: String,
    pub initiator: CounterpartyRef,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl InitPayload {
    pub fn new(protocol: impl Into<String>, initiator: CounterpartyRef) -> Self {
        Self {
            protocol: protocol.into(),
            initiator,
            context: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum SessionPayload {
    Init(InitPayload),
    Data(Bytes),
    Ack,
    Close,
    Error(ErrorCause),
}

impl SessionPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionPayload::Init(_) => "init",
            SessionPayload::Data(_) => "data",
            SessionPayload::Ack => "ack",
            SessionPayload::Close => "close",
            SessionPayload::Error(_) => "error",
        }
    }

    /// Acks carry no payload of their own and never take a sequence slot.
    pub fn is_ack(&self) -> bool {
        matches!(self, SessionPayload::Ack)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// The sender's session id.
    pub session_id: SessionId,
    #[serde(default)]
    pub direction: Direction,
    pub timestamp_ms: u64,
    pub sequence_num: Seq0,
    pub received_sequence_num: Seq0,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub out_of_order_sequence_nums: Vec<Seq1>,
    pub payload: SessionPayload,
}

impl SessionEvent {
    /// Sequence slot of a payload-carrying event; `None` for sequence 0.
    pub fn seq1(&self) -> Option<Seq1> {
        Seq1::from_u64(self.sequence_num.get())
    }
}
