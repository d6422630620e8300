//! Inbound buffering, deduplication and contiguity tracking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Seq0, Seq1, SessionEvent};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveState {
    last_delivered: Seq0,
    #[serde(default, with = "buffered_entries")]
    buffered: BTreeMap<Seq1, SessionEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    peer_close_seq: Option<Seq1>,
    #[serde(default)]
    pending_ack: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestDecision {
    /// Already delivered or already buffered. Only re-acked.
    DuplicateNoop,
    Buffered,
    /// Buffer is full; the event was dropped.
    Overflow { limit: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery out of order: expected {expected}, got {got}")]
    OutOfOrder { expected: Seq1, got: Seq1 },
    #[error("sequence {seq} has not been received")]
    NotReceived { seq: Seq1 },
}

impl ReceiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_delivered(&self) -> Seq0 {
        self.last_delivered
    }

    pub fn buffered(&self) -> &BTreeMap<Seq1, SessionEvent> {
        &self.buffered
    }

    pub fn peer_close_seq(&self) -> Option<Seq1> {
        self.peer_close_seq
    }

    pub fn pending_ack(&self) -> bool {
        self.pending_ack
    }

    pub fn expected_next(&self) -> Seq1 {
        self.last_delivered.next()
    }

    pub fn is_duplicate(&self, seq: Seq1) -> bool {
        self.last_delivered.covers(seq) || self.buffered.contains_key(&seq)
    }

    /// The event the consumer may take next, if it has arrived.
    pub fn next_deliverable(&self) -> Option<&SessionEvent> {
        self.buffered.get(&self.expected_next())
    }

    /// Lowest sequence in `(last_delivered, below)` that has not arrived.
    pub fn first_missing_below(&self, below: Seq1) -> Option<Seq1> {
        let mut expected = self.last_delivered.get().saturating_add(1);
        for seq in self.buffered.range(..below).map(|(seq, _)| seq.get()) {
            if seq != expected {
                return Seq1::from_u64(expected);
            }
            expected = seq.saturating_add(1);
        }
        (expected < below.get()).then(|| Seq1::from_u64(expected)).flatten()
    }

    /// Lowest missing sequence below the highest buffered one.
    pub fn first_gap(&self) -> Option<Seq1> {
        let (highest, _) = self.buffered.last_key_value()?;
        self.first_missing_below(*highest)
    }

    /// Cumulative and selective ack fields describing what we hold.
    pub fn ack_fields(&self) -> (Seq0, Vec<Seq1>) {
        (self.last_delivered, self.buffered.keys().copied().collect())
    }

    pub(crate) fn ingest(
        &mut self,
        seq: Seq1,
        event: SessionEvent,
        max_buffered: usize,
    ) -> IngestDecision {
        if self.is_duplicate(seq) {
            self.pending_ack = true;
            return IngestDecision::DuplicateNoop;
        }
        if self.buffered.len() >= max_buffered {
            return IngestDecision::Overflow {
                limit: max_buffered,
            };
        }
        self.buffered.insert(seq, event);
        self.pending_ack = true;
        IngestDecision::Buffered
    }

    pub(crate) fn record_peer_close(&mut self, seq: Seq1) {
        self.peer_close_seq = Some(seq);
    }

    pub(crate) fn deliver(&mut self, seq: Seq1) -> Result<SessionEvent, DeliveryError> {
        let expected = self.expected_next();
        if seq != expected {
            return Err(DeliveryError::OutOfOrder { expected, got: seq });
        }
        let event = self
            .buffered
            .remove(&seq)
            .ok_or(DeliveryError::NotReceived { seq })?;
        self.last_delivered = Seq0::from(seq);
        self.pending_ack = true;
        Ok(event)
    }

    pub(crate) fn take_pending_ack(&mut self) -> bool {
        std::mem::take(&mut self.pending_ack)
    }
}

/// JSON object keys must be strings; persist the buffer as an ordered list.
mod buffered_entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::core::{Seq1, SessionEvent};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<Seq1, SessionEvent>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<(Seq1, &SessionEvent)> = map.iter().map(|(k, v)| (*k, v)).collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Seq1, SessionEvent>, D::Error> {
        let entries: Vec<(Seq1, SessionEvent)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Direction, SessionId, SessionPayload};
    use bytes::Bytes;

    fn seq(n: u64) -> Seq1 {
        Seq1::from_u64(n).unwrap()
    }

    fn data(n: u64) -> SessionEvent {
        SessionEvent {
            session_id: SessionId::new("s").unwrap(),
            direction: Direction::Inbound,
            timestamp_ms: 0,
            sequence_num: Seq0::new(n),
            received_sequence_num: Seq0::ZERO,
            out_of_order_sequence_nums: Vec::new(),
            payload: SessionPayload::Data(Bytes::from(format!("m{n}"))),
        }
    }

    #[test]
    fn out_of_order_events_wait_for_the_gap() {
        let mut state = ReceiveState::new();
        assert_eq!(state.ingest(seq(2), data(2), 16), IngestDecision::Buffered);
        assert!(state.next_deliverable().is_none());
        assert_eq!(state.first_gap(), Some(seq(1)));

        assert_eq!(state.ingest(seq(1), data(1), 16), IngestDecision::Buffered);
        assert_eq!(state.first_gap(), None);
        assert_eq!(state.next_deliverable().map(|e| e.sequence_num.get()), Some(1));
    }

    #[test]
    fn duplicates_only_request_an_ack() {
        let mut state = ReceiveState::new();
        state.ingest(seq(1), data(1), 16);
        state.deliver(seq(1)).unwrap();
        assert!(state.take_pending_ack());

        assert_eq!(state.ingest(seq(1), data(1), 16), IngestDecision::DuplicateNoop);
        assert!(state.pending_ack());
        assert!(state.buffered().is_empty());
    }

    #[test]
    fn delivery_is_strictly_contiguous() {
        let mut state = ReceiveState::new();
        state.ingest(seq(1), data(1), 16);
        state.ingest(seq(2), data(2), 16);

        let err = state.deliver(seq(2)).unwrap_err();
        assert_eq!(
            err,
            DeliveryError::OutOfOrder {
                expected: seq(1),
                got: seq(2)
            }
        );
        state.deliver(seq(1)).unwrap();
        state.deliver(seq(2)).unwrap();
        assert_eq!(state.last_delivered(), Seq0::new(2));
        assert_eq!(
            state.deliver(seq(3)).unwrap_err(),
            DeliveryError::NotReceived { seq: seq(3) }
        );
    }

    #[test]
    fn overflow_drops_the_event() {
        let mut state = ReceiveState::new();
        state.ingest(seq(2), data(2), 1);
        assert_eq!(
            state.ingest(seq(3), data(3), 1),
            IngestDecision::Overflow { limit: 1 }
        );
        assert_eq!(state.buffered().len(), 1);
    }

    #[test]
    fn missing_below_handles_sparse_buffers() {
        let mut state = ReceiveState::new();
        state.ingest(seq(1), data(1), 16);
        state.ingest(seq(2), data(2), 16);
        state.ingest(seq(5), data(5), 16);
        assert_eq!(state.first_missing_below(seq(3)), None);
        assert_eq!(state.first_missing_below(seq(5)), Some(seq(3)));
        assert_eq!(state.first_missing_below(seq(u64::MAX)), Some(seq(3)));

        let (cumulative, selective) = state.ack_fields();
        assert_eq!(cumulative, Seq0::ZERO);
        assert_eq!(selective, vec![seq(1), seq(2), seq(5)]);
    }

    #[test]
    fn persisted_form_roundtrips() {
        let mut state = ReceiveState::new();
        state.ingest(seq(3), data(3), 16);
        state.record_peer_close(seq(4));
        let json = serde_json::to_string(&state).unwrap();
        let back: ReceiveState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
