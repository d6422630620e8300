//! Outbound sequencing, unacked tracking and resend scheduling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Direction, Seq0, Seq1, SessionEvent, SessionId, SessionPayload};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnackedEntry {
    pub event: SessionEvent,
    pub queued_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent_at_ms: Option<u64>,
    /// Peer holds it out of order; stop resending until the cumulative ack
    /// catches up.
    #[serde(default)]
    pub suppressed: bool,
}

impl UnackedEntry {
    fn is_due(&self, now_ms: u64, resend_window_ms: u64) -> bool {
        match self.last_sent_at_ms {
            None => true,
            Some(sent) => sent.saturating_add(resend_window_ms) <= now_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendState {
    next_seq: Seq1,
    #[serde(default, with = "unacked_entries")]
    unacked: BTreeMap<Seq1, UnackedEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_close_seq: Option<Seq1>,
}

impl Default for SendState {
    fn default() -> Self {
        Self {
            next_seq: Seq1::ONE,
            unacked: BTreeMap::new(),
            local_close_seq: None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AckViolation {
    #[error("peer acked {acked} but the last sequence sent is {last_sent}")]
    BeyondSent { acked: Seq0, last_sent: Seq0 },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AckOutcome {
    pub removed: Vec<Seq1>,
    pub suppressed: Vec<Seq1>,
}

impl SendState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_seq(&self) -> Seq1 {
        self.next_seq
    }

    /// Highest sequence assigned so far (zero before the first send).
    pub fn last_sent_seq(&self) -> Seq0 {
        self.next_seq.prev_seq0()
    }

    pub fn unacked(&self) -> &BTreeMap<Seq1, UnackedEntry> {
        &self.unacked
    }

    pub fn local_close_seq(&self) -> Option<Seq1> {
        self.local_close_seq
    }

    /// An Init sits at sequence 1 and the peer has not cumulatively acked it.
    pub fn awaiting_init_ack(&self) -> bool {
        self.unacked
            .get(&Seq1::ONE)
            .is_some_and(|entry| matches!(entry.event.payload, SessionPayload::Init(_)))
    }

    /// Assigned and covered by a cumulative ack.
    pub fn is_acked(&self, seq: Seq1) -> bool {
        seq < self.next_seq && !self.unacked.contains_key(&seq)
    }

    pub(crate) fn enqueue(
        &mut self,
        session_id: SessionId,
        payload: SessionPayload,
        now_ms: u64,
    ) -> SessionEvent {
        let seq = self.next_seq;
        self.next_seq = seq.next();
        if matches!(payload, SessionPayload::Close) {
            self.local_close_seq = Some(seq);
        }
        let event = SessionEvent {
            session_id,
            direction: Direction::Outbound,
            timestamp_ms: now_ms,
            sequence_num: Seq0::from(seq),
            received_sequence_num: Seq0::ZERO,
            out_of_order_sequence_nums: Vec::new(),
            payload,
        };
        self.unacked.insert(
            seq,
            UnackedEntry {
                event: event.clone(),
                queued_at_ms: now_ms,
                last_sent_at_ms: None,
                suppressed: false,
            },
        );
        event
    }

    /// Applies the ack fields piggybacked on an inbound event.
    ///
    /// Validation happens before any entry is touched.
    pub(crate) fn apply_peer_ack(
        &mut self,
        cumulative: Seq0,
        selective: &[Seq1],
    ) -> Result<AckOutcome, AckViolation> {
        let last_sent = self.last_sent_seq();
        if cumulative > last_sent {
            return Err(AckViolation::BeyondSent {
                acked: cumulative,
                last_sent,
            });
        }
        if let Some(seq) = selective.iter().find(|seq| **seq >= self.next_seq) {
            return Err(AckViolation::BeyondSent {
                acked: Seq0::from(*seq),
                last_sent,
            });
        }

        let mut outcome = AckOutcome::default();
        if cumulative > Seq0::ZERO {
            let kept = self.unacked.split_off(&cumulative.next());
            outcome.removed = std::mem::replace(&mut self.unacked, kept)
                .into_keys()
                .collect();
        }
        for seq in selective {
            if let Some(entry) = self.unacked.get_mut(seq)
                && !entry.suppressed
            {
                entry.suppressed = true;
                outcome.suppressed.push(*seq);
            }
        }
        Ok(outcome)
    }

    /// Entries due for (re)transmission; marks them sent at `now_ms`.
    ///
    /// The lowest unacked entry is resent even when suppressed: if the
    /// cumulative ack covering it was lost, the duplicate makes the peer
    /// ack again.
    pub(crate) fn take_due(
        &mut self,
        now_ms: u64,
        resend_window_ms: u64,
        include: impl Fn(&SessionPayload) -> bool,
    ) -> Vec<SessionEvent> {
        let head = self.unacked.keys().next().copied();
        let mut due = Vec::new();
        for (seq, entry) in self.unacked.iter_mut() {
            if (entry.suppressed && Some(*seq) != head) || !include(&entry.event.payload) {
                continue;
            }
            if !entry.is_due(now_ms, resend_window_ms) {
                continue;
            }
            if entry.last_sent_at_ms.is_some() {
                tracing::debug!(seq = seq.get(), "resending unacked event");
            }
            entry.last_sent_at_ms = Some(now_ms);
            due.push(entry.event.clone());
        }
        due
    }
}

mod unacked_entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::UnackedEntry;
    use crate::core::Seq1;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<Seq1, UnackedEntry>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<&UnackedEntry> = map.values().collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Seq1, UnackedEntry>, D::Error> {
        let entries: Vec<UnackedEntry> = Vec::deserialize(deserializer)?;
        entries
            .into_iter()
            .map(|entry| {
                let seq = entry.event.seq1().ok_or_else(|| {
                    <D::Error as serde::de::Error>::custom("unacked entry with sequence number 0")
                })?;
                Ok((seq, entry))
            })
            .collect()
    }
}
