//! Stateless session manager.
//!
//! Every operation takes the current [`SessionState`] by reference and
//! returns a new one. Nothing here performs I/O, takes locks or reads a
//! clock: time is always supplied by the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::error::SessionError;
use super::receive::{DeliveryError, IngestDecision};
use super::state::{SessionState, SessionStatus};
use crate::core::{
    Direction, ErrorCause, ErrorCode, Limits, Seq1, SessionEvent, SessionId, SessionPayload,
};

#[derive(Clone, Debug, Default)]
pub struct SessionManager {
    limits: Limits,
}

impl SessionManager {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Queues a local payload.
    ///
    /// The returned event is already in the unacked set; it reaches the wire
    /// through [`SessionManager::get_messages_to_send`]. A `Close` issued over
    /// a receive gap fails the session and returns the queued `Error` instead.
    pub fn process_message_to_send(
        &self,
        state: &SessionState,
        payload: SessionPayload,
        now_ms: u64,
    ) -> Result<(SessionState, SessionEvent), SessionError> {
        self.validate_send(state, &payload)?;

        let mut next = state.clone();
        let session_id = next.session_id().clone();
        let receive_gap = next.receive_state().first_gap();
        let event = match payload {
            SessionPayload::Close => match receive_gap {
                Some(missing) => {
                    let cause = ErrorCause::new(
                        ErrorCode::CloseWithGap,
                        format!("cannot close: sequence {missing} never arrived"),
                    );
                    self.fail(&mut next, cause, now_ms)
                }
                None => {
                    let event = next
                        .send_mut()
                        .enqueue(session_id, SessionPayload::Close, now_ms);
                    if next.receive_state().peer_close_seq().is_some() {
                        next.advance(SessionStatus::WaitForFinalAck);
                    } else {
                        next.advance(SessionStatus::Closing);
                    }
                    event
                }
            },
            SessionPayload::Error(cause) => self.fail(&mut next, cause, now_ms),
            payload => {
                let event = next.send_mut().enqueue(session_id, payload, now_ms);
                tracing::trace!(
                    session_id = %next.session_id(),
                    seq = event.sequence_num.get(),
                    kind = event.payload.kind(),
                    "queued outbound event"
                );
                event
            }
        };
        Ok((next, event))
    }

    /// Absorbs one inbound event.
    ///
    /// `state` is the receiver's own state, looked up with
    /// `event.session_id.counterparty()`; `None` means no state exists yet.
    pub fn process_message_received(
        &self,
        state: Option<&SessionState>,
        event: &SessionEvent,
        now_ms: u64,
    ) -> Result<SessionState, SessionError> {
        let local_id = event.session_id.counterparty();
        let Some(state) = state else {
            return Ok(self.open_from_peer(local_id, event, now_ms));
        };
        if state.session_id() != &local_id {
            return Err(SessionError::SessionMismatch {
                expected: state.session_id().clone(),
                got: event.session_id.clone(),
            });
        }

        let mut next = state.clone();
        next.touch(now_ms);
        self.apply_peer_ack(&mut next, event, now_ms);
        self.absorb_payload(&mut next, event, now_ms);
        Ok(next)
    }

    /// Events due on the wire at `now_ms`, with fresh ack fields.
    ///
    /// An initiator holds everything queued behind its Init until the peer
    /// cumulatively acks it. Falls back to a standalone `Ack` when nothing else is due but the
    /// peer is owed one.
    pub fn get_messages_to_send(
        &self,
        state: &SessionState,
        now_ms: u64,
        resend_window: Duration,
    ) -> (SessionState, Vec<SessionEvent>) {
        let mut next = state.clone();
        let window_ms = u64::try_from(resend_window.as_millis()).unwrap_or(u64::MAX);
        let errors_only = next.status().is_terminal();
        // nothing may overtake the Init: the peer has no session until it lands
        let init_only =
            next.status() == SessionStatus::Created && next.send_state().awaiting_init_ack();
        let mut events = next.send_mut().take_due(now_ms, window_ms, |payload| {
            if errors_only {
                matches!(payload, SessionPayload::Error(_))
            } else if init_only {
                matches!(payload, SessionPayload::Init(_))
            } else {
                true
            }
        });

        let (cumulative, selective) = next.receive_state().ack_fields();
        for event in &mut events {
            event.received_sequence_num = cumulative;
            event.out_of_order_sequence_nums = selective.clone();
        }

        let ack_owed = next.receive_mut().take_pending_ack();
        if events.is_empty() && ack_owed {
            events.push(SessionEvent {
                session_id: next.session_id().clone(),
                direction: Direction::Outbound,
                timestamp_ms: now_ms,
                sequence_num: next.send_state().last_sent_seq(),
                received_sequence_num: cumulative,
                out_of_order_sequence_nums: selective,
                payload: SessionPayload::Ack,
            });
        }
        (next, events)
    }

    /// The next event the consumer may take. Never yields in `ERROR`.
    pub fn get_next_received_event<'a>(&self, state: &'a SessionState) -> Option<&'a SessionEvent> {
        if state.status() == SessionStatus::Error {
            return None;
        }
        state.receive_state().next_deliverable()
    }

    /// Next deliverable event for each listed session that has one.
    pub fn get_received_events<'a>(
        &self,
        states: impl IntoIterator<Item = &'a SessionState>,
        session_ids: &[SessionId],
    ) -> Vec<(&'a SessionState, &'a SessionEvent)> {
        let wanted: BTreeSet<&SessionId> = session_ids.iter().collect();
        states
            .into_iter()
            .filter(|state| wanted.contains(state.session_id()))
            .filter_map(|state| {
                self.get_next_received_event(state)
                    .map(|event| (state, event))
            })
            .collect()
    }

    /// Marks `seq` as consumed. It must be exactly the next deliverable event.
    pub fn acknowledge_received_event(
        &self,
        state: &SessionState,
        seq: Seq1,
    ) -> Result<SessionState, SessionError> {
        if state.status() == SessionStatus::Error {
            return Err(SessionError::InvalidStatus {
                session_id: state.session_id().clone(),
                status: state.status(),
                action: "acknowledge a received event",
            });
        }

        let mut next = state.clone();
        let delivered = next.receive_mut().deliver(seq).map_err(|err| match err {
            DeliveryError::OutOfOrder { expected, got } => SessionError::AckOutOfOrder {
                session_id: state.session_id().clone(),
                expected,
                got,
            },
            DeliveryError::NotReceived { seq } => SessionError::NotReceived {
                session_id: state.session_id().clone(),
                seq,
            },
        })?;
        tracing::trace!(session_id = %next.session_id(), seq = seq.get(), "event consumed");

        if matches!(delivered.payload, SessionPayload::Init(_)) && !next.is_initiator() {
            next.advance(SessionStatus::Confirmed);
        }
        Ok(next)
    }

    /// Applies `acks` in order across many sessions. Either every ack
    /// succeeds or the error is returned and nothing changes.
    pub fn acknowledge_received_events(
        &self,
        states: &BTreeMap<SessionId, SessionState>,
        acks: &[(SessionId, Seq1)],
    ) -> Result<BTreeMap<SessionId, SessionState>, SessionError> {
        let mut updated: BTreeMap<SessionId, SessionState> = BTreeMap::new();
        for (session_id, seq) in acks {
            let next = {
                let current = updated
                    .get(session_id)
                    .or_else(|| states.get(session_id))
                    .ok_or_else(|| SessionError::UnknownSession {
                        session_id: session_id.clone(),
                    })?;
                self.acknowledge_received_event(current, *seq)?
            };
            updated.insert(session_id.clone(), next);
        }

        let mut out = states.clone();
        out.extend(updated);
        Ok(out)
    }

    fn validate_send(
        &self,
        state: &SessionState,
        payload: &SessionPayload,
    ) -> Result<(), SessionError> {
        let status = state.status();
        let invalid = |action: &'static str| SessionError::InvalidStatus {
            session_id: state.session_id().clone(),
            status,
            action,
        };
        match payload {
            SessionPayload::Ack => Err(SessionError::AckNotSendable),
            SessionPayload::Init(_) => {
                if !state.is_initiator() {
                    return Err(SessionError::InitByInitiated {
                        session_id: state.session_id().clone(),
                    });
                }
                if state.send_state().next_seq() != Seq1::ONE {
                    return Err(SessionError::InitAfterStart {
                        session_id: state.session_id().clone(),
                    });
                }
                if status != SessionStatus::Created {
                    return Err(invalid("send init"));
                }
                Ok(())
            }
            SessionPayload::Data(bytes) => {
                if bytes.len() > self.limits.max_data_bytes {
                    return Err(SessionError::DataTooLarge {
                        len: bytes.len(),
                        max: self.limits.max_data_bytes,
                    });
                }
                match status {
                    SessionStatus::Created | SessionStatus::Confirmed => Ok(()),
                    _ => Err(invalid("send data")),
                }
            }
            SessionPayload::Close => {
                if status == SessionStatus::Error {
                    return Err(invalid("send close"));
                }
                if state.send_state().local_close_seq().is_some() {
                    return Err(SessionError::CloseAlreadySent {
                        session_id: state.session_id().clone(),
                    });
                }
                match status {
                    SessionStatus::Created | SessionStatus::Confirmed | SessionStatus::Closing => {
                        Ok(())
                    }
                    _ => Err(invalid("send close")),
                }
            }
            SessionPayload::Error(_) => {
                if status.is_terminal() {
                    return Err(invalid("send error"));
                }
                Ok(())
            }
        }
    }

    /// Queues an `Error` for the peer and moves to `ERROR`.
    fn fail(&self, state: &mut SessionState, cause: ErrorCause, now_ms: u64) -> SessionEvent {
        let cause = self.bounded_cause(cause);
        tracing::warn!(
            session_id = %state.session_id(),
            code = %cause.code,
            message = %cause.message,
            "failing session"
        );
        let session_id = state.session_id().clone();
        let event = state
            .send_mut()
            .enqueue(session_id, SessionPayload::Error(cause), now_ms);
        state.advance(SessionStatus::Error);
        event
    }

    fn bounded_cause(&self, mut cause: ErrorCause) -> ErrorCause {
        let max = self.limits.max_error_message_bytes;
        if cause.message.len() > max {
            let mut cut = max;
            while !cause.message.is_char_boundary(cut) {
                cut -= 1;
            }
            cause.message.truncate(cut);
        }
        cause
    }

    fn open_from_peer(&self, local_id: SessionId, event: &SessionEvent, now_ms: u64) -> SessionState {
        match &event.payload {
            SessionPayload::Init(init) => {
                let mut state = SessionState::initiated(local_id, init.initiator.clone(), now_ms);
                tracing::info!(
                    session_id = %state.session_id(),
                    protocol = %init.protocol,
                    "session initiated by peer"
                );
                self.apply_peer_ack(&mut state, event, now_ms);
                self.absorb_payload(&mut state, event, now_ms);
                state
            }
            payload => {
                let mut state = SessionState::orphaned(local_id, now_ms);
                tracing::warn!(
                    session_id = %state.session_id(),
                    kind = payload.kind(),
                    "event for unknown session"
                );
                // a stray Ack or Error is not payload to hold or acknowledge
                let kept = matches!(payload, SessionPayload::Data(_) | SessionPayload::Close);
                if let Some(seq) = event.seq1().filter(|_| kept) {
                    let mut inbound = event.clone();
                    inbound.direction = Direction::Inbound;
                    state
                        .receive_mut()
                        .ingest(seq, inbound, self.limits.max_buffered_events);
                }
                if kept {
                    let cause = ErrorCause::new(
                        ErrorCode::SessionMissing,
                        format!("no session {}", state.session_id()),
                    );
                    self.fail(&mut state, cause, now_ms);
                }
                state
            }
        }
    }

    fn apply_peer_ack(&self, state: &mut SessionState, event: &SessionEvent, now_ms: u64) {
        let outcome = state.send_mut().apply_peer_ack(
            event.received_sequence_num,
            &event.out_of_order_sequence_nums,
        );
        match outcome {
            Ok(outcome) => {
                if !outcome.removed.is_empty() || !outcome.suppressed.is_empty() {
                    tracing::trace!(
                        session_id = %state.session_id(),
                        removed = outcome.removed.len(),
                        suppressed = outcome.suppressed.len(),
                        "peer ack applied"
                    );
                }
                let send = state.send_state();
                match state.status() {
                    SessionStatus::Created
                        if state.is_initiator() && send.is_acked(Seq1::ONE) =>
                    {
                        state.advance(SessionStatus::Confirmed);
                    }
                    SessionStatus::WaitForFinalAck
                        if send.local_close_seq().is_some_and(|seq| send.is_acked(seq)) =>
                    {
                        state.advance(SessionStatus::Closed);
                    }
                    _ => {}
                }
            }
            Err(violation) if state.status().is_terminal() => {
                tracing::debug!(
                    session_id = %state.session_id(),
                    %violation,
                    "ignoring bad ack on finished session"
                );
            }
            Err(violation) => {
                let cause = ErrorCause::new(ErrorCode::AckBeyondSent, violation.to_string());
                self.fail(state, cause, now_ms);
            }
        }
    }

    fn absorb_payload(&self, state: &mut SessionState, event: &SessionEvent, now_ms: u64) {
        if event.payload.is_ack() {
            return;
        }
        let Some(seq) = event.seq1() else {
            if !state.status().is_terminal() {
                let cause = ErrorCause::new(
                    ErrorCode::MissingSequence,
                    format!("{} event without a sequence number", event.payload.kind()),
                );
                self.fail(state, cause, now_ms);
            }
            return;
        };

        let max_buffered = self.limits.max_buffered_events;
        let mut inbound = event.clone();
        inbound.direction = Direction::Inbound;

        if state.receive_state().is_duplicate(seq) {
            state.receive_mut().ingest(seq, inbound, max_buffered);
            tracing::debug!(session_id = %state.session_id(), seq = seq.get(), "duplicate event");
            return;
        }

        let status = state.status();
        if status.is_terminal() {
            let decision = state.receive_mut().ingest(seq, inbound, max_buffered);
            if status == SessionStatus::Closed {
                tracing::warn!(
                    session_id = %state.session_id(),
                    seq = seq.get(),
                    kind = event.payload.kind(),
                    "event after close"
                );
            }
            if let IngestDecision::Overflow { limit } = decision {
                tracing::debug!(session_id = %state.session_id(), limit, "dropping event on finished session");
            }
            return;
        }

        let violation = self.check_inbound(state, seq, &event.payload);
        if let IngestDecision::Overflow { limit } =
            state.receive_mut().ingest(seq, inbound, max_buffered)
        {
            let cause = ErrorCause::new(
                ErrorCode::ReceiveBufferOverflow,
                format!("more than {limit} undelivered events"),
            );
            self.fail(state, cause, now_ms);
            return;
        }
        if let Some(cause) = violation {
            self.fail(state, cause, now_ms);
            return;
        }

        match &event.payload {
            SessionPayload::Init(_) | SessionPayload::Ack => {}
            SessionPayload::Data(_) => {
                if state.is_initiator() {
                    state.advance(SessionStatus::Confirmed);
                }
            }
            SessionPayload::Close => {
                state.receive_mut().record_peer_close(seq);
                let send = state.send_state();
                match send.local_close_seq() {
                    Some(own) if send.is_acked(own) => state.advance(SessionStatus::Closed),
                    Some(_) => state.advance(SessionStatus::WaitForFinalAck),
                    None => state.advance(SessionStatus::Closing),
                }
            }
            SessionPayload::Error(cause) => {
                tracing::warn!(
                    session_id = %state.session_id(),
                    code = %cause.code,
                    message = %cause.message,
                    "peer failed session"
                );
                state.advance(SessionStatus::Error);
            }
        }
    }

    /// Protocol violations carried by a fresh, non-duplicate inbound event.
    fn check_inbound(
        &self,
        state: &SessionState,
        seq: Seq1,
        payload: &SessionPayload,
    ) -> Option<ErrorCause> {
        let receive = state.receive_state();
        if let Some(close) = receive.peer_close_seq()
            && seq > close
        {
            match payload {
                SessionPayload::Close => {
                    return Some(ErrorCause::new(
                        ErrorCode::DuplicateClose,
                        format!("second close at {seq}, first at {close}"),
                    ));
                }
                SessionPayload::Error(_) => {}
                _ => {
                    return Some(ErrorCause::new(
                        ErrorCode::DataAfterClose,
                        format!("sequence {seq} after close at {close}"),
                    ));
                }
            }
        }

        match payload {
            SessionPayload::Init(_) => {
                let fresh = !state.is_initiator()
                    && seq == Seq1::ONE
                    && state.status() == SessionStatus::Created;
                (!fresh).then(|| {
                    ErrorCause::new(
                        ErrorCode::UnexpectedInit,
                        format!("init at sequence {seq} on an established session"),
                    )
                })
            }
            SessionPayload::Close => receive.first_missing_below(seq).map(|missing| {
                ErrorCause::new(
                    ErrorCode::CloseWithGap,
                    format!("close at {seq} but sequence {missing} never arrived"),
                )
            }),
            _ => None,
        }
    }
}
