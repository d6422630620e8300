//! Store-backed driver around [`SessionManager`].
//!
//! Each call is a read, a pure manager step and a compare-and-swap write.
//! A conflicting write means another writer got there first; the step is
//! rerun against a fresh read, never merged.

use crate::config::{Config, SessionConfig};
use crate::core::{
    CounterpartyRef, ErrorCause, ErrorCode, InitPayload, Seq1, SessionEvent, SessionId,
    SessionPayload,
};
use crate::error::Error;
use crate::session::{SessionError, SessionManager, SessionState};
use crate::store::{SessionStore, Version};
use crate::wire;

pub struct SessionRuntime<S> {
    manager: SessionManager,
    store: S,
    config: SessionConfig,
}

impl<S: SessionStore> SessionRuntime<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self::with_parts(
            SessionManager::new(config.limits.clone()),
            store,
            config.session.clone(),
        )
    }

    pub fn with_parts(manager: SessionManager, store: S, config: SessionConfig) -> Self {
        Self {
            manager,
            store,
            config,
        }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self, session_id: &SessionId) -> Result<Option<SessionState>, Error> {
        Ok(self.store.get(session_id)?.map(|record| record.value))
    }

    /// Every stored session, in id order.
    pub fn sessions(&self) -> Result<Vec<SessionState>, Error> {
        let mut out = Vec::new();
        for session_id in self.store.list()? {
            if let Some(record) = self.store.get(&session_id)? {
                out.push(record.value);
            }
        }
        Ok(out)
    }

    /// Opens a fresh session under a generated id and queues its `Init`.
    pub fn initiate(
        &self,
        counterparty: CounterpartyRef,
        init: InitPayload,
        now_ms: u64,
    ) -> Result<(SessionId, SessionEvent), Error> {
        self.initiate_with_id(SessionId::generate(), counterparty, init, now_ms)
    }

    pub fn initiate_with_id(
        &self,
        session_id: SessionId,
        counterparty: CounterpartyRef,
        init: InitPayload,
        now_ms: u64,
    ) -> Result<(SessionId, SessionEvent), Error> {
        let fresh = SessionState::new(session_id.clone(), counterparty, now_ms);
        let (state, event) =
            self.manager
                .process_message_to_send(&fresh, SessionPayload::Init(init), now_ms)?;
        self.store.compare_and_swap(None, &state)?;
        tracing::info!(session_id = %session_id, "session initiated");
        Ok((session_id, event))
    }

    pub fn send(
        &self,
        session_id: &SessionId,
        payload: SessionPayload,
        now_ms: u64,
    ) -> Result<SessionEvent, Error> {
        self.modify(session_id, |state| {
            let state = state.ok_or_else(|| unknown(session_id))?;
            let (next, event) =
                self.manager
                    .process_message_to_send(state, payload.clone(), now_ms)?;
            Ok((Some(next), event))
        })
    }

    /// Absorbs an event from the peer into the matching local session.
    pub fn receive(&self, event: &SessionEvent, now_ms: u64) -> Result<SessionState, Error> {
        let local_id = event.session_id.counterparty();
        self.modify(&local_id, |state| {
            let next = self
                .manager
                .process_message_received(state, event, now_ms)?;
            Ok((Some(next.clone()), next))
        })
    }

    /// Decodes then absorbs one wire frame.
    pub fn receive_bytes(&self, bytes: &[u8], now_ms: u64) -> Result<SessionState, Error> {
        let event = wire::decode_event(bytes, self.manager.limits())?;
        self.receive(&event, now_ms)
    }

    /// Everything due on the wire across all sessions.
    pub fn outgoing(&self, now_ms: u64) -> Result<Vec<SessionEvent>, Error> {
        let window = self.config.resend_window();
        let mut out = Vec::new();
        for session_id in self.store.list()? {
            let events = self.modify(&session_id, |state| {
                let Some(state) = state else {
                    return Ok((None, Vec::new()));
                };
                let (next, events) = self.manager.get_messages_to_send(state, now_ms, window);
                if events.is_empty() {
                    return Ok((None, events));
                }
                Ok((Some(next), events))
            })?;
            out.extend(events);
        }
        Ok(out)
    }

    /// Next deliverable event of each listed session that has one.
    pub fn next_received(
        &self,
        session_ids: &[SessionId],
    ) -> Result<Vec<(SessionId, SessionEvent)>, Error> {
        let mut states = Vec::with_capacity(session_ids.len());
        for session_id in session_ids {
            if let Some(record) = self.store.get(session_id)? {
                states.push(record.value);
            }
        }
        Ok(self
            .manager
            .get_received_events(&states, session_ids)
            .into_iter()
            .map(|(state, event)| (state.session_id().clone(), event.clone()))
            .collect())
    }

    pub fn acknowledge(&self, session_id: &SessionId, seq: Seq1) -> Result<SessionState, Error> {
        self.modify(session_id, |state| {
            let state = state.ok_or_else(|| unknown(session_id))?;
            let next = self.manager.acknowledge_received_event(state, seq)?;
            Ok((Some(next.clone()), next))
        })
    }

    /// Fails every live session that has heard nothing from its peer for
    /// longer than the heartbeat timeout. Returns the ids it failed.
    pub fn reap_expired(&self, now_ms: u64) -> Result<Vec<SessionId>, Error> {
        let timeout_ms = self.config.heartbeat_timeout_ms;
        let mut reaped = Vec::new();
        for session_id in self.store.list()? {
            let failed = self.modify(&session_id, |state| {
                let Some(state) = state else {
                    return Ok((None, false));
                };
                if !is_expired(state, now_ms, timeout_ms) {
                    return Ok((None, false));
                }
                let silent_ms = now_ms.saturating_sub(state.last_received_at_ms());
                let cause = ErrorCause::new(
                    ErrorCode::HeartbeatTimeout,
                    format!("no traffic from peer for {silent_ms}ms"),
                );
                let (next, _) = self.manager.process_message_to_send(
                    state,
                    SessionPayload::Error(cause),
                    now_ms,
                )?;
                Ok((Some(next), true))
            })?;
            if failed {
                tracing::warn!(session_id = %session_id, "session reaped after heartbeat timeout");
                reaped.push(session_id);
            }
        }
        Ok(reaped)
    }

    /// Read, step, compare-and-swap; rerun the step on conflict. A step
    /// returning `None` for the state skips the write.
    fn modify<T>(
        &self,
        session_id: &SessionId,
        mut step: impl FnMut(Option<&SessionState>) -> Result<(Option<SessionState>, T), Error>,
    ) -> Result<T, Error> {
        let mut conflicts = 0u32;
        loop {
            let current = self.store.get(session_id)?;
            let expected: Option<Version> = current.as_ref().map(|record| record.version);
            let (next, out) = step(current.as_ref().map(|record| &record.value))?;
            let Some(next) = next else {
                return Ok(out);
            };
            match self.store.compare_and_swap(expected, &next) {
                Ok(_) => return Ok(out),
                Err(err) if err.is_conflict() => {
                    conflicts += 1;
                    if conflicts > self.config.max_cas_retries {
                        return Err(Error::ContentionExhausted {
                            session_id: session_id.clone(),
                            attempts: conflicts,
                        });
                    }
                    tracing::debug!(session_id = %session_id, conflicts, "store conflict, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn is_expired(state: &SessionState, now_ms: u64, timeout_ms: u64) -> bool {
    !state.status().is_terminal() && now_ms.saturating_sub(state.last_received_at_ms()) > timeout_ms
}

fn unknown(session_id: &SessionId) -> Error {
    SessionError::UnknownSession {
        session_id: session_id.clone(),
    }
    .into()
}
