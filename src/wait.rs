//! Conditions a workflow can suspend on, evaluated against session states.

use std::collections::BTreeMap;

use crate::core::{ErrorCause, SessionId, SessionPayload};
use crate::session::{SessionManager, SessionState, SessionStatus};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitingFor {
    /// A deliverable event on every listed session.
    Data(Vec<SessionId>),
    /// The session has left `CREATED`.
    Confirmed(SessionId),
    /// The session finished its close handshake.
    Closed(SessionId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Pending,
    Failed {
        session_id: SessionId,
        reason: FailReason,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailReason {
    /// No state exists for the session.
    Missing,
    /// The session is in `ERROR`; carries the peer's cause when one arrived.
    Errored(Option<ErrorCause>),
    /// Closed without the awaited event ever arriving.
    EndedEarly,
}

impl WaitingFor {
    pub fn session_ids(&self) -> Vec<&SessionId> {
        match self {
            WaitingFor::Data(ids) => ids.iter().collect(),
            WaitingFor::Confirmed(id) | WaitingFor::Closed(id) => vec![id],
        }
    }

    pub fn evaluate(
        &self,
        manager: &SessionManager,
        states: &BTreeMap<SessionId, SessionState>,
    ) -> WaitOutcome {
        match self {
            WaitingFor::Data(ids) => {
                let ready = manager.get_received_events(states.values(), ids);
                let mut pending = false;
                for id in ids {
                    if ready.iter().any(|(state, _)| state.session_id() == id) {
                        continue;
                    }
                    let Some(state) = states.get(id) else {
                        return failed(id, FailReason::Missing);
                    };
                    match state.status() {
                        SessionStatus::Error => return errored(state),
                        SessionStatus::Closed => return failed(id, FailReason::EndedEarly),
                        // peer closed and everything before its Close was consumed
                        _ if peer_close_consumed(state) => {
                            return failed(id, FailReason::EndedEarly);
                        }
                        _ => pending = true,
                    }
                }
                if pending {
                    WaitOutcome::Pending
                } else {
                    WaitOutcome::Ready
                }
            }
            WaitingFor::Confirmed(id) => match states.get(id).map(SessionState::status) {
                None => failed(id, FailReason::Missing),
                Some(SessionStatus::Created) => WaitOutcome::Pending,
                Some(SessionStatus::Error) => errored(&states[id]),
                Some(_) => WaitOutcome::Ready,
            },
            WaitingFor::Closed(id) => match states.get(id).map(SessionState::status) {
                None => failed(id, FailReason::Missing),
                Some(SessionStatus::Closed) => WaitOutcome::Ready,
                Some(SessionStatus::Error) => errored(&states[id]),
                Some(_) => WaitOutcome::Pending,
            },
        }
    }
}

fn peer_close_consumed(state: &SessionState) -> bool {
    let receive = state.receive_state();
    receive
        .peer_close_seq()
        .is_some_and(|close| receive.last_delivered().covers(close))
}

fn failed(session_id: &SessionId, reason: FailReason) -> WaitOutcome {
    WaitOutcome::Failed {
        session_id: session_id.clone(),
        reason,
    }
}

fn errored(state: &SessionState) -> WaitOutcome {
    let peer_cause = state
        .receive_state()
        .buffered()
        .values()
        .find_map(|event| match &event.payload {
            SessionPayload::Error(cause) => Some(cause.clone()),
            _ => None,
        });
    failed(state.session_id(), FailReason::Errored(peer_cause))
}
