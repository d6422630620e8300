use std::time::Duration;

use duplex_session::{
    CounterpartyRef, SessionError, SessionEvent, SessionId, SessionManager, SessionPayload,
    SessionState, SessionStatus,
};

pub const WINDOW: Duration = Duration::from_millis(100);

/// One side of a session driven directly through the manager.
pub struct Peer {
    pub manager: SessionManager,
    pub state: SessionState,
    pub delivered: Vec<SessionPayload>,
}

impl Peer {
    fn from_state(state: SessionState) -> Self {
        Self {
            manager: SessionManager::default(),
            state,
            delivered: Vec::new(),
        }
    }

    pub fn confirmed(session_id: &str, party: &str, initiator: bool) -> Self {
        Self::from_state(SessionState::confirmed(
            SessionId::new(session_id).expect("session id"),
            CounterpartyRef::new(party).expect("counterparty"),
            initiator,
            0,
        ))
    }

    /// A fresh initiator in `CREATED`; it still has to send its `Init`.
    pub fn initiator(session_id: &str, party: &str) -> Self {
        Self::from_state(SessionState::new(
            SessionId::new(session_id).expect("session id"),
            CounterpartyRef::new(party).expect("counterparty"),
            0,
        ))
    }

    /// The initiated side, created by the first frame that reaches it.
    pub fn opened_by(event: &SessionEvent, now: u64) -> Self {
        let manager = SessionManager::default();
        let state = manager
            .process_message_received(None, event, now)
            .expect("new session");
        Self::from_state(state)
    }

    /// The usual pair: `flow` owned by alice, `flow-INITIATED` by bob.
    pub fn pair(flow: &str) -> (Peer, Peer) {
        (
            Peer::confirmed(flow, "O=Bob", true),
            Peer::confirmed(&format!("{flow}-INITIATED"), "O=Alice", false),
        )
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn send(&mut self, payload: SessionPayload, now: u64) -> Result<SessionEvent, SessionError> {
        let (next, event) = self
            .manager
            .process_message_to_send(&self.state, payload, now)?;
        self.state = next;
        Ok(event)
    }

    pub fn flush(&mut self, now: u64) -> Vec<SessionEvent> {
        let (next, events) = self.manager.get_messages_to_send(&self.state, now, WINDOW);
        self.state = next;
        events
    }

    pub fn receive(&mut self, event: &SessionEvent, now: u64) {
        self.state = self
            .manager
            .process_message_received(Some(&self.state), event, now)
            .expect("event addressed to this session");
    }

    pub fn receive_all(&mut self, events: &[SessionEvent], now: u64) {
        for event in events {
            self.receive(event, now);
        }
    }

    /// Consumes every deliverable event; returns how many.
    pub fn consume(&mut self) -> usize {
        let mut count = 0;
        while let Some(event) = self.manager.get_next_received_event(&self.state) {
            let seq = event.seq1().expect("deliverable events carry a sequence");
            self.delivered.push(event.payload.clone());
            self.state = self
                .manager
                .acknowledge_received_event(&self.state, seq)
                .expect("in-order acknowledge");
            count += 1;
        }
        count
    }

    pub fn peer_closed(&self) -> bool {
        self.delivered
            .iter()
            .any(|payload| matches!(payload, SessionPayload::Close))
    }
}
