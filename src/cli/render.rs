//! Human output for CLI commands. Pure formatting.

use crate::core::{SessionEvent, SessionId, SessionPayload};
use crate::session::SessionState;

pub fn render_list(states: &[SessionState]) -> String {
    if states.is_empty() {
        return "no sessions".into();
    }
    let mut out = format!(
        "{:<40} {:<18} {:<6} {:>7} {:>8}  {}\n",
        "SESSION", "STATUS", "ROLE", "UNACKED", "BUFFERED", "COUNTERPARTY"
    );
    for state in states {
        out.push_str(&format!(
            "{:<40} {:<18} {:<6} {:>7} {:>8}  {}\n",
            state.session_id(),
            state.status(),
            role(state),
            state.send_state().unacked().len(),
            state.receive_state().buffered().len(),
            counterparty(state),
        ));
    }
    out.truncate(out.trim_end().len());
    out
}

pub fn render_show(state: &SessionState) -> String {
    let send = state.send_state();
    let receive = state.receive_state();
    let mut out = String::new();
    out.push_str(&format!("Session: {}\n", state.session_id()));
    out.push_str(&format!("  Status: {}\n", state.status()));
    out.push_str(&format!("  Role: {}\n", role(state)));
    out.push_str(&format!("  Counterparty: {}\n", counterparty(state)));
    out.push_str(&format!("  Created: {} ms\n", state.created_at_ms()));
    out.push_str(&format!(
        "  Last inbound: {} ms\n",
        state.last_received_at_ms()
    ));

    out.push_str("\nSend:\n");
    out.push_str(&format!("  Next sequence: {}\n", send.next_seq()));
    if let Some(close) = send.local_close_seq() {
        out.push_str(&format!("  Close sent at: {close}\n"));
    }
    for (seq, entry) in send.unacked() {
        let sent = match entry.last_sent_at_ms {
            Some(at) => format!("last sent {at} ms"),
            None => "never sent".into(),
        };
        let suppressed = if entry.suppressed { ", held by peer" } else { "" };
        out.push_str(&format!(
            "  #{seq} {} ({sent}{suppressed})\n",
            describe(&entry.event)
        ));
    }

    out.push_str("\nReceive:\n");
    out.push_str(&format!(
        "  Last delivered: {}\n",
        receive.last_delivered()
    ));
    if let Some(close) = receive.peer_close_seq() {
        out.push_str(&format!("  Peer closed at: {close}\n"));
    }
    if let Some(gap) = receive.first_gap() {
        out.push_str(&format!("  Waiting on: {gap}\n"));
    }
    for (seq, event) in receive.buffered() {
        out.push_str(&format!("  #{seq} {}\n", describe(event)));
    }
    out.truncate(out.trim_end().len());
    out
}

pub fn render_pending(states: &[SessionState]) -> String {
    if states.is_empty() {
        return "no undelivered events".into();
    }
    let mut out = String::new();
    for state in states {
        out.push_str(&format!("{} [{}]\n", state.session_id(), state.status()));
        for (seq, event) in state.receive_state().buffered() {
            out.push_str(&format!("  #{seq} {}\n", describe(event)));
        }
    }
    out.truncate(out.trim_end().len());
    out
}

pub fn render_reaped(ids: &[SessionId]) -> String {
    if ids.is_empty() {
        return "nothing to reap".into();
    }
    let mut out = format!("reaped {} session(s):\n", ids.len());
    for id in ids {
        out.push_str(&format!("  {id}\n"));
    }
    out.truncate(out.trim_end().len());
    out
}

fn role(state: &SessionState) -> &'static str {
    if state.is_initiator() { "init" } else { "peer" }
}

fn counterparty(state: &SessionState) -> &str {
    state
        .counterparty()
        .map(|cp| cp.party.as_str())
        .unwrap_or("-")
}

fn describe(event: &SessionEvent) -> String {
    match &event.payload {
        SessionPayload::Init(init) => format!("init protocol={}", init.protocol),
        SessionPayload::Data(bytes) => format!("data {} bytes", bytes.len()),
        SessionPayload::Ack => "ack".into(),
        SessionPayload::Close => "close".into(),
        SessionPayload::Error(cause) => format!("error {cause}"),
    }
}
