//! End-to-end handshakes between two managers over an in-memory link.

use bytes::Bytes;
use duplex_session::{
    CounterpartyRef, ErrorCode, InitPayload, Seq0, SessionPayload, SessionStatus,
};

use crate::fixtures::link::Link;
use crate::fixtures::peer::{Peer, WINDOW};

fn data(s: &'static str) -> SessionPayload {
    SessionPayload::Data(Bytes::from_static(s.as_bytes()))
}

fn window_ms() -> u64 {
    WINDOW.as_millis() as u64
}

#[test]
fn lost_data_is_resent_then_session_closes() {
    let (mut alice, mut bob) = Peer::pair("lossy");

    alice.send(data("one"), 0).unwrap();
    alice.send(data("two"), 0).unwrap();
    let wire = alice.flush(0);
    assert_eq!(wire.len(), 2);

    // first frame lost
    bob.receive(&wire[1], 0);
    assert_eq!(bob.consume(), 0, "nothing deliverable past the gap");
    alice.receive_all(&bob.flush(0), 0);
    assert!(alice.state.send_state().unacked()[&wire[1].seq1().unwrap()].suppressed);

    assert!(alice.flush(window_ms() - 1).is_empty(), "no resend inside the window");
    let resent = alice.flush(window_ms());
    assert_eq!(resent.len(), 1, "only the missing event goes again");
    assert_eq!(resent[0].sequence_num, wire[0].sequence_num);

    bob.receive_all(&resent, window_ms());
    assert_eq!(bob.consume(), 2);
    assert_eq!(bob.delivered, vec![data("one"), data("two")]);

    let now = window_ms() * 2;
    alice.send(SessionPayload::Close, now).unwrap();
    assert_eq!(alice.status(), SessionStatus::Closing);
    bob.receive_all(&alice.flush(now), now);
    bob.consume();
    assert!(bob.peer_closed());
    assert_eq!(bob.status(), SessionStatus::Closing);

    bob.send(SessionPayload::Close, now).unwrap();
    assert_eq!(bob.status(), SessionStatus::WaitForFinalAck);
    alice.receive_all(&bob.flush(now), now);
    alice.consume();
    assert_eq!(alice.status(), SessionStatus::Closed);

    bob.receive_all(&alice.flush(now), now);
    assert_eq!(bob.status(), SessionStatus::Closed);

    assert_eq!(alice.state.send_state().last_sent_seq(), Seq0::new(3));
    assert_eq!(bob.state.send_state().last_sent_seq(), Seq0::new(1));
    assert!(alice.state.send_state().unacked().is_empty());
    assert!(bob.state.send_state().unacked().is_empty());
}

#[test]
fn simultaneous_close_waits_for_final_acks() {
    let (mut alice, mut bob) = Peer::pair("simul");

    alice.send(SessionPayload::Close, 0).unwrap();
    bob.send(SessionPayload::Close, 0).unwrap();
    assert_eq!(alice.status(), SessionStatus::Closing);
    assert_eq!(bob.status(), SessionStatus::Closing);

    let from_alice = alice.flush(0);
    let from_bob = bob.flush(0);
    alice.receive_all(&from_bob, 0);
    bob.receive_all(&from_alice, 0);
    assert_eq!(alice.status(), SessionStatus::WaitForFinalAck);
    assert_eq!(bob.status(), SessionStatus::WaitForFinalAck);

    alice.consume();
    bob.consume();
    let from_alice = alice.flush(1);
    let from_bob = bob.flush(1);
    assert!(from_alice.iter().all(|e| e.payload.is_ack()));
    assert!(from_bob.iter().all(|e| e.payload.is_ack()));
    alice.receive_all(&from_bob, 1);
    bob.receive_all(&from_alice, 1);

    assert_eq!(alice.status(), SessionStatus::Closed);
    assert_eq!(bob.status(), SessionStatus::Closed);
}

#[test]
fn close_over_a_gap_fails_both_sides() {
    let (mut alice, mut bob) = Peer::pair("gap");

    alice.send(data("one"), 0).unwrap();
    alice.send(data("two"), 0).unwrap();
    let wire = alice.flush(0);
    bob.receive(&wire[1], 0);

    let reply = bob.send(SessionPayload::Close, 0).unwrap();
    assert!(matches!(
        &reply.payload,
        SessionPayload::Error(cause) if cause.code == ErrorCode::CloseWithGap
    ));
    assert_eq!(bob.status(), SessionStatus::Error);

    let from_bob = bob.flush(0);
    assert!(
        from_bob
            .iter()
            .all(|e| matches!(e.payload, SessionPayload::Error(_) | SessionPayload::Ack))
    );
    alice.receive_all(&from_bob, 0);
    assert_eq!(alice.status(), SessionStatus::Error);
    assert_eq!(bob.status(), SessionStatus::Error);
    assert!(alice.manager.get_next_received_event(&alice.state).is_none());
}

#[test]
fn faulty_link_still_delivers_everything_once() {
    const MESSAGES: usize = 12;

    for seed in [3, 17, 42, 1009, 65_537] {
        let (mut alice, mut bob) = Peer::pair(&format!("chaos-{seed}"));
        let mut to_bob = Link::faulty(seed, 25, 15, 20);
        let mut to_alice = Link::faulty(seed.wrapping_mul(31), 25, 15, 20);

        let expected: Vec<SessionPayload> = (0..MESSAGES)
            .map(|i| SessionPayload::Data(Bytes::from(format!("msg-{i}"))))
            .collect();
        for payload in &expected {
            alice.send(payload.clone(), 0).unwrap();
        }

        let mut now = 0;
        for _ in 0..500 {
            if alice.status() == SessionStatus::Closed && bob.status() == SessionStatus::Closed {
                break;
            }
            now += window_ms();
            // a Close overtaking data would be a gap violation; close once drained
            let send = alice.state.send_state();
            if send.unacked().is_empty() && send.local_close_seq().is_none() {
                alice.send(SessionPayload::Close, now).unwrap();
            }
            let frames = to_bob.transmit(alice.flush(now));
            bob.receive_all(&frames, now);
            bob.consume();
            if bob.peer_closed() && bob.state.send_state().local_close_seq().is_none() {
                bob.send(SessionPayload::Close, now).unwrap();
            }

            let frames = to_alice.transmit(bob.flush(now));
            alice.receive_all(&frames, now);
            alice.consume();
        }

        assert_eq!(alice.status(), SessionStatus::Closed, "seed {seed}");
        assert_eq!(bob.status(), SessionStatus::Closed, "seed {seed}");
        let mut bob_saw = bob.delivered.clone();
        assert_eq!(bob_saw.pop(), Some(SessionPayload::Close), "seed {seed}");
        assert_eq!(bob_saw, expected, "seed {seed}");
        assert_eq!(alice.delivered, vec![SessionPayload::Close], "seed {seed}");
    }
}

#[test]
fn handshake_over_a_faulty_link_confirms_both_sides() {
    const MESSAGES: usize = 8;

    for seed in [5, 23, 97, 4242, 77_777] {
        let flow = format!("handshake-{seed}");
        let mut alice = Peer::initiator(&flow, "O=Bob");
        let mut bob: Option<Peer> = None;
        let mut to_bob = Link::faulty(seed, 25, 15, 20);
        let mut to_alice = Link::faulty(seed.wrapping_mul(31), 25, 15, 20);

        let init = InitPayload::new("chaos", CounterpartyRef::new("O=Alice").unwrap());
        alice.send(SessionPayload::Init(init), 0).unwrap();
        let expected: Vec<SessionPayload> = (0..MESSAGES)
            .map(|i| SessionPayload::Data(Bytes::from(format!("msg-{i}"))))
            .collect();
        // queued while still CREATED, before the peer knows the session
        for payload in &expected {
            alice.send(payload.clone(), 0).unwrap();
        }

        let mut now = 0;
        for _ in 0..500 {
            now += window_ms();
            let frames = to_bob.transmit(alice.flush(now));
            for frame in &frames {
                if let Some(bob) = bob.as_mut() {
                    bob.receive(frame, now);
                } else {
                    bob = Some(Peer::opened_by(frame, now));
                }
            }
            let Some(bob) = bob.as_mut() else {
                continue;
            };
            assert_ne!(bob.status(), SessionStatus::Error, "seed {seed}");
            bob.consume();
            let frames = to_alice.transmit(bob.flush(now));
            alice.receive_all(&frames, now);
            if alice.state.send_state().unacked().is_empty() && bob.delivered.len() > MESSAGES {
                break;
            }
        }

        let bob = bob.unwrap_or_else(|| panic!("seed {seed}: nothing reached bob"));
        assert_eq!(alice.status(), SessionStatus::Confirmed, "seed {seed}");
        assert_eq!(bob.status(), SessionStatus::Confirmed, "seed {seed}");
        assert!(matches!(bob.delivered[0], SessionPayload::Init(_)), "seed {seed}");
        assert_eq!(bob.delivered[1..], expected[..], "seed {seed}");
        assert!(alice.state.send_state().unacked().is_empty(), "seed {seed}");
        assert!(alice.delivered.is_empty(), "seed {seed}");
    }
}
