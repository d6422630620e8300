//! Store-backed runtimes talking over encoded frames.

use bytes::Bytes;
use duplex_session::config::Config;
use duplex_session::wire::encode_event;
use duplex_session::{
    CounterpartyRef, Error, FileSessionStore, InitPayload, SessionError, SessionId,
    SessionPayload, SessionRuntime, SessionStatus, SessionStore,
};

type FileRuntime = SessionRuntime<FileSessionStore>;

fn open(dir: &std::path::Path) -> FileRuntime {
    SessionRuntime::new(
        FileSessionStore::open(dir).expect("open store"),
        &Config::default(),
    )
}

/// Moves every due frame from `from` to `to` through the codec.
fn pump(from: &FileRuntime, to: &FileRuntime, now: u64) -> usize {
    let events = from.outgoing(now).expect("outgoing");
    for event in &events {
        let frame = encode_event(event).expect("encode");
        to.receive_bytes(&frame, now).expect("receive");
    }
    events.len()
}

/// Consumes everything deliverable on `session_id`.
fn drain(rt: &FileRuntime, session_id: &SessionId) -> Vec<SessionPayload> {
    let mut out = Vec::new();
    loop {
        let ready = rt
            .next_received(std::slice::from_ref(session_id))
            .expect("next received");
        let Some((_, event)) = ready.into_iter().next() else {
            return out;
        };
        let seq = event.seq1().expect("sequenced");
        rt.acknowledge(session_id, seq).expect("acknowledge");
        out.push(event.payload);
    }
}

#[test]
fn full_session_lifecycle_survives_reopen() {
    let alice_dir = tempfile::tempdir().expect("tempdir");
    let bob_dir = tempfile::tempdir().expect("tempdir");
    let alice = open(alice_dir.path());
    let bob = open(bob_dir.path());

    let flow = SessionId::new("settlement-7").unwrap();
    let init = InitPayload::new("settlement", CounterpartyRef::new("O=Alice").unwrap());
    alice
        .initiate_with_id(flow.clone(), CounterpartyRef::new("O=Bob").unwrap(), init, 0)
        .unwrap();
    alice
        .send(&flow, SessionPayload::Data(Bytes::from_static(b"leg-1")), 0)
        .unwrap();

    // data queued behind the Init stays home until bob has the session
    assert_eq!(pump(&alice, &bob, 1), 1);
    let bob_id = flow.counterparty();
    let got = drain(&bob, &bob_id);
    assert!(matches!(got[..], [SessionPayload::Init(_)]));
    assert_eq!(
        bob.session(&bob_id).unwrap().unwrap().status(),
        SessionStatus::Confirmed
    );

    pump(&bob, &alice, 2);
    assert_eq!(
        alice.session(&flow).unwrap().unwrap().status(),
        SessionStatus::Confirmed
    );
    assert_eq!(pump(&alice, &bob, 2), 1);
    assert_eq!(
        drain(&bob, &bob_id),
        vec![SessionPayload::Data(Bytes::from_static(b"leg-1"))]
    );
    pump(&bob, &alice, 2);

    // process restart: state comes back from disk
    drop(alice);
    let alice = open(alice_dir.path());
    assert!(
        alice
            .session(&flow)
            .unwrap()
            .unwrap()
            .send_state()
            .unacked()
            .is_empty()
    );

    alice.send(&flow, SessionPayload::Close, 3).unwrap();
    pump(&alice, &bob, 3);
    assert_eq!(drain(&bob, &bob_id), vec![SessionPayload::Close]);
    bob.send(&bob_id, SessionPayload::Close, 4).unwrap();
    pump(&bob, &alice, 4);
    assert_eq!(drain(&alice, &flow), vec![SessionPayload::Close]);
    pump(&alice, &bob, 5);

    assert_eq!(
        alice.session(&flow).unwrap().unwrap().status(),
        SessionStatus::Closed
    );
    assert_eq!(
        bob.session(&bob_id).unwrap().unwrap().status(),
        SessionStatus::Closed
    );
    assert_eq!(pump(&alice, &bob, 6), 0);
    assert_eq!(pump(&bob, &alice, 6), 0);
}

#[test]
fn stray_data_leaves_an_orphaned_error_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bob = open(dir.path());

    let stray = duplex_session::SessionManager::default();
    let ghost = duplex_session::SessionState::confirmed(
        SessionId::new("ghost").unwrap(),
        CounterpartyRef::new("O=Bob").unwrap(),
        true,
        0,
    );
    let (_, event) = stray
        .process_message_to_send(&ghost, SessionPayload::Data(Bytes::from_static(b"?")), 0)
        .unwrap();

    let state = bob.receive(&event, 0).unwrap();
    assert_eq!(state.status(), SessionStatus::Error);
    assert!(state.counterparty().is_none());
    assert_eq!(state.receive_state().buffered().len(), 1);
    assert_eq!(bob.store().list().unwrap(), vec![SessionId::new("ghost-INITIATED").unwrap()]);

    let err = bob
        .acknowledge(state.session_id(), duplex_session::Seq1::ONE)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Session(SessionError::InvalidStatus { .. })
    ));
}

#[test]
fn reaper_persists_the_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rt = open(dir.path());
    let timeout = rt.config().heartbeat_timeout_ms;
    let (id, _) = rt
        .initiate(
            CounterpartyRef::new("O=Bob").unwrap(),
            InitPayload::new("ping", CounterpartyRef::new("O=Alice").unwrap()),
            0,
        )
        .unwrap();

    assert_eq!(rt.reap_expired(timeout + 1).unwrap(), vec![id.clone()]);
    let reopened = open(dir.path());
    assert_eq!(
        reopened.session(&id).unwrap().unwrap().status(),
        SessionStatus::Error
    );
}
