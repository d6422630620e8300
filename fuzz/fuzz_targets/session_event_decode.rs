#![no_main]

use libfuzzer_sys::fuzz_target;

use duplex_session::wire::{decode_event, encode_event};
use duplex_session::{Limits, SessionManager};

fuzz_target!(|data: &[u8]| {
    let limits = Limits::default();
    let Ok(event) = decode_event(data, &limits) else {
        return;
    };
    // anything we accept must re-encode and decode to the same event
    let frame = encode_event(&event).expect("decoded event encodes");
    let again = decode_event(&frame, &limits).expect("re-encoded event decodes");
    assert_eq!(again, event);

    // and must never panic the manager as a session opener
    let _ = SessionManager::new(limits).process_message_received(None, &event, 0);
});
