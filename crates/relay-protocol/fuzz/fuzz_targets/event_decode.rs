#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_protocol::codec::decode_event_message;

fuzz_target!(|data: &[u8]| {
    // The event feed only carries text frames
    if let Ok(text) = std::str::from_utf8(data) {
        // Must never panic, only return Err for invalid input
        if let Ok(message) = decode_event_message(text) {
            for event in message.events() {
                assert!((0.0..=1.0).contains(&event.confidence));
            }
        }
    }
});
