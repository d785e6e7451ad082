#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use relay_protocol::frame::RelayFrame;

fuzz_target!(|data: &[u8]| {
    let frame = RelayFrame::new(0, Bytes::copy_from_slice(data));

    // Format detection looks at a fixed prefix and must tolerate any length
    let _ = frame.format();
    let _ = frame.format().mime_type();
});
