#![no_main]

use framewire::core::header;
use framewire::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must fail cleanly, never panic.
    let _ = header::parse(data);
    if let Ok(frame) = Frame::from_bytes(data) {
        assert_eq!(frame.as_bytes(), data);
    }
});
