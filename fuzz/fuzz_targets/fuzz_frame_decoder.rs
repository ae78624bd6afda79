//! Fuzz target: Modbus response parsing.
//!
//! Feeds arbitrary bytes to the read and write response parsers, both raw
//! and through the hex layer the inverter API wraps them in.  Neither may
//! panic, and anything accepted must carry a valid CRC.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use ecowatt::protocol::crc;
use ecowatt::protocol::frame::{
    build_write_frame, decode_hex, parse_read_response, parse_write_response,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&count, frame)) = data.split_first() else {
        return;
    };
    let count = u16::from(count % 126);

    if let Ok(words) = parse_read_response(frame, 0x11, count) {
        assert_eq!(words.len(), usize::from(count));
        assert!(crc::check(frame), "accepted a frame with a bad CRC");
    }

    let request = build_write_frame(0x11, 8, 50);
    if parse_write_response(frame, &request).is_ok() {
        assert_eq!(frame, request.as_slice());
    }

    if let Ok(text) = core::str::from_utf8(frame) {
        let _ = decode_hex(text).map(|bytes| parse_read_response(&bytes, 0x11, count));
    }
});
