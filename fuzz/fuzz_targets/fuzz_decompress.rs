//! Fuzz target: `compression::decompress`
//!
//! Every packet tag routes to a different decoder; none of them may panic
//! on truncated or hostile input.
//!
//! cargo fuzz run fuzz_decompress

#![no_main]

use ecowatt::compression::decompress;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&count, packet)) = data.split_first() else {
        return;
    };
    let _ = decompress(packet, usize::from(count % 11));
});
