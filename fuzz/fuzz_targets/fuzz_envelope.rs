//! Fuzz target: `SecurityEnvelope::unsecure`
//!
//! Arbitrary text posing as a secured message must be rejected without
//! panicking, and a rejected message must never advance the replay window.
//!
//! cargo fuzz run fuzz_envelope

#![no_main]

use ecowatt::adapters::nvs::NvsAdapter;
use ecowatt::security::SecurityEnvelope;
use libfuzzer_sys::fuzz_target;

const PSK: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let Ok(mut store) = NvsAdapter::new() else {
        return;
    };
    let mut envelope = SecurityEnvelope::load(&store);
    if envelope.provision_psk(&mut store, PSK).is_err() {
        return;
    }

    if envelope.unsecure(&mut store, text).is_err() {
        assert_eq!(envelope.last_valid_nonce(), 0);
    }
});
