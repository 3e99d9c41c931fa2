//! Fuzz target for client public key handling
//!
//! The client's ECDH key is the first attacker-controlled input a sign-in
//! touches. Every malformed or low-order key must be rejected without a panic
//! and without producing a usable shared secret.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pulse_crypto::{EphemeralKeyPair, exchange::parse_public_key_hex};

fuzz_target!(|data: &[u8]| {
    let server = EphemeralKeyPair::generate([5; 32]);

    // Hex path, as received over the wire
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(peer) = parse_public_key_hex(text) {
            if let Ok(secret) = server.derive_shared_secret(&peer) {
                assert_ne!(secret.normalize(), [0; 32]);
            }
        }
    }

    // Raw bytes of any length
    if let Ok(secret) = server.derive_shared_secret(data) {
        assert_eq!(data.len(), 32);
        assert_ne!(secret.as_bytes(), &[0; 32]);
    }
});
