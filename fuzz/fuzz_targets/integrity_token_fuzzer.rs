//! Fuzz target for `X-Integrity` header decoding and verification
//!
//! # Strategy
//!
//! - Raw header: arbitrary strings fed to `IntegrityToken::parse`
//! - Bit flips: a correctly sealed token with one byte altered
//! - Clock: sealing and opening at arbitrary, even negative, timestamps
//!
//! # Invariants
//!
//! - Parsing and opening NEVER panic
//! - A parsed token re-encodes to the canonical form of its input
//! - An altered token never opens
//! - An untouched token opens at the shift it was sealed for

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pulse_crypto::{CHALLENGE_SIZE, IntegrityToken, RequestContext, SALT_SIZE};

#[derive(Debug, Arbitrary)]
enum Attack {
    RawHeader { header: String, now: i64, interval: u16 },
    BitFlip { salt: [u8; SALT_SIZE], index: u16, mask: u8, now: i64, interval: u16 },
    ContextSwap { method: String, path: String, body: Vec<u8>, other_path: String },
}

const SECRET: [u8; 32] = [7; 32];

fn interval(raw: u16) -> u64 {
    u64::from(raw.max(1))
}

fuzz_target!(|attack: Attack| {
    match attack {
        Attack::RawHeader { header, now, interval: raw } => {
            if let Ok(token) = IntegrityToken::parse(&header) {
                let reparsed = IntegrityToken::parse(&token.encode()).expect("canonical form parses");
                assert_eq!(reparsed.encode(), token.encode());
                let _ = token.open(&SECRET, interval(raw), now, b"");
            }
        }

        Attack::BitFlip { salt, index, mask, now, interval: raw } => {
            let interval = interval(raw);
            let token = IntegrityToken::seal(&SECRET, salt, [1; CHALLENGE_SIZE], interval, now, b"aad");
            assert_eq!(token.open(&SECRET, interval, now, b"aad"), Some(0));

            if mask == 0 {
                return;
            }
            let mut raw_bytes = pulse_crypto::codec::from_base64url(&token.encode()).expect("own encoding");
            let at = usize::from(index) % raw_bytes.len();
            raw_bytes[at] ^= mask;

            let tampered = IntegrityToken::parse(&pulse_crypto::codec::to_base64url(&raw_bytes))
                .expect("length is unchanged");
            assert_eq!(tampered.open(&SECRET, interval, now, b"aad"), None);
        }

        Attack::ContextSwap { method, path, body, other_path } => {
            if path == other_path {
                return;
            }
            let ctx = RequestContext::new(&method, &path, &body);
            let other = RequestContext::new(&method, &other_path, &body);
            let token = IntegrityToken::seal(&SECRET, [2; SALT_SIZE], [3; CHALLENGE_SIZE], 120, 0, &ctx.associated_data());

            assert_eq!(token.open(&SECRET, 120, 0, &other.associated_data()), None);
        }
    }
});
