//! Fuzz target for session and access token verification
//!
//! # Strategy
//!
//! - Random strings: arbitrary input to `TokenSigner::verify`
//! - Signed garbage: arbitrary bytes as the CBOR payload, correctly MACed,
//!   so the claims decoder sees hostile input past the signature check
//! - Purpose confusion: a valid token of one purpose checked as the other
//!
//! # Invariants
//!
//! - Verification NEVER panics
//! - Without the signing key nothing verifies
//! - A session token is never accepted as an access token, nor the reverse

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pulse_core::{Claims, Role, TokenPurpose, TokenSigner, UserId};
use pulse_crypto::{codec, primitives::hmac_sha256};

#[derive(Debug, Arbitrary)]
enum Attack {
    RandomString { token: String, now: u64 },
    SignedGarbage { cbor: Vec<u8>, now: u64 },
    PurposeConfusion { uid: u64, session: bool, iat: u32, ttl: u32 },
}

const KEY: [u8; 32] = [9; 32];

fuzz_target!(|attack: Attack| {
    let signer = TokenSigner::new(KEY);

    match attack {
        Attack::RandomString { token, now } => {
            assert!(signer.verify(&token, TokenPurpose::Session, now).is_err());
            assert!(signer.verify(&token, TokenPurpose::Access, now).is_err());
        }

        Attack::SignedGarbage { cbor, now } => {
            let payload = codec::to_base64url(&cbor);
            let tag = codec::to_base64url(&hmac_sha256(&KEY, payload.as_bytes()));
            let token = format!("{payload}.{tag}");
            let _ = signer.verify(&token, TokenPurpose::Session, now);
            let _ = signer.verify(&token, TokenPurpose::Access, now);
        }

        Attack::PurposeConfusion { uid, session, iat, ttl } => {
            let (issued, wrong) = if session {
                (TokenPurpose::Session, TokenPurpose::Access)
            } else {
                (TokenPurpose::Access, TokenPurpose::Session)
            };
            let iat = u64::from(iat);
            let claims = Claims {
                uid: UserId(uid),
                kid: None,
                role: Role::Base,
                purpose: issued,
                iat,
                exp: iat + u64::from(ttl) + 1,
            };
            let token = signer.sign(&claims);

            assert_eq!(signer.verify(&token, issued, iat), Ok(claims));
            assert!(signer.verify(&token, wrong, iat).is_err());
            assert!(TokenSigner::new([0; 32]).verify(&token, issued, iat).is_err());
        }
    }
});
