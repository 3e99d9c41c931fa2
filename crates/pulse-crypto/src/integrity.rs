//! `X-Integrity` token framing.
//!
//! ```text
//! base64url( salt[12] ‖ ChaCha20-Poly1305(window_key, nonce = salt, aad, challenge) )
//! ```
//!
//! The salt doubles as the AEAD nonce. That is safe because the key itself is
//! derived from the salt, so a (key, nonce) pair can never repeat unless the
//! caller reuses a salt.

use crate::{CryptoError, codec, primitives, window};

/// Per-token random salt, also the AEAD nonce
pub const SALT_SIZE: usize = 12;

/// Random plaintext sealed into each token
pub const CHALLENGE_SIZE: usize = 12;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// The request a token is bound to when context binding is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext<'a> {
    method: &'a str,
    path: &'a str,
    body: &'a [u8],
}

impl<'a> RequestContext<'a> {
    /// Describe a request.
    pub fn new(method: &'a str, path: &'a str, body: &'a [u8]) -> Self {
        Self { method, path, body }
    }

    /// HTTP method as given.
    pub fn method(&self) -> &str {
        self.method
    }

    /// Request path as given.
    pub fn path(&self) -> &str {
        self.path
    }

    /// True for methods where processing the same request twice is unsafe.
    pub fn is_state_changing(&self) -> bool {
        !matches!(self.method.to_ascii_uppercase().as_str(), "GET" | "HEAD" | "OPTIONS")
    }

    /// Canonical associated data: `METHOD|PATH|hex(sha256(body))`.
    pub fn associated_data(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}",
            self.method.to_ascii_uppercase(),
            self.path,
            codec::to_hex(&primitives::sha256(self.body))
        )
        .into_bytes()
    }
}

/// A decoded integrity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityToken {
    salt: [u8; SALT_SIZE],
    ciphertext: Vec<u8>,
}

impl IntegrityToken {
    /// Seal `challenge` under the key for the current window.
    ///
    /// Caller MUST provide a fresh random `salt` for every token.
    pub fn seal(
        secret: &[u8],
        salt: [u8; SALT_SIZE],
        challenge: [u8; CHALLENGE_SIZE],
        interval_secs: u64,
        now_secs: i64,
        aad: &[u8],
    ) -> Self {
        let key = window::derive_window_key(secret, &salt, interval_secs, 0, now_secs);
        let ciphertext = primitives::aead_seal(key.as_bytes(), &salt, aad, &challenge);
        Self { salt, ciphertext }
    }

    /// Decode the wire form.
    ///
    /// # Errors
    ///
    /// - `InvalidEncoding`: not unpadded base64url
    /// - `Truncated`: shorter than salt plus tag
    pub fn parse(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = codec::from_base64url(encoded.trim())?;
        if bytes.len() < SALT_SIZE + TAG_SIZE {
            return Err(CryptoError::Truncated { minimum: SALT_SIZE + TAG_SIZE, actual: bytes.len() });
        }

        let (salt, ciphertext) = codec::split_prefix::<SALT_SIZE>(&bytes)?;
        Ok(Self { salt, ciphertext: ciphertext.to_vec() })
    }

    /// Encode to the wire form.
    pub fn encode(&self) -> String {
        codec::to_base64url(&codec::concat(&[&self.salt, &self.ciphertext]))
    }

    /// The token's salt.
    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    /// Try to open the token under a single window shift.
    pub fn open_at(
        &self,
        secret: &[u8],
        interval_secs: u64,
        shift: i64,
        now_secs: i64,
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = window::derive_window_key(secret, &self.salt, interval_secs, shift, now_secs);
        primitives::aead_open(key.as_bytes(), &self.salt, aad, &self.ciphertext)
    }

    /// Try every tolerated window shift in order, returning the first that
    /// authenticates.
    pub fn open(&self, secret: &[u8], interval_secs: u64, now_secs: i64, aad: &[u8]) -> Option<i64> {
        window::WINDOW_SHIFTS
            .into_iter()
            .find(|&shift| self.open_at(secret, interval_secs, shift, now_secs, aad).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const SECRET: [u8; 32] = [0x5A; 32];
    const INTERVAL: u64 = 120;

    fn token_at(now: i64, aad: &[u8]) -> IntegrityToken {
        IntegrityToken::seal(&SECRET, [1u8; SALT_SIZE], [2u8; CHALLENGE_SIZE], INTERVAL, now, aad)
    }

    #[test]
    fn wire_roundtrip() {
        let token = token_at(1_000, b"");
        let parsed = IntegrityToken::parse(&token.encode()).unwrap();

        assert_eq!(parsed, token);
        assert_eq!(parsed.salt(), &[1u8; SALT_SIZE]);
    }

    #[test]
    fn ciphertext_is_challenge_plus_tag() {
        let token = token_at(1_000, b"");
        let raw = codec::from_base64url(&token.encode()).unwrap();

        assert_eq!(raw.len(), SALT_SIZE + CHALLENGE_SIZE + TAG_SIZE);
    }

    #[test]
    fn opens_in_same_window() {
        let token = token_at(1_000, b"");
        assert_eq!(token.open(&SECRET, INTERVAL, 1_000, b""), Some(0));
    }

    #[test]
    fn previous_window_is_tolerated() {
        // Issued at window 8, verified in window 9
        let token = token_at(1_000, b"");
        assert_eq!(token.open(&SECRET, INTERVAL, 1_100, b""), Some(-1));
    }

    #[test]
    fn next_window_is_tolerated() {
        // Issued at window 9, verified in window 8
        let token = token_at(1_100, b"");
        assert_eq!(token.open(&SECRET, INTERVAL, 1_000, b""), Some(1));
    }

    #[test]
    fn two_windows_away_fails() {
        let token = token_at(1_000, b"");
        assert_eq!(token.open(&SECRET, INTERVAL, 1_000 + 2 * INTERVAL as i64, b""), None);
        assert_eq!(token.open(&SECRET, INTERVAL, 1_000 - 2 * INTERVAL as i64, b""), None);
    }

    #[test]
    fn wrong_secret_fails() {
        let token = token_at(1_000, b"");
        assert_eq!(token.open(&[0u8; 32], INTERVAL, 1_000, b""), None);
    }

    #[test]
    fn context_is_bound() {
        let post = RequestContext::new("post", "/vault/items", b"{\"a\":1}");
        let other_path = RequestContext::new("POST", "/vault/keys", b"{\"a\":1}");
        let other_body = RequestContext::new("POST", "/vault/items", b"{\"a\":2}");
        let token = token_at(1_000, &post.associated_data());

        assert_eq!(token.open(&SECRET, INTERVAL, 1_000, &post.associated_data()), Some(0));
        assert_eq!(token.open(&SECRET, INTERVAL, 1_000, &other_path.associated_data()), None);
        assert_eq!(token.open(&SECRET, INTERVAL, 1_000, &other_body.associated_data()), None);
    }

    #[test]
    fn associated_data_is_canonical() {
        let ctx = RequestContext::new("delete", "/auth/devices/7", b"");
        assert_eq!(
            String::from_utf8(ctx.associated_data()).unwrap(),
            "DELETE|/auth/devices/7|e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn state_changing_methods() {
        assert!(RequestContext::new("POST", "/", b"").is_state_changing());
        assert!(RequestContext::new("delete", "/", b"").is_state_changing());
        assert!(!RequestContext::new("GET", "/", b"").is_state_changing());
        assert!(!RequestContext::new("head", "/", b"").is_state_changing());
    }

    #[test]
    fn short_token_is_rejected() {
        let short = codec::to_base64url(&[0u8; SALT_SIZE + TAG_SIZE - 1]);
        assert!(matches!(IntegrityToken::parse(&short), Err(CryptoError::Truncated { .. })));
        assert!(matches!(IntegrityToken::parse("%%%"), Err(CryptoError::InvalidEncoding(_))));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let token = token_at(1_000, b"");
        let mut raw = codec::from_base64url(&token.encode()).unwrap();
        raw[SALT_SIZE] ^= 0xFF;
        let tampered = IntegrityToken::parse(&codec::to_base64url(&raw)).unwrap();

        assert_eq!(tampered.open(&SECRET, INTERVAL, 1_000, b""), None);
    }

    proptest! {
        #[test]
        fn accepted_within_one_interval_of_a_boundary(
            window in 1i64..30_000_000,
            delta in -(INTERVAL as i64)..=(INTERVAL as i64),
            salt in any::<[u8; SALT_SIZE]>(),
        ) {
            let issued_at = window * INTERVAL as i64;
            let token = IntegrityToken::seal(&SECRET, salt, [0u8; CHALLENGE_SIZE], INTERVAL, issued_at, b"");
            prop_assert!(token.open(&SECRET, INTERVAL, issued_at + delta, b"").is_some());
        }

        #[test]
        fn rejected_beyond_two_intervals(
            issued_at in 1_000_000i64..2_000_000,
            extra in 0i64..10_000,
            forward in any::<bool>(),
        ) {
            let distance = 2 * INTERVAL as i64 + extra;
            let verified_at = if forward { issued_at + distance } else { issued_at - distance };
            let token = IntegrityToken::seal(&SECRET, [3u8; SALT_SIZE], [0u8; CHALLENGE_SIZE], INTERVAL, issued_at, b"");
            prop_assert!(token.open(&SECRET, INTERVAL, verified_at, b"").is_none());
        }
    }
}
