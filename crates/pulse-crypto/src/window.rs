//! Time-windowed integrity key derivation using HKDF

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

/// Label used for integrity key derivation
const INTEGRITY_KEY_LABEL: &[u8] = b"pulse-integrity-v1";

/// Window shifts a verifier tries, in order.
///
/// The current window first, then the previous one (client clock behind or a
/// request that crossed a boundary in flight), then the next one.
pub const WINDOW_SHIFTS: [i64; 3] = [0, -1, 1];

/// Coarse time bucket: `floor((now + shift * interval) / interval)`.
///
/// Uses Euclidean division so the result is a true floor for negative
/// arguments as well. A zero interval is treated as one second.
pub fn window_index(now_secs: i64, interval_secs: u64, shift: i64) -> i64 {
    let interval = interval_secs.max(1) as i64;
    now_secs.saturating_add(shift.saturating_mul(interval)).div_euclid(interval)
}

/// A per-call integrity key. Never persisted.
pub struct DerivedKey {
    key: [u8; 32],
}

impl DerivedKey {
    /// 32-byte key for ChaCha20-Poly1305.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Derive the integrity key for the window `shift` steps away from `now`.
///
/// `key = HKDF-SHA256(ikm = secret, salt = salt, info = label ‖ window_index)`
///
/// # Security
///
/// - Different windows produce different keys (bounded replay exposure)
/// - Different salts produce different keys (nonce reuse under a fixed key
///   is impossible)
/// - Deterministic: same inputs always produce same output
pub fn derive_window_key(
    secret: &[u8],
    salt: &[u8],
    interval_secs: u64,
    shift: i64,
    now_secs: i64,
) -> DerivedKey {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), secret);

    let window = window_index(now_secs, interval_secs, shift);
    let mut info = Vec::with_capacity(INTEGRITY_KEY_LABEL.len() + 8);
    info.extend_from_slice(INTEGRITY_KEY_LABEL);
    info.extend_from_slice(&window.to_be_bytes());

    let mut key = [0u8; 32];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    DerivedKey { key }
}
