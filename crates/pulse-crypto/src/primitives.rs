//! Hashing, MAC and AEAD primitives.
//!
//! All functions are pure. Salts, nonces and keys are supplied by the caller.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::{CryptoError, codec};

type HmacSha256 = Hmac<Sha256>;

/// Size of the salt prefixed to a salted hash
pub const HASH_SALT_SIZE: usize = 16;

/// HMAC-SHA256 output size
pub const MAC_SIZE: usize = 32;

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// HMAC-SHA256 over `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; MAC_SIZE] {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        unreachable!("HMAC accepts keys of any length");
    };
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Constant-time check of an HMAC-SHA256 tag.
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        unreachable!("HMAC accepts keys of any length");
    };
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}

/// Hex-encoded HMAC of `data` under a server-only key.
///
/// Used wherever a bearer value must be looked up without being stored:
/// refresh tokens, and the key-id under which a session secret is persisted.
pub fn keyed_hash(key: &[u8], data: &[u8]) -> String {
    codec::to_hex(&hmac_sha256(key, data))
}

/// Salted hash: `salt ‖ HMAC(salt, secret)`.
///
/// For low-entropy secrets with a short life (one-time codes) where a slow
/// password hash would be overkill.
pub fn salted_hash(secret: &[u8], salt: [u8; HASH_SALT_SIZE]) -> Vec<u8> {
    codec::concat(&[&salt, &hmac_sha256(&salt, secret)])
}

/// Check `secret` against a value produced by [`salted_hash`].
pub fn verify_salted_hash(secret: &[u8], stored: &[u8]) -> bool {
    if stored.len() != HASH_SALT_SIZE + MAC_SIZE {
        return false;
    }
    let (salt, tag) = stored.split_at(HASH_SALT_SIZE);
    verify_hmac_sha256(salt, secret, tag)
}

/// Encrypt with ChaCha20-Poly1305.
///
/// # Security
///
/// - Caller MUST NOT reuse a nonce under the same key
/// - `aad` is authenticated but not encrypted
pub fn aead_seal(key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(key.into());

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
    else {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    ciphertext
}

/// Decrypt with ChaCha20-Poly1305.
///
/// # Errors
///
/// - `DecryptionFailed`: wrong key, wrong associated data, or tampering
pub fn aead_open(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
}

/// How [`truncate`] shortens a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateMode {
    /// Keep both ends: `he...il`
    Middle,
    /// Keep the head, cutting at the last word boundary when there is one
    Smart,
}

const ELLIPSIS: &str = "...";

/// Shorten `input` to at most `max_chars` characters.
///
/// Counts Unicode scalar values, never splits inside a character. Strings
/// that already fit are returned unchanged.
pub fn truncate(input: &str, max_chars: usize, mode: TruncateMode) -> String {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= max_chars {
        return input.to_string();
    }
    if max_chars <= ELLIPSIS.len() {
        return chars[..max_chars].iter().collect();
    }

    let keep = max_chars - ELLIPSIS.len();
    let head = |n: usize| chars[..n].iter().collect::<String>();
    let tail = |n: usize| chars[chars.len() - n..].iter().collect::<String>();

    match mode {
        TruncateMode::Middle => {
            let back = keep / 2;
            format!("{}{ELLIPSIS}{}", head(keep - back), tail(back))
        },
        TruncateMode::Smart => match chars[..=keep].iter().rposition(|c| c.is_whitespace()) {
            Some(cut) if cut > 0 => format!("{}{ELLIPSIS}", head(cut).trim_end()),
            _ => format!("{}{ELLIPSIS}", head(keep)),
        },
    }
}
