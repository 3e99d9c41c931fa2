//! Canonical byte encodings.
//!
//! Hex for public keys and stored identifiers, unpadded URL-safe base64 for
//! everything that travels in headers or cookies, and big-endian fixed-width
//! integers for anything mixed into a KDF.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::CryptoError;

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode hex (either case).
pub fn from_hex(input: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(input).map_err(|e| CryptoError::InvalidEncoding(format!("hex: {e}")))
}

/// Decode hex into a fixed-size array, rejecting any other length.
pub fn from_hex_array<const N: usize>(input: &str) -> Result<[u8; N], CryptoError> {
    let bytes = from_hex(input)?;
    <[u8; N]>::try_from(bytes.as_slice())
        .map_err(|_| CryptoError::InvalidKeyLength { expected: N, actual: bytes.len() })
}

/// Unpadded URL-safe base64 encoding.
pub fn to_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode unpadded URL-safe base64. Padded input is rejected.
pub fn from_base64url(input: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD
        .decode(input)
        .map_err(|e| CryptoError::InvalidEncoding(format!("base64url: {e}")))
}

/// Encode an unsigned integer as exactly `width` big-endian bytes.
///
/// Fails with [`CryptoError::Overflow`] if the value does not fit.
pub fn uint_to_bytes(value: u128, width: usize) -> Result<Vec<u8>, CryptoError> {
    let be = value.to_be_bytes();
    let needed = be.len() - (value.leading_zeros() as usize / 8);
    if needed > width {
        return Err(CryptoError::Overflow { needed, width });
    }

    let mut out = vec![0u8; width];
    out[width - needed..].copy_from_slice(&be[be.len() - needed..]);
    Ok(out)
}

/// Decode a big-endian unsigned integer. Leading zero bytes are ignored.
pub fn uint_from_bytes(bytes: &[u8]) -> Result<u128, CryptoError> {
    let first_significant = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first_significant..];
    if significant.len() > 16 {
        return Err(CryptoError::Overflow { needed: significant.len(), width: 16 });
    }

    Ok(significant.iter().fold(0u128, |acc, &b| (acc << 8) | u128::from(b)))
}

/// Concatenate buffers in order.
pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Split a fixed-width prefix off a buffer.
pub fn split_prefix<const N: usize>(bytes: &[u8]) -> Result<([u8; N], &[u8]), CryptoError> {
    if bytes.len() < N {
        return Err(CryptoError::Truncated { minimum: N, actual: bytes.len() });
    }

    let (head, rest) = bytes.split_at(N);
    let mut prefix = [0u8; N];
    prefix.copy_from_slice(head);
    Ok((prefix, rest))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn hex_is_lowercase_and_accepts_either_case() {
        assert_eq!(to_hex(&[0xAB, 0x01]), "ab01");
        assert_eq!(from_hex("AB01").unwrap(), vec![0xAB, 0x01]);
    }

    #[test]
    fn hex_array_rejects_wrong_length() {
        let result = from_hex_array::<4>("aabbcc");
        assert_eq!(result, Err(CryptoError::InvalidKeyLength { expected: 4, actual: 3 }));
    }

    #[test]
    fn invalid_hex_is_encoding_error() {
        assert!(matches!(from_hex("zz"), Err(CryptoError::InvalidEncoding(_))));
    }

    #[test]
    fn base64url_uses_url_alphabet_without_padding() {
        let encoded = to_base64url(&[0xFB, 0xFF]);
        assert_eq!(encoded, "-_8");
        assert!(!encoded.contains('='));
    }

    #[test]
    fn base64url_rejects_padding_and_standard_alphabet() {
        assert!(from_base64url("-_8=").is_err());
        assert!(from_base64url("+/8").is_err());
    }

    #[test]
    fn uint_fixed_width() {
        assert_eq!(uint_to_bytes(0x0102, 4).unwrap(), vec![0, 0, 1, 2]);
        assert_eq!(uint_to_bytes(0, 2).unwrap(), vec![0, 0]);
        assert_eq!(uint_to_bytes(0x01_0000, 2), Err(CryptoError::Overflow { needed: 3, width: 2 }));
    }

    #[test]
    fn uint_from_bytes_ignores_leading_zeros() {
        let mut long = vec![0u8; 20];
        long[19] = 7;
        assert_eq!(uint_from_bytes(&long).unwrap(), 7);
        assert_eq!(uint_from_bytes(&[]).unwrap(), 0);
        assert!(uint_from_bytes(&[1u8; 17]).is_err());
    }

    #[test]
    fn split_prefix_rejects_short_input() {
        let result = split_prefix::<12>(&[0u8; 11]);
        assert_eq!(result, Err(CryptoError::Truncated { minimum: 12, actual: 11 }));

        let (prefix, rest) = split_prefix::<2>(&[1, 2, 3]).unwrap();
        assert_eq!(prefix, [1, 2]);
        assert_eq!(rest, &[3]);
    }

    #[test]
    fn concat_preserves_order() {
        assert_eq!(concat(&[&[1], &[], &[2, 3]]), vec![1, 2, 3]);
    }

    proptest! {
        #[test]
        fn uint_encoding_is_reversible(value in any::<u128>(), extra in 0usize..8) {
            let bytes = uint_to_bytes(value, 16 + extra).unwrap();
            prop_assert_eq!(bytes.len(), 16 + extra);
            prop_assert_eq!(uint_from_bytes(&bytes).unwrap(), value);
        }
    }
}
