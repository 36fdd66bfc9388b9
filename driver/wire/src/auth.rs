//! Greeting parsing and the chap-sha1 authentication scramble.
//!
//! The server opens every connection with a fixed 128-byte text banner.
//! Bytes 64..108 carry a base64 salt; the scramble mixes that salt with
//! a double SHA-1 of the password so the cleartext never crosses the
//! wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};

use crate::WireError;

/// Size of the fixed greeting banner in bytes
pub const GREETING_SIZE: usize = 128;

/// Length of the base64 salt inside the greeting
pub const SALT_LEN: usize = 44;

/// Offset of the salt inside the greeting
const SALT_OFFSET: usize = 64;

/// Number of decoded salt bytes mixed into the scramble
const SALT_PREFIX: usize = 20;

/// Extract the base64 salt from a greeting banner.
pub fn parse_salt(greeting: &[u8]) -> Result<String, WireError> {
    if greeting.len() < GREETING_SIZE {
        return Err(WireError::Greeting);
    }
    let raw = &greeting[SALT_OFFSET..SALT_OFFSET + SALT_LEN];
    let salt = std::str::from_utf8(raw).map_err(|_| WireError::Greeting)?;
    Ok(salt.trim_end().to_string())
}

/// Compute the chap-sha1 scramble for a password and server salt.
///
/// ```text
/// step1    = SHA1(password)
/// step2    = SHA1(step1)
/// step3    = SHA1(first 20 bytes of base64-decoded salt ++ step2)
/// scramble = step1 XOR step3
/// ```
pub fn scramble(password: &str, salt: &str) -> Result<Vec<u8>, WireError> {
    let decoded = BASE64.decode(salt.trim_end()).map_err(|_| WireError::Salt)?;

    let step1 = sha1_digest(password.as_bytes());
    let step2 = sha1_digest(&step1);

    let mut seed = Vec::with_capacity(SALT_PREFIX + step2.len());
    seed.extend_from_slice(&decoded[..decoded.len().min(SALT_PREFIX)]);
    seed.extend_from_slice(&step2);
    let step3 = sha1_digest(&seed);

    Ok(step1
        .iter()
        .zip(step3.iter())
        .map(|(a, b)| a ^ b)
        .collect())
}

fn sha1_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64 of b"0123456789abcdef0123456789abcdef"
    const SALT: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    #[test]
    fn test_scramble_reference_vector() {
        let expected: [u8; 20] = [
            0x75, 0xa5, 0x42, 0xaf, 0xb9, 0x61, 0x14, 0x33, 0x3f, 0x12, 0x07, 0x66, 0x9a, 0x0f,
            0x09, 0x9b, 0x19, 0x80, 0x35, 0x3f,
        ];
        let got = scramble("sesame", SALT).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_scramble_empty_password_vector() {
        let expected: [u8; 20] = [
            0xd6, 0xe6, 0x9d, 0xe1, 0xbe, 0x2b, 0x46, 0xed, 0xff, 0xcc, 0xf8, 0x24, 0x77, 0x9d,
            0x02, 0xed, 0x4e, 0xb1, 0xb6, 0x01,
        ];
        assert_eq!(scramble("", SALT).unwrap(), expected);
    }

    #[test]
    fn test_scramble_is_deterministic() {
        assert_eq!(
            scramble("secret", SALT).unwrap(),
            scramble("secret", SALT).unwrap()
        );
    }

    #[test]
    fn test_scramble_rejects_bad_base64() {
        assert!(matches!(scramble("x", "!!not base64!!"), Err(WireError::Salt)));
    }

    #[test]
    fn test_parse_salt() {
        let mut greeting = [b' '; GREETING_SIZE];
        greeting[..9].copy_from_slice(b"TupleDB 2");
        greeting[64..64 + SALT_LEN].copy_from_slice(SALT.as_bytes());
        assert_eq!(parse_salt(&greeting).unwrap(), SALT);
    }

    #[test]
    fn test_parse_salt_short_greeting() {
        assert!(matches!(parse_salt(&[0u8; 64]), Err(WireError::Greeting)));
    }
}
