//! HMAC-SHA256 request signatures.
//!
//! The signed message is `access_key ‖ timestamp ‖ body` (plain concatenation),
//! keyed by the app's secret, and transmitted base64-encoded (standard alphabet).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, access_key: &str, timestamp: &str, body: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(access_key.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body.as_bytes());
    Some(mac)
}

/// Computes the base64 signature a client sends.
pub fn sign(secret: &str, access_key: &str, timestamp: &str, body: &str) -> String {
    match mac(secret, access_key, timestamp, body) {
        Some(mac) => STANDARD.encode(mac.finalize().into_bytes()),
        // HMAC accepts keys of any length
        None => String::new(),
    }
}

/// Checks `signature` against the expected one in constant time.
pub fn verify(signature: &str, secret: &str, access_key: &str, timestamp: &str, body: &str) -> bool {
    let expected = sign(secret, access_key, timestamp, body);
    if expected.is_empty() {
        return false;
    }
    bool::from(signature.as_bytes().ct_eq(expected.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let sig = sign("key", "The quick brown fox ", "jumps over ", "the lazy dog");
        let bytes = STANDARD.decode(&sig).unwrap();
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(
            hex,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn round_trip() {
        let sig = sign("secret", "ak", "1700000000000", "{\"a\":1}");
        assert!(verify(&sig, "secret", "ak", "1700000000000", "{\"a\":1}"));
    }

    #[test]
    fn wrong_secret_fails() {
        let sig = sign("secret", "ak", "1", "body");
        assert!(!verify(&sig, "other", "ak", "1", "body"));
    }

    #[test]
    fn empty_signature_fails() {
        assert!(!verify("", "secret", "ak", "1", "body"));
    }

    fn mutate(input: &str, index: usize, byte: u8) -> Option<String> {
        let mut bytes = input.as_bytes().to_vec();
        if bytes.is_empty() {
            return None;
        }
        let i = index % bytes.len();
        if bytes[i] == byte {
            return None;
        }
        bytes[i] = byte;
        String::from_utf8(bytes).ok()
    }

    proptest! {
        #[test]
        fn any_single_byte_mutation_fails(
            secret in "[a-zA-Z0-9]{1,32}",
            access_key in "[a-zA-Z0-9]{1,16}",
            timestamp in 1_000_000_000_000u64..2_000_000_000_000u64,
            body in "[ -~]{1,128}",
            index in any::<usize>(),
            byte in 0x20u8..0x7f,
            target in 0u8..3,
        ) {
            let timestamp = timestamp.to_string();
            let sig = sign(&secret, &access_key, &timestamp, &body);
            prop_assert!(verify(&sig, &secret, &access_key, &timestamp, &body));

            match target {
                0 => {
                    if let Some(bad) = mutate(&sig, index, byte) {
                        prop_assert!(!verify(&bad, &secret, &access_key, &timestamp, &body));
                    }
                }
                1 => {
                    if let Some(bad) = mutate(&body, index, byte) {
                        prop_assert!(!verify(&sig, &secret, &access_key, &timestamp, &bad));
                    }
                }
                _ => {
                    if let Some(bad) = mutate(&timestamp, index, byte) {
                        prop_assert!(!verify(&sig, &secret, &access_key, &bad, &body));
                    }
                }
            }
        }
    }
}
