//! Cryptographic utilities for API key hashing and webhook signatures.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Prefix carried by every API key issued by the service.
pub const API_KEY_PREFIX: &str = "sd_";

type HmacSha256 = Hmac<Sha256>;

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extracts the prefix from an API key (first 8 characters after "sd_").
pub fn extract_key_prefix(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(API_KEY_PREFIX)?;
    rest.get(..8)
}

/// Signs a payload with HMAC-SHA256, returning `sha256=<hex>`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a `sha256=<hex>` signature in constant time.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(hex_sig) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Masks a credential or phone number for logging, keeping the last 4 characters.
pub fn mask_sensitive(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex("test");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn test_sha256_hex_deterministic() {
        assert_eq!(sha256_hex("same_input"), sha256_hex("same_input"));
        assert_ne!(sha256_hex("input1"), sha256_hex("input2"));
    }

    #[test]
    fn test_extract_key_prefix() {
        assert_eq!(extract_key_prefix("sd_abcdefgh12345"), Some("abcdefgh"));
        assert_eq!(extract_key_prefix("sd_12345678"), Some("12345678"));
        assert_eq!(extract_key_prefix("sd_short"), None);
        assert_eq!(extract_key_prefix("pm_abcdefgh12345"), None);
        assert_eq!(extract_key_prefix(""), None);
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let sig = sign_payload("secret", b"{\"status\":\"delivered\"}");
        assert!(sig.starts_with("sha256="));
        assert!(verify_signature("secret", b"{\"status\":\"delivered\"}", &sig));
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let sig = sign_payload("secret", b"original");
        assert!(!verify_signature("secret", b"tampered", &sig));
        assert!(!verify_signature("other", b"original", &sig));
    }

    #[test]
    fn test_verify_rejects_malformed_signature() {
        assert!(!verify_signature("secret", b"body", "md5=abc"));
        assert!(!verify_signature("secret", b"body", "sha256=not-hex"));
    }

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(mask_sensitive("+15551234567"), "********4567");
        assert_eq!(mask_sensitive("abc"), "***");
        assert_eq!(mask_sensitive(""), "");
    }
}
