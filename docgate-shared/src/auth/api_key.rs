/// Opaque API key utilities
///
/// Generation, hashing and format checks for the long-lived keys that machine
/// clients present as `Authorization: Bearer ak_live_...`. Storage and lookup
/// live in `models::api_key` and the `KeyStore` trait.
///
/// # Key Format
///
/// `ak_live_` followed by 64 lowercase hex characters (32 random bytes),
/// 72 characters in total. Only the SHA-256 hex digest is ever stored; the
/// display prefix is `ak_live_` plus the first 8 hex characters.
///
/// # Example
///
/// ```
/// use docgate_shared::auth::api_key::{generate_api_key, hash_api_key, validate_api_key_format, API_KEY_LENGTH};
///
/// let (key, hash) = generate_api_key();
/// assert!(key.starts_with("ak_live_"));
/// assert_eq!(key.len(), API_KEY_LENGTH);
/// assert!(validate_api_key_format(&key));
/// assert_eq!(hash, hash_api_key(&key));
/// ```

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random bytes behind each key
const KEY_RANDOM_BYTES: usize = 32;

/// Opaque key prefix
pub const KEY_PREFIX: &str = "ak_live_";

/// Total length of an opaque key (prefix + hex-encoded random bytes)
pub const API_KEY_LENGTH: usize = KEY_PREFIX.len() + KEY_RANDOM_BYTES * 2;

/// Number of hex characters kept in the display prefix
const DISPLAY_HEX_CHARS: usize = 8;

/// Generates a new opaque key
///
/// # Returns
///
/// Tuple of (plaintext_key, sha256_hash). The plaintext is shown to the owner
/// exactly once.
pub fn generate_api_key() -> (String, String) {
    let mut bytes = [0u8; KEY_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    let key = format!("{}{}", KEY_PREFIX, hex::encode(bytes));
    let hash = hash_api_key(&key);

    (key, hash)
}

/// Hashes a key with SHA-256
///
/// # Returns
///
/// Lowercase hex digest (64 characters)
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Checks whether a bearer value has the opaque key shape
///
/// Used by the identity resolver to choose between the opaque key path and
/// the signed token path.
///
/// ```
/// use docgate_shared::auth::api_key::validate_api_key_format;
///
/// assert!(!validate_api_key_format("eyJhbGciOiJSUzI1NiJ9.e30.sig"));
/// assert!(!validate_api_key_format("ak_live_1234"));
/// ```
pub fn validate_api_key_format(key: &str) -> bool {
    if key.len() != API_KEY_LENGTH {
        return false;
    }

    match key.strip_prefix(KEY_PREFIX) {
        Some(random) => random
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)),
        None => false,
    }
}

/// Returns the display prefix for a key (`ak_live_` + 8 hex chars)
pub fn display_prefix(key: &str) -> String {
    key.chars()
        .take(KEY_PREFIX.len() + DISPLAY_HEX_CHARS)
        .collect()
}

/// Verifies a plaintext key against a stored hash in constant time
pub fn verify_api_key(key: &str, stored_hash: &str) -> bool {
    let computed_hash = hash_api_key(key);
    constant_time_compare(&computed_hash, stored_hash)
}

/// Constant-time string comparison
///
/// Accumulates byte differences without short-circuiting so the comparison
/// time does not depend on where the inputs differ. Lengths are not secret
/// here (digests are always 64 characters).
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_api_key() {
        let (key, hash) = generate_api_key();

        assert!(key.starts_with(KEY_PREFIX));
        assert_eq!(key.len(), 72);
        assert_eq!(hash.len(), 64);
        assert!(validate_api_key_format(&key));
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let (key1, hash1) = generate_api_key();
        let (key2, hash2) = generate_api_key();

        assert_ne!(key1, key2);
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_hash_api_key_is_deterministic() {
        let key = format!("{}{}", KEY_PREFIX, "ab".repeat(32));
        assert_eq!(hash_api_key(&key), hash_api_key(&key));
        assert_ne!(hash_api_key(&key), hash_api_key("ak_live_other"));
    }

    #[test]
    fn test_validate_api_key_format() {
        let valid = format!("{}{}", KEY_PREFIX, "0123456789abcdef".repeat(4));
        assert!(validate_api_key_format(&valid));

        // Wrong prefix
        let wrong_prefix = format!("ak_test_{}", "0123456789abcdef".repeat(4));
        assert!(!validate_api_key_format(&wrong_prefix));

        // Uppercase hex is not produced by the generator
        let upper = format!("{}{}", KEY_PREFIX, "0123456789ABCDEF".repeat(4));
        assert!(!validate_api_key_format(&upper));

        // Too short / too long
        assert!(!validate_api_key_format(&valid[..71]));
        assert!(!validate_api_key_format(&format!("{}0", valid)));

        // Non-hex characters
        let non_hex = format!("{}{}", KEY_PREFIX, "z".repeat(64));
        assert!(!validate_api_key_format(&non_hex));

        assert!(!validate_api_key_format(""));
    }

    #[test]
    fn test_display_prefix() {
        let key = format!("{}{}", KEY_PREFIX, "deadbeef".repeat(8));
        assert_eq!(display_prefix(&key), "ak_live_deadbeef");
    }

    #[test]
    fn test_verify_api_key() {
        let (key, hash) = generate_api_key();

        assert!(verify_api_key(&key, &hash));

        let (other, _) = generate_api_key();
        assert!(!verify_api_key(&other, &hash));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hello!"));
        assert!(constant_time_compare("", ""));
    }
}
