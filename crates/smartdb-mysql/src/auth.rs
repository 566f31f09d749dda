//! MySQL authentication scrambles.
//!
//! Two plugins are supported:
//!
//! - `mysql_native_password` (SHA1, MySQL < 8.0 default):
//!   `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`
//! - `caching_sha2_password` fast path (SHA256, MySQL 8.0+ default):
//!   `XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))`
//!
//! The caching_sha2 full-auth exchange requires a secure channel and is not
//! implemented; the connection reports an Authentication error instead.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// In-band status bytes of the caching_sha2_password exchange.
pub mod caching_sha2 {
    /// Fast auth succeeded; an OK packet follows.
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Server wants the full exchange (secure channel required).
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

fn xor_into(mut lhs: Vec<u8>, rhs: &[u8]) -> Vec<u8> {
    for (a, b) in lhs.iter_mut().zip(rhs) {
        *a ^= b;
    }
    lhs
}

/// Compute the `mysql_native_password` response for a 20-byte scramble.
///
/// An empty password yields an empty response.
pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    // The scramble may carry a trailing NUL; only the first 20 bytes count.
    let seed = &auth_data[..auth_data.len().min(20)];

    let hash1 = Sha1::digest(password.as_bytes());
    let hash2 = Sha1::digest(hash1);

    let mut seeded = Sha1::new();
    seeded.update(seed);
    seeded.update(hash2);
    let hash3 = seeded.finalize();

    xor_into(hash1.to_vec(), &hash3)
}

/// Compute the `caching_sha2_password` fast-auth response.
///
/// An empty password yields an empty response.
pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let seed = &auth_data[..auth_data.len().min(20)];

    let hash1 = Sha256::digest(password.as_bytes());
    let hash2 = Sha256::digest(hash1);

    let mut seeded = Sha256::new();
    seeded.update(hash2);
    seeded.update(seed);
    let hash3 = seeded.finalize();

    xor_into(hash1.to_vec(), &hash3)
}

/// Compute the response for a named plugin. Unknown plugins fall back to
/// `mysql_native_password`.
pub fn compute_response(plugin: &str, password: &str, auth_data: &[u8]) -> Vec<u8> {
    match plugin {
        plugins::CACHING_SHA2_PASSWORD => caching_sha2_password(password, auth_data),
        plugins::MYSQL_CLEAR_PASSWORD => {
            let mut response = password.as_bytes().to_vec();
            response.push(0);
            response
        }
        _ => mysql_native_password(password, auth_data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &[u8] = &[
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
        0x10, 0x11, 0x12, 0x13, 0x14,
    ];

    #[test]
    fn test_empty_password_yields_empty_response() {
        assert!(mysql_native_password("", SEED).is_empty());
        assert!(caching_sha2_password("", SEED).is_empty());
    }

    #[test]
    fn test_response_lengths() {
        assert_eq!(mysql_native_password("secret", SEED).len(), 20);
        assert_eq!(caching_sha2_password("secret", SEED).len(), 32);
    }

    #[test]
    fn test_responses_are_deterministic() {
        assert_eq!(
            mysql_native_password("secret", SEED),
            mysql_native_password("secret", SEED)
        );
        assert_eq!(
            caching_sha2_password("secret", SEED),
            caching_sha2_password("secret", SEED)
        );
    }

    #[test]
    fn test_seed_changes_response() {
        let mut other_seed = SEED.to_vec();
        other_seed[0] ^= 0xFF;
        assert_ne!(
            mysql_native_password("secret", SEED),
            mysql_native_password("secret", &other_seed)
        );
    }

    #[test]
    fn test_trailing_nul_in_seed_is_ignored() {
        let mut with_nul = SEED.to_vec();
        with_nul.push(0);
        assert_eq!(
            mysql_native_password("secret", SEED),
            mysql_native_password("secret", &with_nul)
        );
    }

    #[test]
    fn test_clear_password_is_nul_terminated() {
        let response = compute_response(plugins::MYSQL_CLEAR_PASSWORD, "pw", SEED);
        assert_eq!(response, b"pw\0");
    }

    #[test]
    fn test_unknown_plugin_falls_back_to_native() {
        assert_eq!(
            compute_response("exotic_plugin", "pw", SEED),
            mysql_native_password("pw", SEED)
        );
    }
}
