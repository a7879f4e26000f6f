//! Process-wide user anonymization salt
//!
//! Raw IPs and fingerprints are replaced with `md5(value + salt)` the moment
//! a `User` is constructed. The salt is resolved once per process: from the
//! `SOUNDCLASH_USER_SALT` environment variable when set (deployments that
//! need stable pseudonyms across restarts), otherwise a fresh
//! cryptographically random value. The salt itself must never be logged or
//! persisted.

use rand::RngCore;
use std::fmt;

/// Environment override for the anonymization salt.
pub const USER_SALT_ENV: &str = "SOUNDCLASH_USER_SALT";

/// Opaque anonymization salt.
///
/// `Debug` is redacted so the value cannot leak through error or trace
/// output.
#[derive(Clone)]
pub struct UserSalt(String);

impl UserSalt {
    /// Fixed salt, for tests and for wiring an externally resolved value.
    pub fn new(salt: impl Into<String>) -> Self {
        Self(salt.into())
    }

    /// Resolve the process salt: environment override, else random.
    pub fn from_env_or_random() -> Self {
        match std::env::var(USER_SALT_ENV) {
            Ok(salt) if !salt.trim().is_empty() => {
                tracing::info!("user salt loaded from environment");
                Self(salt)
            }
            _ => {
                let mut bytes = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                let salt: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                tracing::info!("user salt randomly initialized for this process");
                Self(salt)
            }
        }
    }

    /// Salted md5 of a raw value.
    pub fn hash(&self, value: &str) -> String {
        crate::checksum::salted_md5(value, &self.0)
    }
}

impl fmt::Debug for UserSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserSalt(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_salt_matches_known_vector() {
        let salt = UserSalt::new("test-salt");
        assert_eq!(salt.hash("192.168.1.1"), "3d7c16a221ce6d8f265dc2b679bb3bb4");
    }

    #[test]
    fn test_random_salts_differ() {
        // Not reading the env here: from_env_or_random only randomizes when
        // the variable is absent, which is the test-runner default.
        let a = UserSalt::from_env_or_random();
        let b = UserSalt::from_env_or_random();
        assert_ne!(a.hash("x"), b.hash("x"));
    }

    #[test]
    fn test_debug_is_redacted() {
        let salt = UserSalt::new("super-secret");
        let rendered = format!("{:?}", salt);
        assert!(!rendered.contains("super-secret"));
    }
}
