//! Password hashing and the two password policies.
//!
//! Passwords and refresh tokens are stored only as salted Argon2 hashes and
//! checked through [`PasswordVerifier::compare`]; nothing in the crate ever
//! compares a stored credential with string equality.
//!
//! Registration and change-password intentionally enforce different format
//! policies (8-16 with lower/upper/digit vs 6-16 without spaces); the
//! divergence is inherited contract, not an oversight to unify.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier as _,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct PasswordVerifier;

impl PasswordVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Hash a plaintext with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if the hasher itself fails (never user input).
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash credential: {err}"))?;
        Ok(hash.to_string())
    }

    /// Constant-time comparison of a plaintext against a stored hash.
    /// Malformed stored hashes compare as a mismatch rather than an error.
    #[must_use]
    pub fn compare(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Registration-time password policy: 8-16 characters with at least one
/// lowercase letter, one uppercase letter, and one digit.
#[must_use]
pub fn valid_registration_password(password: &str) -> bool {
    let length = password.chars().count();
    (8..=16).contains(&length)
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Change-password policy: 6-16 characters, non-empty, no spaces, and not
/// equal to the old password.
#[must_use]
pub fn valid_password_change(new_password: &str, old_password: &str) -> bool {
    let length = new_password.chars().count();
    (6..=16).contains(&length)
        && !new_password.contains(' ')
        && new_password != old_password
}
