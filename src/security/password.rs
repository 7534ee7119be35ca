//! Password hashing, verification and policy.
//!
//! Centralizes Argon2 password handling for user registration and HTTP Basic
//! login.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Verify a password against a stored Argon2 hash.
pub fn verify_password(
    password: &str,
    hash: &PasswordHash<'_>,
) -> Result<bool, argon2::password_hash::Error> {
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), hash)
        .is_ok())
}

/// Hash a password using default Argon2 settings.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Whether `password` is long enough to register with.
pub fn meets_policy(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
}
