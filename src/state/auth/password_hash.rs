//! Argon2id password hashing for portal login credentials.
//!
//! Produces self-describing PHC strings such as
//! `$argon2id$v=19$m=65536,t=3,p=4$<salt>$<hash>`, so hashes created with
//! older parameters keep verifying after the defaults change.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::PasswordHash;
use argon2::password_hash::PasswordHasher;
use argon2::password_hash::PasswordVerifier;
use argon2::password_hash::SaltString;
use argon2::Argon2;
use tracing::debug;

use crate::state::vault::encryption::KdfParams;

/// enumerates password hashing failures
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum PasswordHashError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// hash `plain` with the default [KdfParams]
pub fn hash_password(plain: &str) -> Result<String, PasswordHashError> {
    hash_password_with(plain, &KdfParams::default())
}

/// hash `plain` with a fresh random salt and the given parameters
pub fn hash_password_with(plain: &str, params: &KdfParams) -> Result<String, PasswordHashError> {
    let argon2 = params
        .argon2()
        .map_err(|e| PasswordHashError::Params(e.to_string()))?;
    let salt = SaltString::generate(&mut OsRng);

    argon2
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordHashError::Hash(e.to_string()))
}

/// Check `candidate` against a stored PHC hash.
///
/// Argument order is (stored hash, candidate). Malformed hashes verify as
/// `false`; this never errors or panics.
pub fn verify_password(encoded_hash: &str, candidate: &str) -> bool {
    let parsed = match PasswordHash::new(encoded_hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("stored password hash is malformed: {e}");
            return false;
        }
    };

    // parameters are taken from the parsed hash, not from the context
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok()
}
