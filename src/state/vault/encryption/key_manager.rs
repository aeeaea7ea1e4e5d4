//! Argon2id key derivation for the credential envelope
//!
//! The same [KdfParams] also parameterize the login password hashes produced
//! by [crate::state::auth::password_hash], but the two call sites never share
//! a salt or a derived key.

use argon2::Algorithm;
use argon2::Argon2;
use argon2::ParamsBuilder;
use argon2::Version;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use zeroize::Zeroizing;

use super::EnvelopeError;

/// length of the random salt stored at the front of every envelope
pub const SALT_LEN: usize = 16;

/// length of the derived AES-256 key
pub const KEY_LEN: usize = 32;

/// Argon2id cost parameters
///
/// Changing these makes existing envelopes unreadable: the parameters are not
/// stored inside the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// number of passes over memory
    pub time_cost: u32,

    /// memory size in KiB
    pub memory_cost_kib: u32,

    /// degree of parallelism (lanes)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: 3,
            memory_cost_kib: 65_536, // 64 MiB
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// builds an Argon2id v0x13 context producing [KEY_LEN] bytes
    pub fn argon2(&self) -> Result<Argon2<'static>, EnvelopeError> {
        let params = ParamsBuilder::new()
            .m_cost(self.memory_cost_kib)
            .t_cost(self.time_cost)
            .p_cost(self.parallelism)
            .output_len(KEY_LEN)
            .build()
            .map_err(|e| EnvelopeError::KdfParams(e.to_string()))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// cheap parameters so unit tests do not spend seconds hashing
    #[cfg(test)]
    pub(crate) fn insecure_fast() -> Self {
        Self {
            time_cost: 1,
            memory_cost_kib: 64,
            parallelism: 1,
        }
    }
}

/// Derive the envelope key from an operator passphrase.
///
/// Deterministic for a given `(passphrase, salt, params)` triple.
pub fn derive_key(
    passphrase: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>, EnvelopeError> {
    let argon2 = params.argon2()?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut *key)
        .map_err(|e| EnvelopeError::Kdf(e.to_string()))?;

    Ok(key)
}

/// Generate random salt for a new envelope
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill(&mut salt);
    salt
}
