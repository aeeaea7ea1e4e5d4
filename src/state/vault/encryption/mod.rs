//! Credential envelope encryption using Argon2id + AES-256-GCM
//!
//! Protects the backend's root token and unseal key at rest.
//!
//! ## Architecture
//!
//! ```text
//! Operator Passphrase (UTF-8)
//!     ↓ Argon2id (64 MiB, 3 passes, 4 lanes), fresh 16-byte salt
//! Envelope Key (256 bits)
//!     ↓ AES-256-GCM, fresh 16-byte nonce, detached tag
//! salt || nonce || tag || ciphertext
//! ```
//!
//! Neither the passphrase nor any derived key is ever written to disk.

pub use cipher::EnvelopeCipher;
pub use envelope::decrypt_envelope;
pub use envelope::encrypt_envelope;
pub use envelope::VaultCredentials;
pub use envelope::HEADER_LEN;
pub use key_manager::derive_key;
pub use key_manager::KdfParams;
pub use passphrase::Passphrase;
pub use passphrase::PassphraseStrength;
pub use passphrase::AUTO_UNSEAL_ENV_VAR;

mod cipher;
mod envelope;
mod key_manager;
mod passphrase;


/// enumerates envelope codec failures
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EnvelopeError {
    /// wrong passphrase, truncated or tampered envelope; deliberately vague
    #[error("envelope integrity check failed")]
    Integrity,

    #[error("invalid key derivation parameters: {0}")]
    KdfParams(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("could not encode envelope payload")]
    Encode(#[from] serde_json::Error),

    #[error("envelope encryption failed")]
    Encrypt,
}
