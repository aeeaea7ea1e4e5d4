//! Credential envelope format
//!
//! ```text
//! +----------+-----------+----------+----------------------------+
//! | salt(16) | nonce(16) | tag(16)  | ciphertext (JSON payload)  |
//! +----------+-----------+----------+----------------------------+
//! ```
//!
//! The payload is `{"root_token": "...", "unseal_keys": ["..."]}`. The KDF
//! parameters are not stored; both sides must agree on [KdfParams].

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use zeroize::Zeroize;
use zeroize::ZeroizeOnDrop;
use zeroize::Zeroizing;

use super::cipher::EnvelopeCipher;
use super::cipher::NONCE_LEN;
use super::cipher::TAG_LEN;
use super::key_manager::derive_key;
use super::key_manager::generate_salt;
use super::key_manager::KdfParams;
use super::key_manager::SALT_LEN;
use super::EnvelopeError;

/// bytes preceding the ciphertext
pub const HEADER_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

/// Root credentials returned by backend initialization.
///
/// Wiped from memory on drop and redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct VaultCredentials {
    pub root_token: String,
    pub unseal_keys: Vec<String>,
}

impl VaultCredentials {
    pub fn new(root_token: impl Into<String>, unseal_keys: Vec<String>) -> Self {
        Self {
            root_token: root_token.into(),
            unseal_keys,
        }
    }

    /// single-share deployments only ever need the first key
    pub fn first_unseal_key(&self) -> Option<&str> {
        self.unseal_keys.first().map(String::as_str)
    }
}

impl fmt::Debug for VaultCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultCredentials")
            .field("root_token", &"<redacted>")
            .field("unseal_keys", &format_args!("<{} redacted>", self.unseal_keys.len()))
            .finish()
    }
}

/// borrowed view of the envelope sections
struct EnvelopeParts<'a> {
    salt: &'a [u8; SALT_LEN],
    nonce: &'a [u8; NONCE_LEN],
    tag: &'a [u8; TAG_LEN],
    ciphertext: &'a [u8],
}

impl<'a> EnvelopeParts<'a> {
    fn split(blob: &'a [u8]) -> Option<Self> {
        let (salt, rest) = blob.split_first_chunk::<SALT_LEN>()?;
        let (nonce, rest) = rest.split_first_chunk::<NONCE_LEN>()?;
        let (tag, ciphertext) = rest.split_first_chunk::<TAG_LEN>()?;
        Some(Self {
            salt,
            nonce,
            tag,
            ciphertext,
        })
    }
}

/// Seal `credentials` under `passphrase`.
///
/// Every call uses a fresh salt and nonce, so encrypting the same
/// credentials twice yields different blobs.
pub fn encrypt_envelope(
    passphrase: &str,
    credentials: &VaultCredentials,
    params: &KdfParams,
) -> Result<Vec<u8>, EnvelopeError> {
    let salt = generate_salt();
    let key = derive_key(passphrase, &salt, params)?;
    let cipher = EnvelopeCipher::new(&key)?;
    let nonce = EnvelopeCipher::generate_nonce();

    let mut body = Zeroizing::new(serde_json::to_vec(credentials)?);
    let tag = cipher.encrypt_detached(&nonce, &mut body)?;

    let mut blob = Vec::with_capacity(HEADER_LEN + body.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&tag);
    blob.extend_from_slice(&body);
    Ok(blob)
}

/// Open an envelope written by [encrypt_envelope].
///
/// A truncated blob, a wrong passphrase, tampering and an undecodable
/// payload all yield [EnvelopeError::Integrity]. Only KDF configuration
/// problems are reported differently.
pub fn decrypt_envelope(
    passphrase: &str,
    blob: &[u8],
    params: &KdfParams,
) -> Result<VaultCredentials, EnvelopeError> {
    let Some(parts) = EnvelopeParts::split(blob) else {
        // still pay for the KDF so a short file is not distinguishable by timing
        let _ = derive_key(passphrase, &[0u8; SALT_LEN], params)?;
        debug!(len = blob.len(), "envelope shorter than its header");
        return Err(EnvelopeError::Integrity);
    };

    let key = derive_key(passphrase, parts.salt, params)?;
    let cipher = EnvelopeCipher::new(&key)?;

    let mut plaintext = Zeroizing::new(parts.ciphertext.to_vec());
    cipher
        .decrypt_detached(parts.nonce, parts.tag, &mut plaintext)
        .inspect_err(|_| debug!("envelope tag verification failed"))?;

    serde_json::from_slice(&plaintext).map_err(|e| {
        debug!("envelope payload undecodable: {e}");
        EnvelopeError::Integrity
    })
}
