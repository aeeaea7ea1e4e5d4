//! AES-256-GCM authenticated encryption for the credential envelope
//!
//! Envelopes use a 16-byte nonce and keep the tag detached from the
//! ciphertext, matching the on-disk layout `salt || nonce || tag || ciphertext`.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::aead::KeyInit;
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::Rng;

use super::key_manager::KEY_LEN;
use super::EnvelopeError;

/// nonce length used by envelopes
pub const NONCE_LEN: usize = 16;

/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// AES-256-GCM with a 128-bit nonce
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Handles AES-256-GCM encryption/decryption
pub struct EnvelopeCipher {
    cipher: Aes256Gcm16,
}

impl EnvelopeCipher {
    /// Create cipher from 256-bit key
    pub fn new(key: &[u8; KEY_LEN]) -> Result<Self, EnvelopeError> {
        let cipher = Aes256Gcm16::new_from_slice(key).map_err(|_| EnvelopeError::Encrypt)?;
        Ok(Self { cipher })
    }

    /// Generate random 128-bit nonce
    pub fn generate_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);
        nonce
    }

    /// Encrypt `buffer` in place and return the detached tag
    pub fn encrypt_detached(
        &self,
        nonce: &[u8; NONCE_LEN],
        buffer: &mut [u8],
    ) -> Result<[u8; TAG_LEN], EnvelopeError> {
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", buffer)
            .map_err(|_| EnvelopeError::Encrypt)?;

        let mut detached = [0u8; TAG_LEN];
        detached.copy_from_slice(tag.as_slice());
        Ok(detached)
    }

    /// Verify `tag` and decrypt `buffer` in place.
    ///
    /// On failure the buffer contents are unspecified and must be discarded.
    pub fn decrypt_detached(
        &self,
        nonce: &[u8; NONCE_LEN],
        tag: &[u8; TAG_LEN],
        buffer: &mut [u8],
    ) -> Result<(), EnvelopeError> {
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce),
                b"",
                buffer,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| EnvelopeError::Integrity)
    }
}
