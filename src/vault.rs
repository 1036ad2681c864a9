//! Encryption of provider credentials at rest.
//!
//! Tokens are sealed with AES-256-GCM under a key derived from the configured
//! pepper and stored as base64 of `nonce || ciphertext`.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    Encrypt(String),
    Decrypt(String),
}

impl std::fmt::Display for VaultError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultError::Encrypt(msg) => write!(f, "encrypt: {}", msg),
            VaultError::Decrypt(msg) => write!(f, "decrypt: {}", msg),
        }
    }
}

impl std::error::Error for VaultError {}

/// Seals and opens credential strings.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Derives the AES-256 key as SHA-256 of `pepper`.
    pub fn from_pepper(pepper: &[u8]) -> Self {
        let key = Sha256::digest(pepper);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    pub fn open(&self, sealed: &str) -> Result<String, VaultError> {
        let data = STANDARD
            .decode(sealed)
            .map_err(|e| VaultError::Decrypt(e.to_string()))?;
        if data.len() < NONCE_LEN {
            return Err(VaultError::Decrypt(
                "ciphertext too short (missing nonce)".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| VaultError::Decrypt(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| VaultError::Decrypt(e.to_string()))
    }
}
