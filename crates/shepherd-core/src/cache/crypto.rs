//! Passphrase encryption for cache files holding member contact details.
//!
//! The key is derived with Argon2id from the passphrase and a random salt
//! kept next to the cache (`cache.salt`). Each file is sealed with
//! ChaCha20-Poly1305 under a fresh random nonce, stored as `nonce || ciphertext`.

use std::path::Path;

use anyhow::{Context, Result};
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use thiserror::Error;
use tracing::debug;

const SALT_FILE: &str = "cache.salt";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Cache could not be decrypted (wrong passphrase or corrupted file)")]
    Decrypt,

    #[error("Encrypted cache file is truncated")]
    Truncated,

    #[error("Salt file is corrupted")]
    BadSalt,
}

pub struct CacheCipher {
    cipher: ChaCha20Poly1305,
}

impl CacheCipher {
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }

    /// Derive the key for a cache directory, creating its salt on first use
    pub fn open(cache_dir: &Path, passphrase: &str) -> Result<Self> {
        let salt = load_or_create_salt(cache_dir)?;
        Ok(Self::from_passphrase(passphrase, &salt)?)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}

fn load_or_create_salt(cache_dir: &Path) -> Result<Vec<u8>> {
    let path = cache_dir.join(SALT_FILE);
    if path.exists() {
        let salt = std::fs::read(&path).context("Failed to read cache salt")?;
        if salt.len() != SALT_LEN {
            return Err(CryptoError::BadSalt.into());
        }
        return Ok(salt);
    }

    std::fs::create_dir_all(cache_dir).context("Failed to create cache directory")?;
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    std::fs::write(&path, &salt).context("Failed to write cache salt")?;
    debug!(path = %path.display(), "Created cache salt");
    Ok(salt)
}
