//! Symmetric encryption of stored remote credentials.
//!
//! AES-256-CBC with PKCS#7 padding, key = SHA-256 of the configured secret,
//! stored as `ivHex:cipherHex`. CBC carries no integrity tag, so decrypting
//! with the wrong key usually surfaces as a padding failure but can also yield
//! garbage plaintext.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

const IV_LEN: usize = 16;

/// Only used when the operator opts into insecure mode.
const INSECURE_DEFAULT_SECRET: &str = "chart-query-insecure-default-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("stored credential is not in ivHex:cipherHex format")]
    Format,
    #[error("stored credential could not be decrypted")]
    Decrypt,
}

#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    pub fn from_secret(secret: &str) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        Self { key }
    }

    pub fn insecure_default() -> Self {
        Self::from_secret(INSECURE_DEFAULT_SECRET)
    }

    /// Encrypts under a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = Encryptor::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let mut parts = stored.split(':');
        let (Some(iv_hex), Some(cipher_hex), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::Format);
        };

        let iv = hex::decode(iv_hex).map_err(|_| CryptoError::Format)?;
        let ciphertext = hex::decode(cipher_hex).map_err(|_| CryptoError::Format)?;
        if iv.len() != IV_LEN {
            return Err(CryptoError::Format);
        }

        let plaintext = Decryptor::new_from_slices(&self.key, &iv)
            .map_err(|_| CryptoError::Format)?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}
