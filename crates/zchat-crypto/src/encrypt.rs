use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use fernet::Fernet;

use crate::keys::derive_key;

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption key must not be empty")]
    EmptyKey,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("failed to decrypt message payload")]
    DecryptionFailed,
}

/// Symmetric protection of message bodies at rest.
pub trait ContentCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;
}

/// AES-256-GCM with a random 96-bit nonce per call.
///
/// Output is `base64(nonce || ciphertext)`. Decryption tries the primary key
/// first, then every legacy key in order. Rows written as Fernet tokens are
/// opened with any configured secret that is itself a valid Fernet key.
pub struct Encryptor {
    primary: Aes256Gcm,
    legacy: Vec<Aes256Gcm>,
    fernet: Vec<Fernet>,
}

impl Encryptor {
    pub fn new(secret: &str, legacy_secrets: &[String]) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::EmptyKey);
        }

        let legacy_secrets: Vec<&str> = legacy_secrets
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && *s != secret)
            .collect();

        // Fernet keys are url-safe base64 of 32 bytes; anything else is skipped.
        let fernet = std::iter::once(secret.trim())
            .chain(legacy_secrets.iter().copied())
            .filter_map(Fernet::new)
            .collect();

        Ok(Self {
            primary: cipher_for(secret),
            legacy: legacy_secrets.into_iter().map(cipher_for).collect(),
            fernet,
        })
    }

    pub fn legacy_key_count(&self) -> usize {
        self.legacy.len()
    }

    pub fn fernet_key_count(&self) -> usize {
        self.fernet.len()
    }

    fn open_gcm(&self, ciphertext: &str) -> Option<Vec<u8>> {
        let raw = BASE64.decode(ciphertext).ok()?;
        if raw.len() < NONCE_LEN {
            return None;
        }
        std::iter::once(&self.primary)
            .chain(self.legacy.iter())
            .find_map(|cipher| open(cipher, &raw))
    }

    fn open_fernet(&self, token: &str) -> Option<Vec<u8>> {
        self.fernet.iter().find_map(|f| f.decrypt(token).ok())
    }
}

fn cipher_for(secret: &str) -> Aes256Gcm {
    let key = derive_key(secret.as_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
}

fn open(cipher: &Aes256Gcm, raw: &[u8]) -> Option<Vec<u8>> {
    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()
}

impl ContentCipher for Encryptor {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .primary
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let ciphertext = ciphertext.trim();
        let plaintext = self
            .open_gcm(ciphertext)
            .or_else(|| self.open_fernet(ciphertext))
            .ok_or(CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }
}
