use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};

/// Derive a 256-bit AES key from a passphrase of any length.
pub fn derive_key(secret: &[u8]) -> [u8; 32] {
    Sha256::digest(secret).into()
}

/// Generate a random passphrase suitable for `ZCHAT_ENCRYPTION_KEY`.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_stable() {
        assert_eq!(derive_key(b"hunter2"), derive_key(b"hunter2"));
        assert_ne!(derive_key(b"hunter2"), derive_key(b"hunter3"));
    }

    #[test]
    fn generated_secrets_differ() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_eq!(BASE64.decode(&a).unwrap().len(), 32);
    }
}
