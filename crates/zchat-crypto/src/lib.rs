/// zChat Crypto Library
///
/// Server-side encryption of message bodies at rest (AES-256-GCM).
/// The server holds the key: this protects the database file, not the
/// conversation against the server itself.
///
/// Keys are derived from operator passphrases, so rotating the key means
/// moving the old passphrase into the legacy list; ciphertext written under
/// it stays readable. Secrets that are valid Fernet keys additionally open
/// Fernet tokens left behind by an earlier backend.
pub mod encrypt;
pub mod keys;

pub use encrypt::{ContentCipher, CryptoError, Encryptor};
