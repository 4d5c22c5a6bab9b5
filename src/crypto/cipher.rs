use crate::error::Result;

/// A symmetric or asymmetric cipher used to protect remembered identities.
pub trait CipherService: Send + Sync {
    /// Encrypts `plaintext` with `key`.
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts `ciphertext` with `key`.
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>>;
}
