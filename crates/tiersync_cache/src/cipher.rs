//! Encryption hook for disk records.
//!
//! The disk tier seals every serialized record with a [`RecordCipher`]
//! before handing it to the backend, and opens it on the way back. With no
//! cipher configured, records are stored as plain CBOR.
//!
//! ## Security Model (`encryption` feature)
//!
//! - Each record is sealed independently with a fresh random nonce
//! - Record structure: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//! - Keys are never stored; the application supplies them

use crate::error::CacheResult;

/// Seals and opens serialized disk records.
pub trait RecordCipher: Send + Sync {
    /// Encrypts a serialized record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CacheError::Encryption`] if sealing fails.
    fn seal(&self, plaintext: &[u8]) -> CacheResult<Vec<u8>>;

    /// Decrypts a record produced by [`RecordCipher::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::CacheError::Encryption`] if the record was tampered
    /// with or sealed under a different key.
    fn open(&self, sealed: &[u8]) -> CacheResult<Vec<u8>>;
}

#[cfg(feature = "encryption")]
pub use aes::{AesGcmCipher, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

#[cfg(feature = "encryption")]
mod aes {
    use super::RecordCipher;
    use crate::error::{CacheError, CacheResult};
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};
    use zeroize::Zeroizing;

    /// Size of AES-256 key in bytes.
    pub const KEY_SIZE: usize = 32;
    /// Size of GCM nonce in bytes.
    pub const NONCE_SIZE: usize = 12;
    /// Size of GCM authentication tag in bytes.
    pub const TAG_SIZE: usize = 16;

    /// A 256-bit key, wiped from memory on drop.
    #[derive(Clone)]
    pub struct EncryptionKey {
        bytes: Zeroizing<[u8; KEY_SIZE]>,
    }

    impl EncryptionKey {
        /// Creates a key from raw bytes.
        ///
        /// # Errors
        ///
        /// Returns an error if the slice is not exactly 32 bytes.
        pub fn from_bytes(bytes: &[u8]) -> CacheResult<Self> {
            let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
                CacheError::Encryption(format!(
                    "invalid key size: expected {KEY_SIZE}, got {}",
                    bytes.len()
                ))
            })?;
            Ok(Self {
                bytes: Zeroizing::new(array),
            })
        }
    }

    impl std::fmt::Debug for EncryptionKey {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("EncryptionKey")
                .field("bytes", &"[REDACTED]")
                .finish()
        }
    }

    /// AES-256-GCM record cipher.
    pub struct AesGcmCipher {
        cipher: Aes256Gcm,
    }

    impl AesGcmCipher {
        /// Creates a cipher using `key`.
        pub fn new(key: &EncryptionKey) -> CacheResult<Self> {
            let cipher = Aes256Gcm::new_from_slice(key.bytes.as_slice())
                .map_err(|e| CacheError::Encryption(e.to_string()))?;
            Ok(Self { cipher })
        }
    }

    impl RecordCipher for AesGcmCipher {
        fn seal(&self, plaintext: &[u8]) -> CacheResult<Vec<u8>> {
            let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
            let ciphertext = self
                .cipher
                .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
                .map_err(|_| CacheError::Encryption("seal failed".to_string()))?;

            let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
            sealed.extend_from_slice(&nonce_bytes);
            sealed.extend_from_slice(&ciphertext);
            Ok(sealed)
        }

        fn open(&self, sealed: &[u8]) -> CacheResult<Vec<u8>> {
            if sealed.len() < NONCE_SIZE + TAG_SIZE {
                return Err(CacheError::Encryption("record too short".to_string()));
            }
            let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
            self.cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| CacheError::Encryption("authentication failed".to_string()))
        }
    }

}
