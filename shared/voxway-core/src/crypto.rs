//! Sealed-secret encryption
//!
//! Secret material at rest (SMTP passwords, action tokens, processor keys)
//! is AES-256-GCM encrypted with a process-wide 32-byte key. Ciphertext,
//! 12-byte IV, and 16-byte tag are stored as separate columns, so the sealed
//! type carries them separately as well.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Result, VoxwayError};

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Process-wide encryption key, loaded once at startup and immutable after.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Decode from the base64 form used in the environment.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| VoxwayError::Config(format!("Invalid encryption key: {}", e)))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VoxwayError::Config("Encryption key must be 32 bytes".to_string()))?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Encrypted secret as stored: ciphertext, IV, and GCM tag in separate parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
}

impl SealedSecret {
    /// Encrypt plaintext under the process key with a fresh random IV.
    pub fn seal(key: &EncryptionKey, plaintext: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(&key.0)
            .map_err(|e| VoxwayError::Crypto(e.to_string()))?;

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        // aes-gcm appends the tag to the ciphertext; split it back out so
        // the storage layer keeps its three-column layout.
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| VoxwayError::Crypto(e.to_string()))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(Self {
            ciphertext: sealed,
            iv: iv.to_vec(),
            tag,
        })
    }

    /// Decrypt, verifying the GCM tag.
    pub fn open(&self, key: &EncryptionKey) -> Result<Vec<u8>> {
        if self.iv.len() != IV_LEN || self.tag.len() != TAG_LEN {
            return Err(VoxwayError::Crypto("Malformed sealed secret".to_string()));
        }
        let cipher = Aes256Gcm::new_from_slice(&key.0)
            .map_err(|e| VoxwayError::Crypto(e.to_string()))?;

        let mut combined = self.ciphertext.clone();
        combined.extend_from_slice(&self.tag);

        cipher
            .decrypt(Nonce::from_slice(&self.iv), combined.as_ref())
            .map_err(|_| VoxwayError::Crypto("Decryption failed".to_string()))
    }

    /// Decrypt to a UTF-8 string.
    pub fn open_string(&self, key: &EncryptionKey) -> Result<String> {
        let bytes = self.open(key)?;
        String::from_utf8(bytes)
            .map_err(|_| VoxwayError::Crypto("Secret is not valid UTF-8".to_string()))
    }
}

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Generate a random bearer token of `len` bytes, hex-encoded.
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time equality for signature/token comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_bytes([7u8; 32])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let sealed = SealedSecret::seal(&key, b"smtp-password").unwrap();
        assert_eq!(sealed.iv.len(), IV_LEN);
        assert_eq!(sealed.tag.len(), TAG_LEN);
        assert_eq!(sealed.open(&key).unwrap(), b"smtp-password");
    }

    #[test]
    fn test_open_rejects_tampered_tag() {
        let key = test_key();
        let mut sealed = SealedSecret::seal(&key, b"secret").unwrap();
        sealed.tag[0] ^= 0xff;
        assert!(sealed.open(&key).is_err());
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let sealed = SealedSecret::seal(&test_key(), b"secret").unwrap();
        let other = EncryptionKey::from_bytes([8u8; 32]);
        assert!(sealed.open(&other).is_err());
    }

    #[test]
    fn test_distinct_ivs() {
        let key = test_key();
        let a = SealedSecret::seal(&key, b"x").unwrap();
        let b = SealedSecret::seal(&key, b"x").unwrap();
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn test_sha256_hex() {
        // SHA-256 of the empty string
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_key_from_base64() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8; 32]);
        assert!(EncryptionKey::from_base64(&encoded).is_ok());
        assert!(EncryptionKey::from_base64("dG9vc2hvcnQ=").is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
