//! AES-256-CBC envelope for the account file.
//!
//! Layout: `base64(iv || ciphertext)`, 16-byte random IV per seal, PKCS#7
//! padding. CBC is unauthenticated: tampering is only detected when it breaks
//! the padding or the JSON that follows.

use aes::Aes256;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;

use super::StorageError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Development-only key. Anything real must come from configuration.
const DEVELOPMENT_KEY: &[u8; KEY_LEN] = b"12345678901234567890123456789012";

#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from 64 hex characters.
    pub fn from_hex(input: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(input.trim()).map_err(|_| KeyError::InvalidHex)?;
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| KeyError::InvalidLength(b.len()))?;
        Ok(Self(bytes))
    }

    pub fn development() -> Self {
        Self(*DEVELOPMENT_KEY)
    }

    pub fn is_development(&self) -> bool {
        &self.0 == DEVELOPMENT_KEY
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    InvalidHex,
    InvalidLength(usize),
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::InvalidHex => write!(f, "secret key is not valid hex"),
            KeyError::InvalidLength(len) => {
                write!(f, "secret key must be {} bytes, got {}", KEY_LEN, len)
            }
        }
    }
}

impl std::error::Error for KeyError {}

/// Encrypt `plaintext` under `key` with a fresh IV.
pub fn seal(plaintext: &[u8], key: &SecretKey) -> Result<String, StorageError> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new_from_slices(&key.0, &iv)
        .map_err(|e| StorageError::Decryption(format!("cipher setup failed: {}", e)))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(blob))
}

/// Reverse of [`seal`]. Malformed base64, a short blob, a wrong key or a
/// tampered body all yield `StorageError::Decryption`.
pub fn open(encoded: &str, key: &SecretKey) -> Result<Vec<u8>, StorageError> {
    let blob = STANDARD
        .decode(encoded.trim())
        .map_err(|e| StorageError::Decryption(format!("invalid base64: {}", e)))?;

    if blob.len() < IV_LEN + BLOCK_LEN || (blob.len() - IV_LEN) % BLOCK_LEN != 0 {
        return Err(StorageError::Decryption(format!(
            "blob length {} is not a valid IV + ciphertext",
            blob.len()
        )));
    }

    let (iv, ciphertext) = blob.split_at(IV_LEN);
    Aes256CbcDec::new_from_slices(&key.0, iv)
        .map_err(|e| StorageError::Decryption(format!("cipher setup failed: {}", e)))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| StorageError::Decryption("bad padding (wrong key or tampered data)".into()))
}
