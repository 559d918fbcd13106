//! AES-256-CBC envelope encryption for the vault file.
//!
//! Every write draws a fresh 16-byte IV. The IV travels next to the
//! ciphertext as `{"iv": <base64>, "data": <base64>}`; the key never does.

use super::write_atomic;
use crate::utils::VaultError;
use aes::Aes256;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

/// 256-bit symmetric vault key.
#[derive(Clone, PartialEq, Eq)]
pub struct VaultKey([u8; KEY_LEN]);

impl VaultKey {
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Decode a URL-safe base64 key.
    pub fn from_base64(encoded: &str) -> Result<Self, VaultError> {
        let bytes = URL_SAFE
            .decode(encoded.trim())
            .map_err(|e| VaultError::Key(format!("invalid base64: {e}")))?;
        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            VaultError::Key(format!("expected {KEY_LEN} key bytes, got {}", bytes.len()))
        })?;
        Ok(Self(key))
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Read the key stored at `path`, or generate one and persist it with
    /// owner-only permissions.
    pub fn load_or_create(path: &Path) -> Result<Self, VaultError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_base64(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = Self::generate();
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    create_private_dir(parent)?;
                }
                write_atomic(path, key.to_base64().as_bytes())?;
                info!(path = %path.display(), "Generated new vault key");
                Ok(key)
            }
            Err(e) => Err(VaultError::Io(e)),
        }
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}

/// On-disk representation of the encrypted vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub iv: String,
    pub data: String,
}

pub fn encrypt(key: &VaultKey, plaintext: &[u8]) -> Envelope {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext =
        Aes256CbcEnc::new(&key.0.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Envelope {
        iv: STANDARD.encode(iv),
        data: STANDARD.encode(ciphertext),
    }
}

pub fn decrypt(key: &VaultKey, envelope: &Envelope) -> Result<Vec<u8>, VaultError> {
    let iv = STANDARD
        .decode(&envelope.iv)
        .map_err(|e| VaultError::Corrupt(format!("iv is not base64: {e}")))?;
    let iv: [u8; IV_LEN] = iv
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::Corrupt(format!("iv must be {IV_LEN} bytes, got {}", iv.len())))?;
    let ciphertext = STANDARD
        .decode(&envelope.data)
        .map_err(|e| VaultError::Corrupt(format!("data is not base64: {e}")))?;

    Aes256CbcDec::new(&key.0.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| VaultError::Corrupt("decryption failed (wrong key or damaged data)".into()))
}
