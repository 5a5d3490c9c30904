//! Access-key authentication for the control endpoint.
//!
//! The key file stores `salt_hex:sha256_hex` where the digest covers
//! `salt || key`. The plain key is only ever known to whoever created the
//! file; it is handed back once at creation time.

use crate::error::{MonitorError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use std::fs;
use std::path::Path;
use tracing::info;

const SALT_LEN: usize = 16;
const SECRET_LEN: usize = 16;

/// Verifies presented access keys against a salted digest.
#[derive(Clone, Debug)]
pub struct KeyAuthenticator {
    salt: [u8; SALT_LEN],
    digest: [u8; 32],
}

fn digest(salt: &[u8], key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(bytes)
}

impl KeyAuthenticator {
    /// Build an authenticator for a known key.
    pub fn from_key(key: &str) -> Result<Self> {
        let salt = random_bytes::<SALT_LEN>()?;
        Ok(Self {
            salt,
            digest: digest(&salt, key),
        })
    }

    /// Read the key file, or create it with a fresh random key.
    ///
    /// Returns the new plain key when the file was created.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<(Self, Option<String>)> {
        let path = path.as_ref();
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            return Ok((Self::parse(&contents)?, None));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let secret = hex::encode(random_bytes::<SECRET_LEN>()?);
        let auth = Self::from_key(&secret)?;
        fs::write(path, auth.encode())?;
        info!(path = %path.display(), "Generated new access key");

        Ok((auth, Some(secret)))
    }

    fn parse(contents: &str) -> Result<Self> {
        let (salt_hex, digest_hex) = contents
            .trim()
            .split_once(':')
            .ok_or_else(|| MonitorError::Corruption("key file missing separator".to_string()))?;

        let salt: [u8; SALT_LEN] = hex::decode(salt_hex)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| MonitorError::Corruption("invalid salt in key file".to_string()))?;
        let digest: [u8; 32] = hex::decode(digest_hex)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| MonitorError::Corruption("invalid digest in key file".to_string()))?;

        Ok(Self { salt, digest })
    }

    fn encode(&self) -> String {
        format!("{}:{}\n", hex::encode(self.salt), hex::encode(self.digest))
    }

    /// Check a presented key. Comparison time does not depend on where the
    /// digests differ.
    pub fn verify(&self, key: &str) -> bool {
        let presented = digest(&self.salt, key);
        presented[..].ct_eq(&self.digest[..]).into()
    }
}
