//! Bearer token generation and secure storage.
//!
//! Raw tokens are never persisted; only their SHA-256 hash lives on disk
//! (hex-encoded, in a small YAML file). Comparison uses
//! [`subtle::ConstantTimeEq`] to prevent timing oracles.

use std::path::Path;

use anyhow::Context;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// A raw bearer token — displayed to the operator exactly once.
#[derive(Debug)]
#[must_use = "display this token to the operator, then call into_stored()"]
pub struct RawToken(String);

impl RawToken {
    /// Generate a cryptographically random 256-bit token, base64url-encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        RawToken(base64url_encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_stored(self) -> StoredToken {
        StoredToken(sha256(self.0.as_bytes()))
    }
}

/// The stored form of a bearer token: only the SHA-256 digest, hex-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken(#[serde(with = "hex_bytes")] [u8; 32]);

impl StoredToken {
    /// Verify a provided token string in constant time.
    pub fn verify(&self, provided: &str) -> bool {
        let provided_hash = sha256(provided.as_bytes());
        bool::from(provided_hash.ct_eq(&self.0))
    }
}

/// On-disk YAML format for the token file.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredTokenFile {
    pub token_hash: StoredToken,
}

impl StoredTokenFile {
    /// Generate a new token, write its hash to `path` (mode 0o600 on Unix),
    /// and return the raw token so the caller can display it once.
    pub fn generate_and_save(path: &Path) -> anyhow::Result<RawToken> {
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        let stored = raw.into_stored();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating token directory {}", parent.display()))?;
        }

        let file = StoredTokenFile { token_hash: stored };
        let yaml = serde_yaml::to_string(&file).context("serializing token file")?;
        write_secret_file(path, yaml.as_bytes())?;

        Ok(RawToken(raw_str))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading token file {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing token file {}", path.display()))
    }

    /// Load the token at `path`, generating and persisting a fresh one if it
    /// doesn't exist yet. Returns the hash plus the raw token when one was
    /// freshly generated (so the caller can print it once).
    pub fn load_or_generate(path: &Path) -> anyhow::Result<(StoredToken, Option<RawToken>)> {
        if path.exists() {
            Ok((Self::load(path)?.token_hash, None))
        } else {
            let raw = Self::generate_and_save(path)?;
            Ok((Self::load(path)?.token_hash, Some(raw)))
        }
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn write_secret_file(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("writing secret file {}", path.display()))?;
        f.write_all(data)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, data).with_context(|| format!("writing secret file {}", path.display()))?;
    }
    Ok(())
}

fn base64url_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes.try_into().map_err(|_| D::Error::custom("expected 32-byte hex"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_is_43_chars() {
        let t = RawToken::generate();
        assert_eq!(t.as_str().len(), 43);
    }

    #[test]
    fn stored_token_verifies_correct_raw() {
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        let stored = raw.into_stored();
        assert!(stored.verify(&raw_str));
    }

    #[test]
    fn stored_token_rejects_wrong_value() {
        let raw = RawToken::generate();
        let stored = raw.into_stored();
        assert!(!stored.verify("wrong-token"));
    }

    #[test]
    fn token_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.yaml");
        let raw = StoredTokenFile::generate_and_save(&path).unwrap();
        let raw_str = raw.as_str().to_string();
        let loaded = StoredTokenFile::load(&path).unwrap();
        assert!(loaded.token_hash.verify(&raw_str));
    }

    #[test]
    fn load_or_generate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.yaml");
        let (first_hash, first_raw) = StoredTokenFile::load_or_generate(&path).unwrap();
        assert!(first_raw.is_some());
        let (second_hash, second_raw) = StoredTokenFile::load_or_generate(&path).unwrap();
        assert!(second_raw.is_none());
        assert!(second_hash.verify(first_raw.unwrap().as_str()));
        let _ = first_hash;
    }
}
