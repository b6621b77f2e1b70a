// ABOUTME: Content fingerprint of a fragment's normalized fields.
// ABOUTME: SHA-256 over the kind and the sorted field map, hex encoded.

use crate::types::ResourceKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};

/// Normalized `field-path -> canonical value` map of a fragment.
pub type Fields = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(kind: ResourceKind, fields: &Fields) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        for (key, value) in fields {
            // Length prefixes keep "a=b" + "c" distinct from "a" + "b=c".
            hasher.update((key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Field value of a secret when no [`SecretKey`] is attached.
pub const SECRET_PLACEHOLDER: &str = "<secret>";

const SECRET_KEY_LEN: usize = 32;

/// Per-unit key for secret digests. Lives next to the snapshot, never in it.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    pub fn generate() -> io::Result<Self> {
        let mut bytes = [0u8; SECRET_KEY_LEN];
        File::open("/dev/urandom")?.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() != SECRET_KEY_LEN * 2 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; SECRET_KEY_LEN];
        for (byte, pair) in bytes.iter_mut().zip(hex.as_bytes().chunks(2)) {
            let pair = std::str::from_utf8(pair).ok()?;
            *byte = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Keyed digest stored in place of a secret value.
    pub fn digest(&self, secret: &str) -> String {
        let digest = Sha256::new()
            .chain_update(self.0)
            .chain_update(secret.as_bytes())
            .finalize();
        let hex = format!("{:x}", digest);
        format!("keyed:{}", &hex[..32])
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Group name of a field path: `env.DATABASE_URL` belongs to `env`.
pub fn field_group(path: &str) -> &str {
    path.split_once('.').map_or(path, |(group, _)| group)
}
