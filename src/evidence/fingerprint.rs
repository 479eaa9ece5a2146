use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::hash;
use crate::error::{IntegrityError, Result};

/// SHA-256 digest of a canonical evidence document, as 64 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const HEX_LEN: usize = 64;

    /// Accepts upper- or lowercase hex and normalizes to lowercase.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.len() != Self::HEX_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IntegrityError::InvalidFingerprint(value.to_string()));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = IntegrityError;

    fn try_from(value: String) -> Result<Self> {
        Fingerprint::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Fingerprint canonical document bytes.
pub fn fingerprint(canonical: &[u8]) -> Fingerprint {
    debug_assert!(!canonical.is_empty(), "fingerprint of empty input");
    Fingerprint(hash::sha256_hex(canonical))
}
