/// Hashing utilities.
///
/// SHA-256 produces evidence fingerprints and simulated identifiers, so
/// that digests stay comparable with records anchored by earlier
/// deployments. BLAKE3 is used for content-store integrity checks.
use sha2::{Digest, Sha256};

/// SHA-256 of `data`, rendered as 64 lowercase hex characters.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// BLAKE3 content hash of `data`.
pub fn content_hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}
