/// Content store for canonical evidence documents.
///
/// At anchor time the canonical document bytes are `put` into a
/// content-addressed store and the returned id is kept on the anchor
/// record, so the exact anchored document can be retrieved later.
/// The store is best-effort: a failed `put` is logged and anchoring
/// continues without a content id.
///
/// Backends:
/// - IPFS: Kubo HTTP API (`/api/v0/add`, `/api/v0/cat`)
/// - Memory: in-process map, ids derived from content
pub mod ipfs;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata returned after a successful put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    /// Opaque, content-derived identifier.
    pub content_id: String,
    /// BLAKE3 hash of the stored bytes.
    pub content_hash: [u8; 32],
    pub size: u64,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Human-readable name of this backend (e.g., "IPFS").
    fn name(&self) -> &str;

    /// Store bytes. Storing the same bytes twice yields the same id.
    async fn put(&self, data: &[u8]) -> Result<PutResult>;

    /// Fetch bytes by id. `Ok(None)` when the store does not have them.
    async fn get(&self, content_id: &str) -> Result<Option<Vec<u8>>>;

    /// Public URL for a stored object, if the backend exposes one.
    fn retrieval_url(&self, _content_id: &str) -> Option<String> {
        None
    }
}
