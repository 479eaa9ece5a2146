/// In-process content store.
///
/// Ids are `Qm` followed by the first 44 hex characters of the SHA-256 of
/// the content: stable and content-derived, but not real IPFS CIDs.
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ContentStore, PutResult};
use crate::crypto::hash;
use crate::error::Result;

#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Content id for `data` in the memory store.
pub fn derived_content_id(data: &[u8]) -> String {
    let digest = hash::sha256_hex(data);
    format!("Qm{}", &digest[..44])
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, data: &[u8]) -> Result<PutResult> {
        let content_id = derived_content_id(data);
        self.objects
            .write()
            .await
            .insert(content_id.clone(), data.to_vec());

        Ok(PutResult {
            content_id,
            content_hash: hash::content_hash(data),
            size: data.len() as u64,
        })
    }

    async fn get(&self, content_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(content_id).cloned())
    }
}
