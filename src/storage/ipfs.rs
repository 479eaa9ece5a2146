/// IPFS content store via the Kubo HTTP API.
///
/// Documents are added pinned with CIDv1, so the returned CID is derived
/// from the bytes and re-adding the same document is a no-op.
///
/// Note: IPFS does not guarantee persistence. An unpinned or garbage
/// collected document can disappear; the anchored fingerprint does not.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{ContentStore, PutResult};
use crate::crypto::hash;
use crate::error::{IntegrityError, Result};

#[derive(Debug, Clone)]
pub struct IpfsConfig {
    /// Kubo API endpoint (e.g., "http://localhost:5001").
    pub api_url: String,
    /// Gateway used for public retrieval links (e.g., "https://ipfs.io").
    pub gateway_url: String,
}

pub struct IpfsStore {
    client: Client,
    config: IpfsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpfsAddResponse {
    hash: String,
}

impl IpfsStore {
    pub fn new(config: IpfsConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntegrityError::ContentStore(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { client, config })
    }

    fn api(&self, endpoint: &str) -> String {
        format!("{}/api/v0/{endpoint}", self.config.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ContentStore for IpfsStore {
    fn name(&self) -> &str {
        "IPFS"
    }

    async fn put(&self, data: &[u8]) -> Result<PutResult> {
        let part = multipart::Part::bytes(data.to_vec())
            .file_name("evidence.json")
            .mime_str("application/json")
            .map_err(|e| IntegrityError::ContentStore(format!("IPFS form error: {e}")))?;
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(self.api("add"))
            .query(&[("pin", "true"), ("cid-version", "1")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| IntegrityError::ContentStore(format!("IPFS add failed: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IntegrityError::ContentStore(format!("IPFS add failed: {body}")));
        }

        let added: IpfsAddResponse = resp
            .json()
            .await
            .map_err(|e| IntegrityError::Serialization(format!("IPFS response parse error: {e}")))?;

        Ok(PutResult {
            content_id: added.hash,
            content_hash: hash::content_hash(data),
            size: data.len() as u64,
        })
    }

    async fn get(&self, content_id: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .client
            .post(self.api("cat"))
            .query(&[("arg", content_id)])
            .send()
            .await
            .map_err(|e| IntegrityError::ContentStore(format!("IPFS cat failed: {e}")))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IntegrityError::ContentStore(format!("IPFS cat failed: {body}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| IntegrityError::ContentStore(format!("IPFS cat read failed: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }

    fn retrieval_url(&self, content_id: &str) -> Option<String> {
        Some(format!(
            "{}/ipfs/{content_id}",
            self.config.gateway_url.trim_end_matches('/')
        ))
    }
}
