/// Blockfrost REST client for Cardano.
///
/// Covers the four endpoints anchoring needs: transaction lookup, chain tip,
/// address UTxOs (to fund a transaction) and raw transaction submission.
/// Every request carries the project id in the `project_id` header.
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{IntegrityError, Result};

/// Base URL of the hosted Blockfrost API for a Cardano network.
pub fn default_base_url(network: &str) -> String {
    format!("https://cardano-{network}.blockfrost.io/api/v0")
}

/// `GET /txs/{hash}` response (fields used here only).
#[derive(Debug, Clone, Deserialize)]
pub struct BlockfrostTx {
    pub hash: String,
    pub block_height: Option<i64>,
    pub block_time: Option<i64>,
    pub slot: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct LatestBlock {
    height: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Amount {
    pub unit: String,
    pub quantity: String,
}

/// One unspent output at an address.
#[derive(Debug, Clone, Deserialize)]
pub struct Utxo {
    pub tx_hash: String,
    pub tx_index: u32,
    pub amount: Vec<Amount>,
}

impl Utxo {
    /// Lovelace held by this output.
    pub fn lovelace(&self) -> u64 {
        self.amount
            .iter()
            .find(|a| a.unit == "lovelace")
            .and_then(|a| a.quantity.parse().ok())
            .unwrap_or(0)
    }

    /// `tx_hash#index` form used by `cardano-cli --tx-in`.
    pub fn tx_in(&self) -> String {
        format!("{}#{}", self.tx_hash, self.tx_index)
    }
}

#[derive(Clone)]
pub struct BlockfrostClient {
    client: Client,
    base_url: String,
    project_id: String,
}

impl BlockfrostClient {
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntegrityError::Ledger(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        self.client
            .get(self.url(path))
            .header("project_id", &self.project_id)
            .send()
            .await
            .map_err(|e| {
                IntegrityError::AnchorServiceUnavailable(format!("Blockfrost request failed: {e}"))
            })
    }

    /// Look up a transaction. Unknown transactions yield `Ok(None)`.
    pub async fn transaction(&self, hash: &str) -> Result<Option<BlockfrostTx>> {
        let resp = self.get(&format!("/txs/{hash}")).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(IntegrityError::Ledger(format!(
                "Blockfrost /txs returned {}",
                resp.status()
            )));
        }

        let tx = resp
            .json()
            .await
            .map_err(|e| {
                IntegrityError::Serialization(format!("Failed to parse transaction: {e}"))
            })?;
        Ok(Some(tx))
    }

    /// Height of the latest block.
    pub async fn latest_block_height(&self) -> Result<i64> {
        let resp = self.get("/blocks/latest").await?;
        if !resp.status().is_success() {
            return Err(IntegrityError::Ledger(format!(
                "Blockfrost /blocks/latest returned {}",
                resp.status()
            )));
        }

        let block: LatestBlock = resp
            .json()
            .await
            .map_err(|e| IntegrityError::Serialization(format!("Failed to parse block: {e}")))?;
        block
            .height
            .ok_or_else(|| IntegrityError::Ledger("latest block has no height".into()))
    }

    /// Unspent outputs at `address`. An address never seen on chain has none.
    pub async fn address_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        let resp = self.get(&format!("/addresses/{address}/utxos")).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(IntegrityError::Ledger(format!(
                "Failed to get UTxOs: {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| IntegrityError::Serialization(format!("Failed to parse UTxOs: {e}")))
    }

    /// Submit a signed transaction as raw CBOR.
    ///
    /// Returns the transaction id when Blockfrost reports it (it answers with
    /// a bare JSON string), `None` otherwise.
    pub async fn submit_cbor(&self, cbor: Vec<u8>) -> Result<Option<String>> {
        let resp = self
            .client
            .post(self.url("/tx/submit"))
            .header("project_id", &self.project_id)
            .header(reqwest::header::CONTENT_TYPE, "application/cbor")
            .body(cbor)
            .send()
            .await
            .map_err(|e| {
                IntegrityError::AnchorServiceUnavailable(format!("Blockfrost submit failed: {e}"))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IntegrityError::Ledger(format!(
                "Transaction submission failed: {status} - {body}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| {
                IntegrityError::Serialization(format!("Failed to parse submit response: {e}"))
            })?;
        Ok(body.as_str().map(str::to_string))
    }
}
