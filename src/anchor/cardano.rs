/// Cardano ledger client: Blockfrost for reads, `cardano-cli` for writes.
use async_trait::async_trait;

use super::blockfrost::BlockfrostClient;
use super::cardano_cli::CardanoCliSubmitter;
use super::{LedgerClient, LedgerTransaction, SubmissionPayload};
use crate::error::{IntegrityError, Result};

pub struct CardanoLedger {
    network: String,
    blockfrost: BlockfrostClient,
    /// Absent when no signing key or payment address is configured;
    /// queries still work, submissions fail.
    submitter: Option<CardanoCliSubmitter>,
}

impl CardanoLedger {
    pub fn new(
        network: impl Into<String>,
        blockfrost: BlockfrostClient,
        submitter: Option<CardanoCliSubmitter>,
    ) -> Self {
        Self {
            network: network.into(),
            blockfrost,
            submitter,
        }
    }
}

#[async_trait]
impl LedgerClient for CardanoLedger {
    fn network(&self) -> &str {
        &self.network
    }

    async fn submit(&self, payload: &SubmissionPayload) -> Result<String> {
        let submitter = self.submitter.as_ref().ok_or_else(|| {
            IntegrityError::AnchorServiceUnavailable(
                "no signing key or payment address configured".into(),
            )
        })?;
        submitter.submit(payload).await
    }

    async fn query_transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>> {
        let tx = self.blockfrost.transaction(tx_id).await?;
        Ok(tx.map(|tx| LedgerTransaction {
            hash: tx.hash,
            block_height: tx.block_height,
            block_time: tx.block_time,
            slot: tx.slot,
        }))
    }

    async fn latest_block_height(&self) -> Result<i64> {
        self.blockfrost.latest_block_height().await
    }
}
