/// Ledger anchoring of evidence fingerprints.
///
/// An anchor is a transaction on a public ledger whose metadata carries a
/// report's fingerprint. Anchoring is best-effort: [`AnchorService::submit`]
/// never fails. When broadcasting is disabled, or the ledger submission
/// fails or times out, it returns a simulated submission whose transaction
/// id is derived from the payload, so the report is still accepted and can
/// be verified locally.
///
/// ```text
/// fingerprint ──▶ SubmissionPayload ──┬──▶ LedgerClient::submit   (broadcast)
///                                     └──▶ sha256(payload)        (simulated)
/// ```
///
/// The ledger itself sits behind [`LedgerClient`]; [`cardano::CardanoLedger`]
/// implements it with Blockfrost for queries and `cardano-cli` for building
/// and signing transactions.
pub mod blockfrost;
pub mod cardano;
pub mod cardano_cli;
pub mod explorer;
pub mod refresh;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crypto::hash;
use crate::error::{IntegrityError, Result};
use crate::evidence::{canonical, Fingerprint};
use crate::state::models::{AnchorStatus, ReportCategory, ReporterInfo};
use explorer::ExplorerLink;

/// Action tag written into every submission payload.
pub const ANCHOR_ACTION: &str = "anchor_evidence";

/// Default bound on a single ledger call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// What gets anchored for one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub action: String,
    pub report_id: String,
    pub evidence_hash: String,
    pub category: String,
    pub is_anonymous: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub network: String,
    /// Contact details, only for non-anonymous reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<ReporterInfo>,
}

/// Outcome of [`AnchorService::submit`].
#[derive(Debug, Clone, Serialize)]
pub struct AnchorSubmission {
    pub status: AnchorStatus,
    pub transaction_id: String,
    pub simulated: bool,
    pub payload: SubmissionPayload,
    pub explorer_links: Vec<ExplorerLink>,
    /// Why a broadcast attempt fell back to simulation.
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// A transaction as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub hash: String,
    pub block_height: Option<i64>,
    /// Unix seconds.
    pub block_time: Option<i64>,
    pub slot: Option<i64>,
}

/// Confirmation state of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxStatus {
    pub found: bool,
    /// `None` when either the transaction's block or the chain tip is unknown.
    pub confirmations: Option<i64>,
    pub block_height: Option<i64>,
    pub block_time: Option<i64>,
}

impl TxStatus {
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Depth of a transaction below the chain tip, counting its own block.
pub fn confirmation_depth(latest_height: i64, tx_height: i64) -> i64 {
    (latest_height - tx_height + 1).max(0)
}

/// Client for an external ledger.
///
/// Signing material (keys, payment address) belongs to the implementation's
/// own configuration and never passes through this interface.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Network name, e.g. "preview".
    fn network(&self) -> &str;

    /// Build, sign and submit a transaction carrying `payload`.
    /// Returns the transaction id.
    async fn submit(&self, payload: &SubmissionPayload) -> Result<String>;

    /// Look up a transaction. `Ok(None)` means the ledger does not know it.
    async fn query_transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>>;

    /// Height of the current chain tip.
    async fn latest_block_height(&self) -> Result<i64>;
}

/// Submits fingerprints for anchoring and queries their confirmation state.
pub struct AnchorService {
    network: String,
    /// Present only when broadcasting is enabled and credentials are configured.
    ledger: Option<Arc<dyn LedgerClient>>,
    timeout: Duration,
}

impl AnchorService {
    /// A service that only ever produces simulated anchors.
    pub fn simulated(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            ledger: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// A service that broadcasts through `ledger`.
    pub fn broadcasting(ledger: Arc<dyn LedgerClient>, timeout: Duration) -> Self {
        Self {
            network: ledger.network().to_string(),
            ledger: Some(ledger),
            timeout,
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn is_broadcasting(&self) -> bool {
        self.ledger.is_some()
    }

    /// Build the payload anchored for a report.
    pub fn build_payload(
        &self,
        report_id: &str,
        fingerprint: &Fingerprint,
        category: ReportCategory,
        is_anonymous: bool,
        reporter: Option<&ReporterInfo>,
        at: DateTime<Utc>,
    ) -> SubmissionPayload {
        SubmissionPayload {
            action: ANCHOR_ACTION.to_string(),
            report_id: report_id.to_string(),
            evidence_hash: fingerprint.to_string(),
            category: category.as_str().to_string(),
            is_anonymous,
            timestamp: at.timestamp_millis(),
            network: self.network.clone(),
            reporter: if is_anonymous { None } else { reporter.cloned() },
        }
    }

    /// Anchor a fingerprint. Never fails: any broadcast error or timeout
    /// degrades to a simulated submission with `error` set.
    pub async fn submit(
        &self,
        report_id: &str,
        fingerprint: &Fingerprint,
        category: ReportCategory,
        is_anonymous: bool,
        reporter: Option<&ReporterInfo>,
    ) -> AnchorSubmission {
        let submitted_at = Utc::now();
        let payload = self.build_payload(
            report_id,
            fingerprint,
            category,
            is_anonymous,
            reporter,
            submitted_at,
        );

        let Some(ledger) = &self.ledger else {
            info!(report_id = %report_id, "Broadcasting disabled, simulating anchor");
            return simulate(payload, submitted_at, None);
        };

        let attempt = tokio::time::timeout(self.timeout, ledger.submit(&payload)).await;
        let error = match attempt {
            Ok(Ok(tx_id)) => {
                info!(
                    report_id = %report_id,
                    tx_id = %tx_id,
                    network = %self.network,
                    "Anchor transaction submitted"
                );
                return AnchorSubmission {
                    status: AnchorStatus::Submitted,
                    explorer_links: explorer::links(&self.network, &tx_id),
                    transaction_id: tx_id,
                    simulated: false,
                    payload,
                    error: None,
                    submitted_at,
                };
            }
            Ok(Err(e)) => e,
            Err(_) => IntegrityError::AnchorServiceUnavailable(format!(
                "ledger submission timed out after {}s",
                self.timeout.as_secs()
            )),
        };

        warn!(
            report_id = %report_id,
            error = %error,
            "Ledger submission failed, falling back to simulated anchor"
        );
        simulate(payload, submitted_at, Some(error.to_string()))
    }

    /// Query a transaction's confirmation state. Never fails: an unreachable
    /// ledger, missing credentials, or an unknown transaction all yield
    /// `found = false`.
    pub async fn query_status(&self, tx_id: &str) -> TxStatus {
        let Some(ledger) = &self.ledger else {
            return TxStatus::not_found();
        };

        let tx = match tokio::time::timeout(self.timeout, ledger.query_transaction(tx_id)).await {
            Ok(Ok(Some(tx))) => tx,
            Ok(Ok(None)) => return TxStatus::not_found(),
            Ok(Err(e)) => {
                warn!(tx_id = %tx_id, error = %e, "Transaction lookup failed");
                return TxStatus::not_found();
            }
            Err(_) => {
                warn!(tx_id = %tx_id, "Transaction lookup timed out");
                return TxStatus::not_found();
            }
        };

        let confirmations = match tx.block_height {
            Some(height) => {
                match tokio::time::timeout(self.timeout, ledger.latest_block_height()).await {
                    Ok(Ok(latest)) => Some(confirmation_depth(latest, height)),
                    Ok(Err(e)) => {
                        warn!(tx_id = %tx_id, error = %e, "Chain tip lookup failed");
                        None
                    }
                    Err(_) => None,
                }
            }
            None => None,
        };

        TxStatus {
            found: true,
            confirmations,
            block_height: tx.block_height,
            block_time: tx.block_time,
        }
    }
}

/// Deterministic placeholder transaction id: SHA-256 of the payload's
/// key-sorted compact JSON.
pub fn simulated_tx_id(payload: &SubmissionPayload) -> Result<String> {
    let bytes = canonical::to_canonical_json(payload)?;
    Ok(hash::sha256_hex(&bytes))
}

fn simulate(
    payload: SubmissionPayload,
    submitted_at: DateTime<Utc>,
    error: Option<String>,
) -> AnchorSubmission {
    // Serializing a plain struct of strings and integers cannot fail; the
    // fallback keeps the id deterministic if it ever does.
    let transaction_id = simulated_tx_id(&payload).unwrap_or_else(|e| {
        warn!(error = %e, "Payload encoding failed, hashing debug form");
        hash::sha256_hex(format!("{payload:?}").as_bytes())
    });

    AnchorSubmission {
        status: AnchorStatus::Pending,
        transaction_id,
        simulated: true,
        payload,
        explorer_links: Vec::new(),
        error,
        submitted_at,
    }
}
