//! Fixtures shared by unit tests.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use crate::anchor::{LedgerClient, LedgerTransaction, SubmissionPayload};
use crate::crypto::hash;
use crate::error::{IntegrityError, Result};
use crate::evidence::{fingerprint, Coordinate};
use crate::state::models::*;
use crate::storage::{ContentStore, PutResult};

/// A non-anonymous theft report filed on 2025-01-01.
pub fn report(reference_code: &str) -> Report {
    let created_at = Utc.with_ymd_and_hms(2025, 1, 1, 8, 30, 0).unwrap();
    Report {
        id: Uuid::now_v7(),
        reference_code: reference_code.to_string(),
        category: ReportCategory::Theft,
        description: "bike stolen".to_string(),
        location_description: "Kigali".to_string(),
        latitude: Some(Coordinate::from_micro_degrees(-1_950_000)),
        longitude: Some(Coordinate::from_micro_degrees(30_060_000)),
        is_anonymous: false,
        reporter_name: "Jane".to_string(),
        reporter_phone: "0788000000".to_string(),
        reporter_email: "jane@example.org".to_string(),
        media_cid: None,
        evidence_cid: None,
        evidence_hash: None,
        transaction_hash: None,
        is_hash_anchored: false,
        created_at,
        updated_at: created_at,
    }
}

fn metadata(report_id: &str) -> AnchorMetadata {
    AnchorMetadata {
        submission: SubmissionPayload {
            action: crate::anchor::ANCHOR_ACTION.to_string(),
            report_id: report_id.to_string(),
            evidence_hash: fingerprint(report_id.as_bytes()).to_string(),
            category: "theft".to_string(),
            is_anonymous: false,
            timestamp: 1_735_720_200_000,
            network: "preview".to_string(),
            reporter: None,
        },
        submitted_at: Utc::now(),
        simulated: true,
        submission_error: None,
        explorer_links: Vec::new(),
        failure_reason: None,
    }
}

/// A stored anchor record in `status`, fingerprinted from the report id.
pub fn anchor_record(report_id: &str, status: AnchorStatus) -> AnchorRecord {
    let now = Utc::now();
    AnchorRecord {
        id: Uuid::now_v7(),
        report_id: report_id.to_string(),
        fingerprint: fingerprint(report_id.as_bytes()),
        content_id: None,
        transaction_id: Some(hash::sha256_hex(report_id.as_bytes())),
        block_height: None,
        confirmations: 0,
        status,
        network: "preview".to_string(),
        metadata: metadata(report_id),
        created_at: now,
        confirmed_at: (status == AnchorStatus::Confirmed).then_some(now),
        updated_at: now,
    }
}

/// Input for a pending anchor with transaction `tx_id`.
pub fn new_anchor(report_id: &str, tx_id: &str) -> NewAnchorRecord {
    NewAnchorRecord {
        report_id: report_id.to_string(),
        fingerprint: fingerprint(report_id.as_bytes()),
        content_id: None,
        transaction_id: Some(tx_id.to_string()),
        status: AnchorStatus::Pending,
        network: "preview".to_string(),
        metadata: metadata(report_id),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Failing,
    Hanging,
}

#[derive(Default)]
struct LedgerState {
    /// tx id -> block height (None while in the mempool)
    transactions: HashMap<String, Option<i64>>,
    tip: i64,
    submissions: usize,
}

/// In-memory ledger with scriptable transactions and chain tip.
pub struct StubLedger {
    network: String,
    mode: Mode,
    state: Mutex<LedgerState>,
}

impl StubLedger {
    fn with_mode(network: &str, mode: Mode) -> Self {
        Self {
            network: network.to_string(),
            mode,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn new(network: &str) -> Self {
        Self::with_mode(network, Mode::Normal)
    }

    /// Every call fails as if the wallet or network were down.
    pub fn failing(network: &str) -> Self {
        Self::with_mode(network, Mode::Failing)
    }

    /// Submissions never complete.
    pub fn hanging(network: &str) -> Self {
        Self::with_mode(network, Mode::Hanging)
    }

    /// Transaction id this ledger assigns to a report's submission.
    pub fn tx_id_for(report_id: &str) -> String {
        hash::sha256_hex(format!("ledger:{report_id}").as_bytes())
    }

    pub fn set_transaction(&self, tx_id: &str, block_height: Option<i64>) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(tx_id.to_string(), block_height);
    }

    pub fn set_tip(&self, height: i64) {
        self.state.lock().unwrap().tip = height;
    }

    pub fn submissions(&self) -> usize {
        self.state.lock().unwrap().submissions
    }

    fn check(&self) -> Result<()> {
        match self.mode {
            Mode::Failing => Err(IntegrityError::AnchorServiceUnavailable(
                "wallet unavailable".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerClient for StubLedger {
    fn network(&self) -> &str {
        &self.network
    }

    async fn submit(&self, payload: &SubmissionPayload) -> Result<String> {
        if self.mode == Mode::Hanging {
            std::future::pending::<()>().await;
        }
        self.check()?;
        let tx_id = Self::tx_id_for(&payload.report_id);
        let mut state = self.state.lock().unwrap();
        state.submissions += 1;
        state.transactions.insert(tx_id.clone(), None);
        Ok(tx_id)
    }

    async fn query_transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.transactions.get(tx_id).map(|height| LedgerTransaction {
            hash: tx_id.to_string(),
            block_height: *height,
            block_time: height.map(|h| 1_735_689_600 + h * 20),
            slot: *height,
        }))
    }

    async fn latest_block_height(&self) -> Result<i64> {
        self.check()?;
        Ok(self.state.lock().unwrap().tip)
    }
}

/// Content store that rejects every request.
pub struct FailingStore;

#[async_trait]
impl ContentStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn put(&self, _data: &[u8]) -> Result<PutResult> {
        Err(IntegrityError::ContentStore("node offline".into()))
    }

    async fn get(&self, _content_id: &str) -> Result<Option<Vec<u8>>> {
        Err(IntegrityError::ContentStore("node offline".into()))
    }
}
