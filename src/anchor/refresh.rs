/// Confirmation refresh: reconcile local anchor records with the ledger.
///
/// Selects records still `Pending` or `Submitted`, least recently updated
/// first, queries each transaction and applies the status machine:
///
/// ```text
/// found, depth >= threshold ──▶ Confirmed
/// found, depth <  threshold ──▶ Submitted   (from Pending)
/// not found                 ──▶ unchanged
/// ```
///
/// Only one pass runs at a time. A failure on one record is logged and
/// reported in its summary row; the rest of the batch continues.
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{AnchorService, TxStatus};
use crate::error::{IntegrityError, Result};
use crate::state::models::{Actor, AnchorRecord, AnchorStatus, ConfirmationUpdate};
use crate::state::AnchorStore;

/// Outcome for one record in a refresh pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub report_id: String,
    pub transaction_id: String,
    pub old_status: AnchorStatus,
    pub new_status: AnchorStatus,
    pub confirmations: i64,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status a record should move to after a ledger poll.
///
/// A threshold below 1 is treated as 1: a transaction is never confirmed
/// before it is in a block.
pub fn next_status(
    current: AnchorStatus,
    status: &TxStatus,
    min_confirmations: i64,
) -> AnchorStatus {
    if current.is_terminal() || !status.found {
        return current;
    }
    let threshold = min_confirmations.max(1);
    if status.confirmations.unwrap_or(0) >= threshold {
        AnchorStatus::Confirmed
    } else {
        AnchorStatus::Submitted
    }
}

pub struct ConfirmationRefresher {
    store: Arc<dyn AnchorStore>,
    anchors: Arc<AnchorService>,
    run_lock: Mutex<()>,
}

impl ConfirmationRefresher {
    pub fn new(store: Arc<dyn AnchorStore>, anchors: Arc<AnchorService>) -> Self {
        Self {
            store,
            anchors,
            run_lock: Mutex::new(()),
        }
    }

    /// Run one refresh pass over at most `max_count` records.
    ///
    /// Fails with [`IntegrityError::RefreshInProgress`] if another pass is
    /// running, or with a storage error if the records cannot be listed.
    pub async fn run(
        &self,
        actor: &Actor,
        max_count: usize,
        min_confirmations: i64,
    ) -> Result<Vec<RefreshSummary>> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| IntegrityError::RefreshInProgress)?;

        let records = self.store.list_refreshable(max_count).await?;
        info!(
            actor = %actor,
            candidates = records.len(),
            min_confirmations,
            "Refreshing anchor confirmations"
        );

        let mut summaries = Vec::with_capacity(records.len());
        for record in records {
            if let Some(summary) = self.refresh_one(record, min_confirmations).await {
                summaries.push(summary);
            }
        }

        let confirmed = summaries
            .iter()
            .filter(|s| {
                s.new_status == AnchorStatus::Confirmed && s.old_status != AnchorStatus::Confirmed
            })
            .count();
        info!(
            actor = %actor,
            processed = summaries.len(),
            confirmed,
            "Confirmation refresh complete"
        );
        Ok(summaries)
    }

    async fn refresh_one(
        &self,
        record: AnchorRecord,
        min_confirmations: i64,
    ) -> Option<RefreshSummary> {
        let tx_id = record.transaction_id.clone()?;
        let status = self.anchors.query_status(&tx_id).await;
        let new_status = next_status(record.status, &status, min_confirmations);

        // Records not found are still written so they rotate to the back
        // of the oldest-updated-first queue.
        let update = ConfirmationUpdate {
            report_id: record.report_id.clone(),
            confirmations: status.confirmations.unwrap_or(0),
            block_height: status.block_height,
            status: new_status,
        };

        let mut summary = RefreshSummary {
            report_id: record.report_id.clone(),
            transaction_id: tx_id,
            old_status: record.status,
            new_status,
            confirmations: record.confirmations,
            found: status.found,
            error: None,
        };

        match self.store.update_confirmation(update).await {
            Ok(updated) => {
                summary.new_status = updated.status;
                summary.confirmations = updated.confirmations;
                if updated.status != record.status {
                    info!(
                        report_id = %updated.report_id,
                        old_status = %record.status,
                        new_status = %updated.status,
                        confirmations = updated.confirmations,
                        "Anchor status changed"
                    );
                }
            }
            Err(e) => {
                warn!(report_id = %record.report_id, error = %e, "Confirmation update failed");
                summary.new_status = record.status;
                summary.error = Some(e.to_string());
            }
        }

        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::DEFAULT_REQUEST_TIMEOUT;
    use crate::state::memory::MemoryAnchorStore;
    use crate::test_support::{self, StubLedger};

    fn found(confirmations: Option<i64>) -> TxStatus {
        TxStatus {
            found: true,
            confirmations,
            block_height: Some(100),
            block_time: None,
        }
    }

    #[test]
    fn test_next_status_rules() {
        use AnchorStatus::*;
        assert_eq!(next_status(Pending, &TxStatus::not_found(), 1), Pending);
        assert_eq!(next_status(Pending, &found(Some(0)), 1), Submitted);
        assert_eq!(next_status(Pending, &found(None), 1), Submitted);
        assert_eq!(next_status(Pending, &found(Some(3)), 1), Confirmed);
        assert_eq!(next_status(Submitted, &found(Some(2)), 3), Submitted);
        assert_eq!(next_status(Submitted, &found(Some(3)), 3), Confirmed);
        assert_eq!(next_status(Submitted, &found(Some(0)), 0), Submitted);
        assert_eq!(next_status(Failed, &found(Some(9)), 1), Failed);
    }

    async fn setup(ledger: Arc<StubLedger>) -> (Arc<MemoryAnchorStore>, ConfirmationRefresher) {
        let store = Arc::new(MemoryAnchorStore::new());
        let anchors = Arc::new(AnchorService::broadcasting(ledger, DEFAULT_REQUEST_TIMEOUT));
        let refresher = ConfirmationRefresher::new(store.clone(), anchors);
        (store, refresher)
    }

    #[tokio::test]
    async fn test_refresh_confirms_and_advances() {
        let ledger = Arc::new(StubLedger::new("preview"));
        ledger.set_transaction("tx1", Some(100));
        ledger.set_transaction("tx2", None);
        ledger.set_tip(102);
        let (store, refresher) = setup(ledger).await;

        store.create(test_support::new_anchor("RRS-2025-00001", "tx1")).await.unwrap();
        store.create(test_support::new_anchor("RRS-2025-00002", "tx2")).await.unwrap();
        store.create(test_support::new_anchor("RRS-2025-00003", "tx3")).await.unwrap();

        let summaries = refresher.run(&Actor::system(), 10, 1).await.unwrap();
        assert_eq!(summaries.len(), 3);

        let r1 = store.get("RRS-2025-00001").await.unwrap().unwrap();
        assert_eq!(r1.status, AnchorStatus::Confirmed);
        assert_eq!(r1.confirmations, 3);
        assert_eq!(r1.block_height, Some(100));

        let r2 = store.get("RRS-2025-00002").await.unwrap().unwrap();
        assert_eq!(r2.status, AnchorStatus::Submitted);

        let r3 = summaries.iter().find(|s| s.report_id == "RRS-2025-00003").unwrap();
        assert!(!r3.found);
        assert_eq!(r3.new_status, AnchorStatus::Pending);
    }

    #[tokio::test]
    async fn test_refresh_never_decreases_confirmations() {
        let ledger = Arc::new(StubLedger::new("preview"));
        ledger.set_transaction("tx1", Some(100));
        ledger.set_tip(104);
        let (store, refresher) = setup(ledger.clone()).await;
        store.create(test_support::new_anchor("RRS-2025-00001", "tx1")).await.unwrap();

        refresher.run(&Actor::system(), 10, 10).await.unwrap();
        assert_eq!(store.get("RRS-2025-00001").await.unwrap().unwrap().confirmations, 5);

        // A lagging node reports an older tip.
        ledger.set_tip(101);
        refresher.run(&Actor::system(), 10, 10).await.unwrap();
        assert_eq!(store.get("RRS-2025-00001").await.unwrap().unwrap().confirmations, 5);

        ledger.set_tip(110);
        refresher.run(&Actor::system(), 10, 10).await.unwrap();
        let record = store.get("RRS-2025-00001").await.unwrap().unwrap();
        assert_eq!(record.confirmations, 11);
        assert_eq!(record.status, AnchorStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_refresh_tolerates_ledger_failure() {
        let (store, refresher) = setup(Arc::new(StubLedger::failing("preview"))).await;
        store.create(test_support::new_anchor("RRS-2025-00001", "tx1")).await.unwrap();

        let summaries = refresher.run(&Actor::system(), 10, 1).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(!summaries[0].found);
        assert_eq!(summaries[0].new_status, AnchorStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_rejected() {
        let (_store, refresher) = setup(Arc::new(StubLedger::new("preview"))).await;
        let _held = refresher.run_lock.lock().await;

        assert!(matches!(
            refresher.run(&Actor::system(), 10, 1).await,
            Err(IntegrityError::RefreshInProgress)
        ));
    }

    #[tokio::test]
    async fn test_refresh_respects_max_count() {
        let ledger = Arc::new(StubLedger::new("preview"));
        let (store, refresher) = setup(ledger).await;
        for i in 1..=5 {
            let id = format!("RRS-2025-{i:05}");
            store.create(test_support::new_anchor(&id, &format!("tx{i}"))).await.unwrap();
        }

        let summaries = refresher.run(&Actor::system(), 2, 1).await.unwrap();
        assert_eq!(summaries.len(), 2);
    }
}
