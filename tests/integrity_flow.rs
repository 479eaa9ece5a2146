//! End-to-end flow over in-memory stores: file, anchor, tamper, re-anchor,
//! confirm and search.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use evidence_anchor::anchor::{
    AnchorService, LedgerClient, LedgerTransaction, SubmissionPayload, DEFAULT_REQUEST_TIMEOUT,
};
use evidence_anchor::crypto::hash::content_hash;
use evidence_anchor::error::{IntegrityError, Result};
use evidence_anchor::evidence::{
    encode, fingerprint, EvidenceDocument, EvidenceField, FieldValue,
};
use evidence_anchor::integrity::VerificationResult;
use evidence_anchor::service::IntegrityService;
use evidence_anchor::state::memory::{MemoryAnchorStore, MemoryReportRepository};
use evidence_anchor::state::models::{Actor, AnchorStatus, NewReport, ReportCategory};
use evidence_anchor::state::{AnchorStore, ReportRepository};
use evidence_anchor::storage::memory::{derived_content_id, MemoryStore};
use evidence_anchor::storage::{ContentStore, PutResult};

/// Ledger that only answers queries; submissions are refused.
#[derive(Default)]
struct ObservingLedger {
    heights: Mutex<HashMap<String, i64>>,
    tip: Mutex<i64>,
}

impl ObservingLedger {
    fn include(&self, tx_id: &str, height: i64) {
        self.heights.lock().unwrap().insert(tx_id.to_string(), height);
    }

    fn set_tip(&self, height: i64) {
        *self.tip.lock().unwrap() = height;
    }
}

#[async_trait]
impl LedgerClient for ObservingLedger {
    fn network(&self) -> &str {
        "preview"
    }

    async fn submit(&self, _payload: &SubmissionPayload) -> Result<String> {
        Err(IntegrityError::Ledger("read-only ledger".into()))
    }

    async fn query_transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>> {
        Ok(self.heights.lock().unwrap().get(tx_id).map(|h| LedgerTransaction {
            hash: tx_id.to_string(),
            block_height: Some(*h),
            block_time: Some(1_735_689_600),
            slot: Some(*h * 20),
        }))
    }

    async fn latest_block_height(&self) -> Result<i64> {
        Ok(*self.tip.lock().unwrap())
    }
}

struct Harness {
    reports: Arc<MemoryReportRepository>,
    anchors: Arc<MemoryAnchorStore>,
    service: IntegrityService,
}

fn harness() -> Harness {
    let reports = Arc::new(MemoryReportRepository::new());
    let anchors = Arc::new(MemoryAnchorStore::new());
    let service = IntegrityService::new(
        reports.clone(),
        anchors.clone(),
        Arc::new(AnchorService::simulated("preview")),
        Some(Arc::new(MemoryStore::new())),
        1,
    );
    Harness {
        reports,
        anchors,
        service,
    }
}

fn theft_report() -> NewReport {
    NewReport {
        category: ReportCategory::Theft,
        description: "bike stolen".into(),
        location_description: "Kigali".into(),
        latitude: None,
        longitude: None,
        is_anonymous: true,
        reporter: None,
        media_cid: None,
    }
}

#[test]
fn encoding_is_stable_across_calls() {
    let doc = EvidenceDocument::from_fields([
        (EvidenceField::ReportId, FieldValue::text("R1")),
        (EvidenceField::ReferenceCode, FieldValue::text("R1")),
        (EvidenceField::Category, FieldValue::text("theft")),
        (EvidenceField::Description, FieldValue::text("bike stolen")),
        (EvidenceField::Latitude, FieldValue::Null),
        (EvidenceField::Longitude, FieldValue::Null),
        (EvidenceField::LocationDescription, FieldValue::text("Kigali")),
        (EvidenceField::IsAnonymous, FieldValue::Bool(true)),
        (EvidenceField::MediaCid, FieldValue::Null),
        (
            EvidenceField::Timestamp,
            FieldValue::Timestamp(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
        ),
    ]);

    let first = fingerprint(&encode(&doc).unwrap());
    let second = fingerprint(&encode(&doc.clone()).unwrap());
    assert_eq!(first, second);
    assert_eq!(first.as_str().len(), 64);
    assert!(first.as_str().chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
}

#[tokio::test]
async fn anchor_tamper_confirm_and_search() {
    let h = harness();
    let clerk = Actor::new("clerk-7");

    let report = h.service.create_report(&clerk, theft_report()).await.unwrap();
    let id = report.reference_code.clone();

    // Broadcasting disabled: the anchor is simulated and stays pending.
    let outcome = h.service.anchor_report(&clerk, &id).await.unwrap();
    assert_eq!(outcome.status, AnchorStatus::Pending);
    assert!(outcome.simulated);
    assert!(!outcome.already_anchored);
    let record = h.anchors.get(&id).await.unwrap().unwrap();
    assert_eq!(record.fingerprint, outcome.fingerprint);
    assert!(h.service.verify_integrity(&id).await.unwrap().is_verified());

    // Edit the stored report behind the service's back.
    let mut edited = h.reports.get(&id).await.unwrap().unwrap();
    edited.description = "nothing was stolen".into();
    h.reports.save(&edited).await.unwrap();

    match h.service.verify_integrity(&id).await.unwrap() {
        VerificationResult::Tampered { tampered_fields, .. } => {
            assert!(tampered_fields
                .iter()
                .any(|f| f.field == EvidenceField::Description
                    && f.current_value == "nothing was stolen"));
        }
        other => panic!("expected Tampered, got {other:?}"),
    }

    // Anchoring again returns the existing record.
    let again = h.service.anchor_report(&clerk, &id).await.unwrap();
    assert!(again.already_anchored);
    assert_eq!(again.fingerprint, outcome.fingerprint);
    assert_eq!(h.anchors.list_refreshable(10).await.unwrap().len(), 1);

    // A refresh against a ledger that has the transaction three blocks deep.
    let tx_id = outcome.transaction_id.clone().unwrap();
    let ledger = Arc::new(ObservingLedger::default());
    ledger.include(&tx_id, 100);
    ledger.set_tip(102);
    let observer = IntegrityService::new(
        h.reports.clone(),
        h.anchors.clone(),
        Arc::new(AnchorService::broadcasting(ledger, DEFAULT_REQUEST_TIMEOUT)),
        None,
        1,
    );

    let scheduler = Actor::system();
    let summaries = observer
        .refresh_confirmations(&scheduler, 10, Some(1))
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].new_status, AnchorStatus::Confirmed);
    assert_eq!(summaries[0].confirmations, 3);

    let confirmed = h.anchors.get(&id).await.unwrap().unwrap();
    assert_eq!(confirmed.status, AnchorStatus::Confirmed);
    assert_eq!(confirmed.confirmations, 3);
    assert_eq!(confirmed.block_height, Some(100));
    assert!(confirmed.confirmed_at.is_some());

    // Search by the anchored fingerprint, then by something unknown.
    let found = h
        .service
        .search_by_hash(outcome.fingerprint.as_str())
        .await
        .unwrap();
    assert!(found.found);
    assert_eq!(found.matched_on, Some("fingerprint"));
    assert_eq!(found.report.unwrap().reference_code, id);
    assert_eq!(found.anchor.unwrap().status, AnchorStatus::Confirmed);

    let missing = h.service.search_by_hash(&"0".repeat(64)).await.unwrap();
    assert!(!missing.found);
    assert!(missing.report.is_none() && missing.anchor.is_none());
}

#[tokio::test]
async fn anchored_report_cannot_be_deleted() {
    let h = harness();
    let admin = Actor::new("admin");
    let report = h.service.create_report(&admin, theft_report()).await.unwrap();
    h.service
        .anchor_report(&admin, &report.reference_code)
        .await
        .unwrap();

    let err = h
        .service
        .delete_report(&admin, &report.reference_code)
        .await
        .unwrap_err();
    assert!(matches!(err, IntegrityError::DeletionRefused { .. }));
    assert!(h.reports.get(&report.reference_code).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_anchor_is_left_alone_by_refresh() {
    let h = harness();
    let operator = Actor::new("operator");
    let report = h.service.create_report(&operator, theft_report()).await.unwrap();
    let id = report.reference_code;
    h.service.anchor_report(&operator, &id).await.unwrap();

    let failed = h
        .service
        .mark_anchor_failed(&operator, &id, "wallet drained")
        .await
        .unwrap();
    assert_eq!(failed.status, AnchorStatus::Failed);
    assert_eq!(failed.metadata.failure_reason.as_deref(), Some("wallet drained"));

    assert!(h
        .service
        .refresh_confirmations(&operator, 10, None)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        h.service.mark_anchor_failed(&operator, &id, "again").await,
        Err(IntegrityError::InvalidTransition { .. })
    ));
}

/// Content store that saves a staff edit to the report while the evidence
/// document is being uploaded.
struct EditDuringUpload {
    reports: Arc<MemoryReportRepository>,
    report_id: Mutex<Option<String>>,
}

#[async_trait]
impl ContentStore for EditDuringUpload {
    fn name(&self) -> &str {
        "edit-during-upload"
    }

    async fn put(&self, data: &[u8]) -> Result<PutResult> {
        let report_id = self.report_id.lock().unwrap().clone();
        if let Some(id) = report_id {
            let mut report = self.reports.get(&id).await?.unwrap();
            report.description = "staff edit during anchoring".into();
            self.reports.save(&report).await?;
        }
        Ok(PutResult {
            content_id: derived_content_id(data),
            content_hash: content_hash(data),
            size: data.len() as u64,
        })
    }

    async fn get(&self, _content_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

#[tokio::test]
async fn edit_saved_during_anchoring_is_kept() {
    let reports = Arc::new(MemoryReportRepository::new());
    let anchors = Arc::new(MemoryAnchorStore::new());
    let store = Arc::new(EditDuringUpload {
        reports: reports.clone(),
        report_id: Mutex::new(None),
    });
    let service = IntegrityService::new(
        reports.clone(),
        anchors.clone(),
        Arc::new(AnchorService::simulated("preview")),
        Some(store.clone()),
        1,
    );
    let clerk = Actor::new("clerk-7");

    let report = service.create_report(&clerk, theft_report()).await.unwrap();
    let id = report.reference_code.clone();
    *store.report_id.lock().unwrap() = Some(id.clone());

    let outcome = service.anchor_report(&clerk, &id).await.unwrap();

    let stored = reports.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.description, "staff edit during anchoring");
    assert!(stored.is_hash_anchored);
    assert_eq!(stored.evidence_hash.as_deref(), Some(outcome.fingerprint.as_str()));
    assert_eq!(stored.transaction_hash, outcome.transaction_id);
    assert_eq!(stored.evidence_cid, outcome.content_id);

    // The fingerprint was taken before the edit, so the edit shows up.
    match service.verify_integrity(&id).await.unwrap() {
        VerificationResult::Tampered { tampered_fields, .. } => {
            assert!(tampered_fields.iter().any(|f| f.field == EvidenceField::Description
                && f.current_value == "staff edit during anchoring"));
        }
        other => panic!("expected Tampered, got {other:?}"),
    }
}
