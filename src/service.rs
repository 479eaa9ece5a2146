/// The integrity subsystem's public operations.
///
/// ```text
/// anchor_report:  Report ─▶ EvidenceDocument ─▶ encode ─▶ fingerprint
///                    ─▶ ContentStore::put (best-effort)
///                    ─▶ AnchorService::submit (never fails)
///                    ─▶ AnchorStore::create ─▶ Report updated
///
/// verify_integrity: Report (current) ─▶ fingerprint ─▶ compare with anchor
/// ```
///
/// Every operation that changes state takes the acting principal as an
/// explicit [`Actor`] and records it on its log line.
use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::anchor::explorer::{self, ExplorerLink};
use crate::anchor::refresh::{ConfirmationRefresher, RefreshSummary};
use crate::anchor::AnchorService;
use crate::error::{IntegrityError, Result};
use crate::evidence::{self, EvidenceDocument, Fingerprint};
use crate::integrity::{IntegrityVerifier, VerificationResult};
use crate::state::models::{
    Actor, AnchorMetadata, AnchorRecord, AnchorStatus, NewAnchorRecord, NewReport, Report,
    ReportAnchoring,
};
use crate::state::{AnchorStore, ReportRepository};
use crate::storage::ContentStore;

/// Result of [`IntegrityService::anchor_report`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorOutcome {
    pub report_id: String,
    /// True when the report already had an anchor and nothing was submitted.
    pub already_anchored: bool,
    pub transaction_id: Option<String>,
    pub fingerprint: Fingerprint,
    pub status: AnchorStatus,
    pub simulated: bool,
    pub content_id: Option<String>,
    /// Broadcast error that caused a fallback to simulation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnchorOutcome {
    fn existing(record: &AnchorRecord) -> Self {
        Self {
            report_id: record.report_id.clone(),
            already_anchored: true,
            transaction_id: record.transaction_id.clone(),
            fingerprint: record.fingerprint.clone(),
            status: record.status,
            simulated: record.metadata.simulated,
            content_id: record.content_id.clone(),
            error: None,
        }
    }
}

/// Display form of an anchor record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorView {
    pub report_id: String,
    pub fingerprint: Fingerprint,
    pub transaction_id: Option<String>,
    pub status: AnchorStatus,
    pub confirmations: i64,
    pub block_height: Option<i64>,
    pub network: String,
    pub simulated: bool,
    pub content_id: Option<String>,
    pub content_url: Option<String>,
    pub explorer_links: Vec<ExplorerLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub confirmed_at: Option<chrono::DateTime<Utc>>,
    pub updated_at: chrono::DateTime<Utc>,
}

/// Result of [`IntegrityService::search_by_hash`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub found: bool,
    /// "fingerprint" or "transaction_id".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_on: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<AnchorView>,
}

impl SearchResult {
    fn not_found() -> Self {
        Self {
            found: false,
            matched_on: None,
            report: None,
            anchor: None,
        }
    }
}

/// Result of [`IntegrityService::backfill`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillSummary {
    pub anchored: Vec<AnchorOutcome>,
    /// `(report_id, error)` for reports that could not be anchored.
    pub failed: Vec<(String, String)>,
}

/// Attempts at claiming a reference code before giving up.
const REFERENCE_CODE_ATTEMPTS: u32 = 5;

pub struct IntegrityService {
    reports: Arc<dyn ReportRepository>,
    anchors: Arc<dyn AnchorStore>,
    anchor_service: Arc<AnchorService>,
    content: Option<Arc<dyn ContentStore>>,
    verifier: IntegrityVerifier,
    refresher: ConfirmationRefresher,
    confirmation_threshold: i64,
}

impl IntegrityService {
    pub fn new(
        reports: Arc<dyn ReportRepository>,
        anchors: Arc<dyn AnchorStore>,
        anchor_service: Arc<AnchorService>,
        content: Option<Arc<dyn ContentStore>>,
        confirmation_threshold: i64,
    ) -> Self {
        Self {
            verifier: IntegrityVerifier::new(anchors.clone()),
            refresher: ConfirmationRefresher::new(anchors.clone(), anchor_service.clone()),
            reports,
            anchors,
            anchor_service,
            content,
            confirmation_threshold: confirmation_threshold.max(1),
        }
    }

    async fn load_report(&self, report_id: &str) -> Result<Report> {
        self.reports
            .get(report_id)
            .await?
            .ok_or_else(|| IntegrityError::ReportNotFound(report_id.to_string()))
    }

    /// File a new report under the next free reference code.
    ///
    /// A code taken by a concurrent insert is retried with a fresh one.
    pub async fn create_report(&self, actor: &Actor, input: NewReport) -> Result<Report> {
        input.validate()?;

        let mut attempt = 1;
        let report = loop {
            let now = Utc::now();
            let reference_code = self.reports.next_reference_code(now.year()).await?;
            let report = Report::new(reference_code, input.clone(), now);
            match self.reports.insert(&report).await {
                Ok(()) => break report,
                Err(IntegrityError::DuplicateReference(code))
                    if attempt < REFERENCE_CODE_ATTEMPTS =>
                {
                    debug!(reference_code = %code, attempt, "Reference code taken, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            actor = %actor,
            report_id = %report.reference_code,
            category = %report.category,
            "Report filed"
        );
        Ok(report)
    }

    /// Anchor a report's fingerprint. Idempotent: a report that already has
    /// an anchor record gets that record back and nothing is submitted.
    pub async fn anchor_report(&self, actor: &Actor, report_id: &str) -> Result<AnchorOutcome> {
        let report = self.load_report(report_id).await?;

        if let Some(existing) = self.anchors.get(report_id).await? {
            info!(actor = %actor, report_id = %report_id, "Report already anchored");
            return Ok(AnchorOutcome::existing(&existing));
        }

        let canonical = evidence::encode(&EvidenceDocument::from_report(&report))?;
        let fingerprint = evidence::fingerprint(&canonical);

        let content_id = self.store_document(report_id, &canonical).await;

        let reporter = report.reporter_info();
        let submission = self
            .anchor_service
            .submit(
                report_id,
                &fingerprint,
                report.category,
                report.is_anonymous,
                reporter.as_ref(),
            )
            .await;

        let new_record = NewAnchorRecord {
            report_id: report_id.to_string(),
            fingerprint: fingerprint.clone(),
            content_id: content_id.clone(),
            transaction_id: Some(submission.transaction_id.clone()),
            status: submission.status,
            network: self.anchor_service.network().to_string(),
            metadata: AnchorMetadata {
                submission: submission.payload,
                submitted_at: submission.submitted_at,
                simulated: submission.simulated,
                submission_error: submission.error.clone(),
                explorer_links: submission.explorer_links,
                failure_reason: None,
            },
        };

        let record = match self.anchors.create(new_record).await {
            Ok(record) => record,
            Err(IntegrityError::DuplicateAnchor(_)) => {
                // Lost a race with a concurrent anchor of the same report.
                let existing = self
                    .anchors
                    .get(report_id)
                    .await?
                    .ok_or_else(|| IntegrityError::AnchorNotFound(report_id.to_string()))?;
                return Ok(AnchorOutcome::existing(&existing));
            }
            Err(e) => return Err(e),
        };

        // Only the anchoring columns are written; edits saved while the
        // submission was in flight are kept.
        let stored = self
            .reports
            .mark_anchored(
                report_id,
                &ReportAnchoring {
                    evidence_hash: fingerprint.to_string(),
                    transaction_hash: record.transaction_id.clone(),
                    evidence_cid: content_id.clone(),
                },
            )
            .await?;
        if EvidenceDocument::from_report(&stored).fingerprint()? != fingerprint {
            warn!(
                actor = %actor,
                report_id = %report_id,
                "Report changed while anchoring; it no longer matches the anchored fingerprint"
            );
        }

        info!(
            actor = %actor,
            report_id = %report_id,
            fingerprint = %fingerprint,
            tx_id = ?record.transaction_id,
            status = %record.status,
            simulated = record.metadata.simulated,
            "Report anchored"
        );

        Ok(AnchorOutcome {
            report_id: report_id.to_string(),
            already_anchored: false,
            transaction_id: record.transaction_id,
            fingerprint,
            status: record.status,
            simulated: record.metadata.simulated,
            content_id,
            error: submission.error,
        })
    }

    async fn store_document(&self, report_id: &str, canonical: &[u8]) -> Option<String> {
        let store = self.content.as_ref()?;
        match store.put(canonical).await {
            Ok(put) => Some(put.content_id),
            Err(e) => {
                warn!(
                    report_id = %report_id,
                    store = store.name(),
                    error = %e,
                    "Evidence document upload failed, anchoring without content id"
                );
                None
            }
        }
    }

    fn view(&self, record: &AnchorRecord) -> AnchorView {
        let simulated = record.metadata.simulated;
        let explorer_links = match (&record.transaction_id, simulated) {
            (Some(tx), false) if record.metadata.explorer_links.is_empty() => {
                explorer::links(&record.network, tx)
            }
            _ => record.metadata.explorer_links.clone(),
        };
        let content_url = match (&self.content, &record.content_id) {
            (Some(store), Some(id)) => store.retrieval_url(id),
            _ => None,
        };

        AnchorView {
            report_id: record.report_id.clone(),
            fingerprint: record.fingerprint.clone(),
            transaction_id: record.transaction_id.clone(),
            status: record.status,
            confirmations: record.confirmations,
            block_height: record.block_height,
            network: record.network.clone(),
            simulated,
            content_id: record.content_id.clone(),
            content_url,
            explorer_links,
            submission_error: record.metadata.submission_error.clone(),
            failure_reason: record.metadata.failure_reason.clone(),
            created_at: record.created_at,
            confirmed_at: record.confirmed_at,
            updated_at: record.updated_at,
        }
    }

    /// Anchor record for a report, or `None` when the report is not anchored.
    pub async fn get_anchor_status(&self, report_id: &str) -> Result<Option<AnchorView>> {
        let record = self.anchors.get(report_id).await?;
        Ok(record.map(|r| self.view(&r)))
    }

    /// Verify a report against its anchored fingerprint.
    pub async fn verify_integrity(&self, report_id: &str) -> Result<VerificationResult> {
        let Some(report) = self.reports.get(report_id).await? else {
            return Ok(VerificationResult::ReportNotFound {
                report_id: report_id.to_string(),
            });
        };

        let result = self.verifier.verify(&report).await?;
        if result.is_tampered() {
            warn!(report_id = %report_id, "Fingerprint mismatch: report modified after anchoring");
        }
        Ok(result)
    }

    /// Reconcile pending anchors with the ledger.
    /// `min_confirmations` defaults to the configured threshold.
    pub async fn refresh_confirmations(
        &self,
        actor: &Actor,
        max_count: usize,
        min_confirmations: Option<i64>,
    ) -> Result<Vec<RefreshSummary>> {
        let threshold = min_confirmations.unwrap_or(self.confirmation_threshold);
        self.refresher.run(actor, max_count, threshold).await
    }

    /// Find an anchor by fingerprint, then by transaction id.
    pub async fn search_by_hash(&self, hash: &str) -> Result<SearchResult> {
        let hash = hash.trim();
        if hash.is_empty() {
            return Ok(SearchResult::not_found());
        }

        let (record, matched_on) = match self.anchors.find_by_fingerprint(hash).await? {
            Some(record) => (record, "fingerprint"),
            None => match self.anchors.find_by_transaction(hash).await? {
                Some(record) => (record, "transaction_id"),
                None => return Ok(SearchResult::not_found()),
            },
        };

        let report = self.reports.get(&record.report_id).await?;
        Ok(SearchResult {
            found: true,
            matched_on: Some(matched_on),
            report,
            anchor: Some(self.view(&record)),
        })
    }

    /// Refuse deletion of a report that has an anchor record.
    pub async fn ensure_deletable(&self, report_id: &str) -> Result<()> {
        match self.anchors.get(report_id).await? {
            Some(record) => Err(IntegrityError::DeletionRefused {
                report_id: report_id.to_string(),
                transaction_id: record.transaction_id.unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }

    pub async fn delete_report(&self, actor: &Actor, report_id: &str) -> Result<()> {
        if let Err(e) = self.ensure_deletable(report_id).await {
            warn!(actor = %actor, report_id = %report_id, "Deletion of anchored report refused");
            return Err(e);
        }
        if !self.reports.delete(report_id).await? {
            return Err(IntegrityError::ReportNotFound(report_id.to_string()));
        }
        info!(actor = %actor, report_id = %report_id, "Report deleted");
        Ok(())
    }

    /// Anchor up to `limit` reports that have no anchor record yet.
    pub async fn backfill(&self, actor: &Actor, limit: usize) -> Result<BackfillSummary> {
        let pending = self.reports.list_unanchored(limit).await?;
        info!(actor = %actor, candidates = pending.len(), "Backfilling unanchored reports");

        let mut summary = BackfillSummary::default();
        for report in pending {
            match self.anchor_report(actor, &report.reference_code).await {
                Ok(outcome) => summary.anchored.push(outcome),
                Err(e) => {
                    error!(
                        actor = %actor,
                        report_id = %report.reference_code,
                        error = %e,
                        "Backfill anchoring failed"
                    );
                    summary.failed.push((report.reference_code, e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    /// Operator transition of a pending or submitted anchor to `Failed`.
    pub async fn mark_anchor_failed(
        &self,
        actor: &Actor,
        report_id: &str,
        reason: &str,
    ) -> Result<AnchorRecord> {
        let record = self.anchors.mark_failed(report_id, reason).await?;
        warn!(
            actor = %actor,
            report_id = %report_id,
            reason = %reason,
            "Anchor marked failed"
        );
        Ok(record)
    }
}
