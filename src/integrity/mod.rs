/// Tamper detection for anchored reports.
///
/// Verification rebuilds the evidence document from the report's current
/// fields, fingerprints it and compares the result with the fingerprint
/// stored on the anchor record. It is a pure read: nothing is written.
///
/// Precision limitation: only one aggregate fingerprint is anchored, so a
/// mismatch proves that *something* changed but not *what*. The
/// `tampered_fields` list of a [`VerificationResult::Tampered`] outcome
/// names every monitored field with its current value; those are the
/// fields that could have changed, not fields proven to have changed.
///
/// The media content id is listed among the monitored fields but is not
/// covered by the fingerprint (see [`crate::evidence`]); changing it alone
/// does not produce a mismatch.
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::evidence::{EvidenceDocument, EvidenceField, Fingerprint};
use crate::state::models::{AnchorRecord, AnchorStatus, Report};
use crate::state::AnchorStore;

/// Current value of one monitored field on a mismatched report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TamperedField {
    pub field: EvidenceField,
    pub current_value: serde_json::Value,
}

/// Outcome of verifying one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationResult {
    ReportNotFound {
        report_id: String,
    },
    NotAnchored {
        report_id: String,
    },
    Verified {
        report_id: String,
        current_fingerprint: Fingerprint,
        anchored_fingerprint: Fingerprint,
        transaction_id: Option<String>,
        anchor_status: AnchorStatus,
        /// Canonical values of the verified document, keyed by field name.
        snapshot: serde_json::Map<String, serde_json::Value>,
    },
    Tampered {
        report_id: String,
        current_fingerprint: Fingerprint,
        anchored_fingerprint: Fingerprint,
        transaction_id: Option<String>,
        anchor_status: AnchorStatus,
        tampered_fields: Vec<TamperedField>,
    },
}

impl VerificationResult {
    pub fn is_anchored(&self) -> bool {
        matches!(
            self,
            VerificationResult::Verified { .. } | VerificationResult::Tampered { .. }
        )
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationResult::Verified { .. })
    }

    pub fn is_tampered(&self) -> bool {
        matches!(self, VerificationResult::Tampered { .. })
    }
}

/// Current value of `field` as shown to reviewers.
///
/// Unlike the evidence document, the media field shows the real content id.
fn current_value(
    report: &Report,
    doc: &EvidenceDocument,
    field: EvidenceField,
) -> serde_json::Value {
    match field {
        EvidenceField::MediaCid => report
            .media_cid
            .clone()
            .map_or(serde_json::Value::Null, serde_json::Value::String),
        other => doc.value_of(other),
    }
}

/// Compare a report's current state with its anchor record.
pub fn compare(report: &Report, anchor: &AnchorRecord) -> Result<VerificationResult> {
    let doc = EvidenceDocument::from_report(report);
    let current = doc.fingerprint()?;
    let report_id = report.reference_code.clone();

    if current == anchor.fingerprint {
        let snapshot = EvidenceField::ALL
            .iter()
            .map(|f| (f.key().to_string(), doc.value_of(*f)))
            .collect();
        return Ok(VerificationResult::Verified {
            report_id,
            current_fingerprint: current,
            anchored_fingerprint: anchor.fingerprint.clone(),
            transaction_id: anchor.transaction_id.clone(),
            anchor_status: anchor.status,
            snapshot,
        });
    }

    let tampered_fields = EvidenceField::MONITORED
        .iter()
        .map(|f| TamperedField {
            field: *f,
            current_value: current_value(report, &doc, *f),
        })
        .collect();

    Ok(VerificationResult::Tampered {
        report_id,
        current_fingerprint: current,
        anchored_fingerprint: anchor.fingerprint.clone(),
        transaction_id: anchor.transaction_id.clone(),
        anchor_status: anchor.status,
        tampered_fields,
    })
}

pub struct IntegrityVerifier {
    anchors: Arc<dyn AnchorStore>,
}

impl IntegrityVerifier {
    pub fn new(anchors: Arc<dyn AnchorStore>) -> Self {
        Self { anchors }
    }

    /// Verify a report against its anchor. A report without an anchor
    /// yields [`VerificationResult::NotAnchored`], not an error.
    pub async fn verify(&self, report: &Report) -> Result<VerificationResult> {
        match self.anchors.get(&report.reference_code).await? {
            Some(anchor) => compare(report, &anchor),
            None => Ok(VerificationResult::NotAnchored {
                report_id: report.reference_code.clone(),
            }),
        }
    }
}
