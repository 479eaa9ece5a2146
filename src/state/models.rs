/// Persisted models: reports and their anchor records.
///
/// `AnchorRecord` maps directly to the `anchor_records` table. Reports are
/// owned by the report-management side of the system; this crate only
/// reads the fields that feed the evidence document and writes back the
/// anchoring outcome.
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::anchor::explorer::ExplorerLink;
use crate::anchor::SubmissionPayload;
use crate::evidence::{Coordinate, Fingerprint};

/// The principal performing a mutating operation.
///
/// Passed explicitly to every call that changes anchor or report state and
/// recorded in the log line for that change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor(String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Work initiated by the service itself (background worker, scheduler).
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incident category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "report_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportCategory {
    Theft,
    Kidnapping,
    Corruption,
    HouseFire,
    RoadAccident,
    Other,
}

impl ReportCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReportCategory::Theft => "theft",
            ReportCategory::Kidnapping => "kidnapping",
            ReportCategory::Corruption => "corruption",
            ReportCategory::HouseFire => "house_fire",
            ReportCategory::RoadAccident => "road_accident",
            ReportCategory::Other => "other",
        }
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reporter contact details, only ever attached to non-anonymous reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterInfo {
    pub name: String,
    pub phone: String,
    pub email: String,
}

/// A citizen incident report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    /// Human-facing identifier (`RRS-2025-00001`); the anchor record key.
    pub reference_code: String,
    pub category: ReportCategory,
    pub description: String,
    pub location_description: String,
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
    pub is_anonymous: bool,
    pub reporter_name: String,
    pub reporter_phone: String,
    pub reporter_email: String,
    /// Content id of uploaded media. Not covered by the fingerprint.
    pub media_cid: Option<String>,
    /// Content id of the canonical evidence document in the content store.
    pub evidence_cid: Option<String>,
    pub evidence_hash: Option<String>,
    pub transaction_hash: Option<String>,
    pub is_hash_anchored: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a report is filed.
#[derive(Debug, Clone, Deserialize)]
pub struct NewReport {
    pub category: ReportCategory,
    pub description: String,
    #[serde(default)]
    pub location_description: String,
    #[serde(default)]
    pub latitude: Option<Coordinate>,
    #[serde(default)]
    pub longitude: Option<Coordinate>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub reporter: Option<ReporterInfo>,
    #[serde(default)]
    pub media_cid: Option<String>,
}

impl NewReport {
    /// Reject coordinates outside their geographic range.
    pub fn validate(&self) -> crate::error::Result<()> {
        if let Some(lat) = self.latitude {
            lat.validate_latitude()?;
        }
        if let Some(lon) = self.longitude {
            lon.validate_longitude()?;
        }
        Ok(())
    }
}

/// Anchoring outcome written back onto a report. Only these columns change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportAnchoring {
    pub evidence_hash: String,
    pub transaction_hash: Option<String>,
    pub evidence_cid: Option<String>,
}

impl Report {
    pub(crate) fn apply_anchoring(&mut self, anchoring: &ReportAnchoring, now: DateTime<Utc>) {
        self.evidence_hash = Some(anchoring.evidence_hash.clone());
        self.transaction_hash = anchoring.transaction_hash.clone();
        self.evidence_cid = anchoring.evidence_cid.clone();
        self.is_hash_anchored = true;
        self.updated_at = now;
    }
}

/// Format a sequential reference code, e.g. `RRS-2025-00001`.
pub fn reference_code(year: i32, sequence: u32) -> String {
    format!("RRS-{year}-{sequence:05}")
}

/// Sequence number of a reference code for `year`, if it belongs to that year.
pub fn reference_sequence(code: &str, year: i32) -> Option<u32> {
    code.strip_prefix(&format!("RRS-{year}-"))?.parse().ok()
}

impl Report {
    /// Build a report from filed fields. Reporter details are dropped for
    /// anonymous reports.
    pub fn new(reference_code: String, input: NewReport, now: DateTime<Utc>) -> Self {
        let reporter = if input.is_anonymous {
            None
        } else {
            input.reporter
        };
        let reporter = reporter.unwrap_or(ReporterInfo {
            name: String::new(),
            phone: String::new(),
            email: String::new(),
        });

        Self {
            id: Uuid::now_v7(),
            reference_code,
            category: input.category,
            description: input.description,
            location_description: input.location_description,
            latitude: input.latitude,
            longitude: input.longitude,
            is_anonymous: input.is_anonymous,
            reporter_name: reporter.name,
            reporter_phone: reporter.phone,
            reporter_email: reporter.email,
            media_cid: input.media_cid,
            evidence_cid: None,
            evidence_hash: None,
            transaction_hash: None,
            is_hash_anchored: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn year(&self) -> i32 {
        self.created_at.year()
    }

    /// Contact details for the anchor payload; `None` for anonymous reports.
    pub fn reporter_info(&self) -> Option<ReporterInfo> {
        if self.is_anonymous {
            return None;
        }
        Some(ReporterInfo {
            name: self.reporter_name.clone(),
            phone: self.reporter_phone.clone(),
            email: self.reporter_email.clone(),
        })
    }
}

/// Anchor lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "anchor_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AnchorStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl AnchorStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            AnchorStatus::Pending => "pending",
            AnchorStatus::Submitted => "submitted",
            AnchorStatus::Confirmed => "confirmed",
            AnchorStatus::Failed => "failed",
        }
    }

    /// `Confirmed` and `Failed` have no automatic transitions out.
    pub const fn is_terminal(self) -> bool {
        matches!(self, AnchorStatus::Confirmed | AnchorStatus::Failed)
    }

    /// Allowed lifecycle moves. Staying in the same status is always allowed.
    pub fn can_transition_to(self, next: AnchorStatus) -> bool {
        use AnchorStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Submitted)
                    | (Pending, Confirmed)
                    | (Submitted, Confirmed)
                    | (Pending, Failed)
                    | (Submitted, Failed)
            )
    }
}

impl fmt::Display for AnchorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was submitted for anchoring, stored alongside the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorMetadata {
    pub submission: SubmissionPayload,
    pub submitted_at: DateTime<Utc>,
    pub simulated: bool,
    /// Underlying error when a real submission fell back to simulation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_error: Option<String>,
    #[serde(default)]
    pub explorer_links: Vec<ExplorerLink>,
    /// Operator-supplied reason when the anchor was marked failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// One report's anchor submission and its confirmation state.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: Uuid,
    /// Report reference code. Unique.
    pub report_id: String,
    #[sqlx(try_from = "String")]
    pub fingerprint: Fingerprint,
    /// Content id of the evidence document, when the content store accepted it.
    pub content_id: Option<String>,
    pub transaction_id: Option<String>,
    pub block_height: Option<i64>,
    pub confirmations: i64,
    pub status: AnchorStatus,
    pub network: String,
    #[sqlx(json)]
    pub metadata: AnchorMetadata,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an anchor record.
#[derive(Debug, Clone)]
pub struct NewAnchorRecord {
    pub report_id: String,
    pub fingerprint: Fingerprint,
    pub content_id: Option<String>,
    pub transaction_id: Option<String>,
    pub status: AnchorStatus,
    pub network: String,
    pub metadata: AnchorMetadata,
}

/// Result of one confirmation poll, applied by `AnchorStore::update_confirmation`.
#[derive(Debug, Clone)]
pub struct ConfirmationUpdate {
    pub report_id: String,
    pub confirmations: i64,
    pub block_height: Option<i64>,
    pub status: AnchorStatus,
}

impl AnchorRecord {
    /// Apply a confirmation poll in place.
    ///
    /// The stored confirmation count never decreases, and the block height
    /// is only replaced by a known value. `confirmed_at` is set on the move
    /// into `Confirmed`.
    pub fn apply_confirmation(
        &mut self,
        update: &ConfirmationUpdate,
        now: DateTime<Utc>,
    ) -> crate::error::Result<()> {
        if !self.status.can_transition_to(update.status) {
            return Err(crate::error::IntegrityError::InvalidTransition {
                from: self.status,
                to: update.status,
            });
        }

        self.confirmations = self.confirmations.max(update.confirmations.max(0));
        if update.block_height.is_some() {
            self.block_height = update.block_height;
        }
        if update.status == AnchorStatus::Confirmed && self.status != AnchorStatus::Confirmed {
            self.confirmed_at = Some(now);
        }
        self.status = update.status;
        self.updated_at = now;
        Ok(())
    }

    /// Move to `Failed` with an operator-supplied reason.
    pub fn mark_failed(&mut self, reason: String, now: DateTime<Utc>) -> crate::error::Result<()> {
        if self.status.is_terminal() {
            return Err(crate::error::IntegrityError::InvalidTransition {
                from: self.status,
                to: AnchorStatus::Failed,
            });
        }
        self.status = AnchorStatus::Failed;
        self.metadata.failure_reason = Some(reason);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_code_format() {
        assert_eq!(reference_code(2025, 1), "RRS-2025-00001");
        assert_eq!(reference_code(2025, 123456), "RRS-2025-123456");
        assert_eq!(reference_sequence("RRS-2025-00042", 2025), Some(42));
        assert_eq!(reference_sequence("RRS-2024-00042", 2025), None);
    }

    #[test]
    fn test_anonymous_report_drops_reporter() {
        let input = NewReport {
            category: ReportCategory::Corruption,
            description: "bribe at checkpoint".into(),
            location_description: String::new(),
            latitude: None,
            longitude: None,
            is_anonymous: true,
            reporter: Some(ReporterInfo {
                name: "Jane".into(),
                phone: "0788000000".into(),
                email: "jane@example.org".into(),
            }),
            media_cid: None,
        };
        let report = Report::new("RRS-2025-00001".into(), input, Utc::now());
        assert!(report.reporter_name.is_empty());
        assert!(report.reporter_info().is_none());
    }

    #[test]
    fn test_new_report_rejects_out_of_range_latitude() {
        let mut input = NewReport {
            category: ReportCategory::Theft,
            description: "phone snatched".into(),
            location_description: String::new(),
            latitude: Some("120.5".parse().unwrap()),
            longitude: Some("30.06".parse().unwrap()),
            is_anonymous: true,
            reporter: None,
            media_cid: None,
        };
        assert!(matches!(
            input.validate(),
            Err(crate::error::IntegrityError::InvalidCoordinate(_))
        ));

        input.latitude = Some("-1.95".parse().unwrap());
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_status_transitions() {
        use AnchorStatus::*;
        assert!(Pending.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Confirmed));
        assert!(Submitted.can_transition_to(Failed));
        assert!(!Confirmed.can_transition_to(Submitted));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Submitted.can_transition_to(Pending));
        assert!(Confirmed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_apply_confirmation_never_decreases() {
        let mut record =
            crate::test_support::anchor_record("RRS-2025-00001", AnchorStatus::Submitted);
        record.confirmations = 5;
        let update = ConfirmationUpdate {
            report_id: record.report_id.clone(),
            confirmations: 2,
            block_height: None,
            status: AnchorStatus::Confirmed,
        };
        record.apply_confirmation(&update, Utc::now()).unwrap();
        assert_eq!(record.confirmations, 5);
        assert_eq!(record.status, AnchorStatus::Confirmed);
        assert!(record.confirmed_at.is_some());
    }

    #[test]
    fn test_apply_confirmation_rejects_leaving_terminal() {
        let mut record = crate::test_support::anchor_record("RRS-2025-00001", AnchorStatus::Failed);
        let update = ConfirmationUpdate {
            report_id: record.report_id.clone(),
            confirmations: 1,
            block_height: Some(10),
            status: AnchorStatus::Confirmed,
        };
        assert!(matches!(
            record.apply_confirmation(&update, Utc::now()),
            Err(crate::error::IntegrityError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_mark_failed_records_reason() {
        let mut record =
            crate::test_support::anchor_record("RRS-2025-00001", AnchorStatus::Submitted);
        record.mark_failed("tx dropped from mempool".into(), Utc::now()).unwrap();
        assert_eq!(record.status, AnchorStatus::Failed);
        assert_eq!(record.metadata.failure_reason.as_deref(), Some("tx dropped from mempool"));

        let mut confirmed =
            crate::test_support::anchor_record("RRS-2025-00002", AnchorStatus::Confirmed);
        assert!(confirmed.mark_failed("late".into(), Utc::now()).is_err());
    }
}
