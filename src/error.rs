use thiserror::Error;

use crate::state::models::AnchorStatus;

/// Errors raised by the evidence integrity subsystem.
///
/// A detected tamper is not an error: it is reported through
/// [`crate::integrity::VerificationResult::Tampered`].
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Evidence document is missing required field: {0}")]
    IncompleteDocument(&'static str),

    #[error("Report {0} is already anchored")]
    DuplicateAnchor(String),

    #[error("Anchor service unavailable: {0}")]
    AnchorServiceUnavailable(String),

    #[error("No anchor record found for report {0}")]
    AnchorNotFound(String),

    #[error("Report not found: {0}")]
    ReportNotFound(String),

    #[error("Reference code {0} is already taken")]
    DuplicateReference(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid anchor status transition: {from} -> {to}")]
    InvalidTransition { from: AnchorStatus, to: AnchorStatus },

    #[error("Report {report_id} is anchored (tx {transaction_id}) and cannot be deleted")]
    DeletionRefused {
        report_id: String,
        transaction_id: String,
    },

    #[error("A confirmation refresh is already running")]
    RefreshInProgress,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Content store error: {0}")]
    ContentStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IntegrityError>;
