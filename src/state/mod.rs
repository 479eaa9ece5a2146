/// Durable state: anchor records and the reports they protect.
///
/// Two storage traits sit at this seam:
/// - [`AnchorStore`]: one anchor record per report, unique on the report id,
///   with secondary lookups by fingerprint and transaction id
/// - [`ReportRepository`]: the narrow slice of report persistence the
///   integrity subsystem needs
///
/// PostgreSQL implementations live in [`repository`]; [`memory`] holds
/// in-process implementations used when no database is configured.
pub mod memory;
pub mod models;
pub mod repository;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{IntegrityError, Result};
use models::{AnchorRecord, ConfirmationUpdate, NewAnchorRecord, Report, ReportAnchoring};

/// Maximum number of records a refresh pass selects by default.
pub const DEFAULT_REFRESH_BATCH: usize = 100;

#[async_trait]
pub trait AnchorStore: Send + Sync {
    /// Create the anchor record for a report.
    /// Fails with [`IntegrityError::DuplicateAnchor`] if one already exists.
    async fn create(&self, record: NewAnchorRecord) -> Result<AnchorRecord>;

    async fn get(&self, report_id: &str) -> Result<Option<AnchorRecord>>;

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AnchorRecord>>;

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Option<AnchorRecord>>;

    /// Apply a confirmation poll. The stored count never decreases and
    /// terminal statuses are never left.
    async fn update_confirmation(&self, update: ConfirmationUpdate) -> Result<AnchorRecord>;

    /// Move a pending or submitted anchor to `Failed`, recording the reason.
    async fn mark_failed(&self, report_id: &str, reason: &str) -> Result<AnchorRecord>;

    /// Records still awaiting confirmation (`Pending` or `Submitted`),
    /// least recently updated first.
    async fn list_refreshable(&self, limit: usize) -> Result<Vec<AnchorRecord>>;
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    /// Look up a report by reference code.
    async fn get(&self, reference_code: &str) -> Result<Option<Report>>;

    /// Insert a new report. Fails with [`IntegrityError::DuplicateReference`]
    /// if its reference code is already taken.
    async fn insert(&self, report: &Report) -> Result<()>;

    /// Insert or update a report.
    async fn save(&self, report: &Report) -> Result<()>;

    /// Record an anchoring outcome without touching any other column.
    /// Returns the report as stored afterwards.
    async fn mark_anchored(
        &self,
        reference_code: &str,
        anchoring: &ReportAnchoring,
    ) -> Result<Report>;

    /// Delete a report. Returns `false` if it did not exist.
    async fn delete(&self, reference_code: &str) -> Result<bool>;

    /// Next free reference code for `year`.
    async fn next_reference_code(&self, year: i32) -> Result<String>;

    /// Reports not yet marked as anchored, oldest first.
    async fn list_unanchored(&self, limit: usize) -> Result<Vec<Report>>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| IntegrityError::Database(format!("connect failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| IntegrityError::Database(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
