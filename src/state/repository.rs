/// PostgreSQL implementations of the state traits.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// to avoid requiring a live database during development builds.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::models::*;
use super::{AnchorStore, ReportRepository};
use crate::error::{IntegrityError, Result};
use crate::evidence::Coordinate;

fn db_err(e: sqlx::Error) -> IntegrityError {
    IntegrityError::Database(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

// ── Anchor records ──

/// Anchor records in the `anchor_records` table.
#[derive(Clone)]
pub struct PgAnchorStore {
    pool: PgPool,
}

impl PgAnchorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_by(&self, column: &str, value: &str) -> Result<Option<AnchorRecord>> {
        // `column` is always one of our own constants, never caller input.
        let sql = format!("SELECT * FROM anchor_records WHERE {column} = $1 LIMIT 1");
        sqlx::query_as::<_, AnchorRecord>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    /// Load a record under a row lock, let `apply` mutate it, write it back.
    async fn modify<F>(&self, report_id: &str, apply: F) -> Result<AnchorRecord>
    where
        F: FnOnce(&mut AnchorRecord, DateTime<Utc>) -> Result<()> + Send,
    {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut record = sqlx::query_as::<_, AnchorRecord>(
            "SELECT * FROM anchor_records WHERE report_id = $1 FOR UPDATE",
        )
        .bind(report_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| IntegrityError::AnchorNotFound(report_id.to_string()))?;

        apply(&mut record, Utc::now())?;

        sqlx::query(
            r#"
            UPDATE anchor_records
            SET confirmations = $2, block_height = $3, status = $4,
                metadata = $5, confirmed_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.confirmations)
        .bind(record.block_height)
        .bind(record.status)
        .bind(Json(&record.metadata))
        .bind(record.confirmed_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(record)
    }
}

#[async_trait]
impl AnchorStore for PgAnchorStore {
    async fn create(&self, record: NewAnchorRecord) -> Result<AnchorRecord> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let confirmed_at = (record.status == AnchorStatus::Confirmed).then_some(now);

        sqlx::query_as::<_, AnchorRecord>(
            r#"
            INSERT INTO anchor_records
            (id, report_id, fingerprint, content_id, transaction_id, block_height,
             confirmations, status, network, metadata, created_at, confirmed_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NULL, 0, $6, $7, $8, $9, $10, $9)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&record.report_id)
        .bind(record.fingerprint.as_str())
        .bind(&record.content_id)
        .bind(&record.transaction_id)
        .bind(record.status)
        .bind(&record.network)
        .bind(Json(&record.metadata))
        .bind(now)
        .bind(confirmed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                IntegrityError::DuplicateAnchor(record.report_id.clone())
            } else {
                db_err(e)
            }
        })
    }

    async fn get(&self, report_id: &str) -> Result<Option<AnchorRecord>> {
        self.fetch_by("report_id", report_id).await
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AnchorRecord>> {
        self.fetch_by("fingerprint", &fingerprint.to_ascii_lowercase())
            .await
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Option<AnchorRecord>> {
        self.fetch_by("transaction_id", transaction_id).await
    }

    async fn update_confirmation(&self, update: ConfirmationUpdate) -> Result<AnchorRecord> {
        let report_id = update.report_id.clone();
        self.modify(&report_id, move |record, now| {
            record.apply_confirmation(&update, now)
        })
        .await
    }

    async fn mark_failed(&self, report_id: &str, reason: &str) -> Result<AnchorRecord> {
        let reason = reason.to_string();
        self.modify(report_id, move |record, now| {
            record.mark_failed(reason, now)
        })
        .await
    }

    async fn list_refreshable(&self, limit: usize) -> Result<Vec<AnchorRecord>> {
        sqlx::query_as::<_, AnchorRecord>(
            r#"
            SELECT * FROM anchor_records
            WHERE status IN ('pending', 'submitted')
            ORDER BY updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}

// ── Reports ──

#[derive(FromRow)]
struct ReportRow {
    id: Uuid,
    reference_code: String,
    category: ReportCategory,
    description: String,
    location_description: String,
    latitude_e6: Option<i64>,
    longitude_e6: Option<i64>,
    is_anonymous: bool,
    reporter_name: String,
    reporter_phone: String,
    reporter_email: String,
    media_cid: Option<String>,
    evidence_cid: Option<String>,
    evidence_hash: Option<String>,
    transaction_hash: Option<String>,
    is_hash_anchored: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ReportRow> for Report {
    fn from(row: ReportRow) -> Self {
        Report {
            id: row.id,
            reference_code: row.reference_code,
            category: row.category,
            description: row.description,
            location_description: row.location_description,
            latitude: row.latitude_e6.map(Coordinate::from_micro_degrees),
            longitude: row.longitude_e6.map(Coordinate::from_micro_degrees),
            is_anonymous: row.is_anonymous,
            reporter_name: row.reporter_name,
            reporter_phone: row.reporter_phone,
            reporter_email: row.reporter_email,
            media_cid: row.media_cid,
            evidence_cid: row.evidence_cid,
            evidence_hash: row.evidence_hash,
            transaction_hash: row.transaction_hash,
            is_hash_anchored: row.is_hash_anchored,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const INSERT_REPORT: &str = r#"
    INSERT INTO reports
    (id, reference_code, category, description, location_description,
     latitude_e6, longitude_e6, is_anonymous, reporter_name, reporter_phone,
     reporter_email, media_cid, evidence_cid, evidence_hash, transaction_hash,
     is_hash_anchored, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
"#;

fn bind_report<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    report: &'q Report,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(report.id)
        .bind(&report.reference_code)
        .bind(report.category)
        .bind(&report.description)
        .bind(&report.location_description)
        .bind(report.latitude.map(Coordinate::micro_degrees))
        .bind(report.longitude.map(Coordinate::micro_degrees))
        .bind(report.is_anonymous)
        .bind(&report.reporter_name)
        .bind(&report.reporter_phone)
        .bind(&report.reporter_email)
        .bind(&report.media_cid)
        .bind(&report.evidence_cid)
        .bind(&report.evidence_hash)
        .bind(&report.transaction_hash)
        .bind(report.is_hash_anchored)
        .bind(report.created_at)
        .bind(Utc::now())
}

/// Reports in the `reports` table.
#[derive(Clone)]
pub struct PgReportRepository {
    pool: PgPool,
}

impl PgReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportRepository for PgReportRepository {
    async fn get(&self, reference_code: &str) -> Result<Option<Report>> {
        let row = sqlx::query_as::<_, ReportRow>("SELECT * FROM reports WHERE reference_code = $1")
            .bind(reference_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Report::from))
    }

    async fn insert(&self, report: &Report) -> Result<()> {
        bind_report(sqlx::query(INSERT_REPORT), report)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    IntegrityError::DuplicateReference(report.reference_code.clone())
                } else {
                    db_err(e)
                }
            })?;
        Ok(())
    }

    async fn save(&self, report: &Report) -> Result<()> {
        let upsert = format!(
            r#"{INSERT_REPORT}
            ON CONFLICT (id) DO UPDATE SET
                category = $3, description = $4, location_description = $5,
                latitude_e6 = $6, longitude_e6 = $7, is_anonymous = $8,
                reporter_name = $9, reporter_phone = $10, reporter_email = $11,
                media_cid = $12, evidence_cid = $13, evidence_hash = $14,
                transaction_hash = $15, is_hash_anchored = $16, updated_at = $18
            "#
        );
        bind_report(sqlx::query(&upsert), report)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn mark_anchored(
        &self,
        reference_code: &str,
        anchoring: &ReportAnchoring,
    ) -> Result<Report> {
        let row = sqlx::query_as::<_, ReportRow>(
            r#"
            UPDATE reports SET
                evidence_hash = $2, transaction_hash = $3, evidence_cid = $4,
                is_hash_anchored = TRUE, updated_at = $5
            WHERE reference_code = $1
            RETURNING *
            "#,
        )
        .bind(reference_code)
        .bind(&anchoring.evidence_hash)
        .bind(&anchoring.transaction_hash)
        .bind(&anchoring.evidence_cid)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Report::from)
            .ok_or_else(|| IntegrityError::ReportNotFound(reference_code.to_string()))
    }

    async fn delete(&self, reference_code: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reports WHERE reference_code = $1")
            .bind(reference_code)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn next_reference_code(&self, year: i32) -> Result<String> {
        let prefix = format!("RRS-{year}-");
        let last: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT reference_code FROM reports
            WHERE reference_code LIKE $1
            ORDER BY LENGTH(reference_code) DESC, reference_code DESC
            LIMIT 1
            "#,
        )
        .bind(format!("{prefix}%"))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let sequence = match last {
            None => 1,
            Some((code,)) => match reference_sequence(&code, year) {
                Some(n) => n + 1,
                None => {
                    let (count,): (i64,) = sqlx::query_as(
                        "SELECT COUNT(*) FROM reports WHERE reference_code LIKE $1",
                    )
                    .bind(format!("{prefix}%"))
                    .fetch_one(&self.pool)
                    .await
                    .map_err(db_err)?;
                    count as u32 + 1
                }
            },
        };

        Ok(reference_code(year, sequence))
    }

    async fn list_unanchored(&self, limit: usize) -> Result<Vec<Report>> {
        let rows = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT r.* FROM reports r
            LEFT JOIN anchor_records a ON a.report_id = r.reference_code
            WHERE NOT r.is_hash_anchored AND a.id IS NULL
            ORDER BY r.created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Report::from).collect())
    }
}
