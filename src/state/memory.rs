/// In-process state, used when no database is configured and in tests.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::*;
use super::{AnchorStore, ReportRepository};
use crate::error::{IntegrityError, Result};

/// Anchor records keyed by report id.
#[derive(Default)]
pub struct MemoryAnchorStore {
    records: RwLock<HashMap<String, AnchorRecord>>,
}

impl MemoryAnchorStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, report_id: &str, apply: F) -> Result<AnchorRecord>
    where
        F: FnOnce(&mut AnchorRecord) -> Result<()>,
    {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(report_id)
            .ok_or_else(|| IntegrityError::AnchorNotFound(report_id.to_string()))?;

        // Apply to a copy so a rejected transition leaves the stored record untouched.
        let mut updated = stored.clone();
        apply(&mut updated)?;
        *stored = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl AnchorStore for MemoryAnchorStore {
    async fn create(&self, record: NewAnchorRecord) -> Result<AnchorRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.report_id) {
            return Err(IntegrityError::DuplicateAnchor(record.report_id));
        }

        let now = Utc::now();
        let created = AnchorRecord {
            id: Uuid::now_v7(),
            report_id: record.report_id.clone(),
            fingerprint: record.fingerprint,
            content_id: record.content_id,
            transaction_id: record.transaction_id,
            block_height: None,
            confirmations: 0,
            status: record.status,
            network: record.network,
            metadata: record.metadata,
            created_at: now,
            confirmed_at: (record.status == AnchorStatus::Confirmed).then_some(now),
            updated_at: now,
        };
        records.insert(record.report_id, created.clone());
        Ok(created)
    }

    async fn get(&self, report_id: &str) -> Result<Option<AnchorRecord>> {
        Ok(self.records.read().await.get(report_id).cloned())
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AnchorRecord>> {
        let wanted = fingerprint.to_ascii_lowercase();
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.fingerprint.as_str() == wanted)
            .cloned())
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<Option<AnchorRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn update_confirmation(&self, update: ConfirmationUpdate) -> Result<AnchorRecord> {
        let report_id = update.report_id.clone();
        self.modify(&report_id, |record| {
            record.apply_confirmation(&update, Utc::now())
        })
        .await
    }

    async fn mark_failed(&self, report_id: &str, reason: &str) -> Result<AnchorRecord> {
        self.modify(report_id, |record| {
            record.mark_failed(reason.to_string(), Utc::now())
        })
        .await
    }

    async fn list_refreshable(&self, limit: usize) -> Result<Vec<AnchorRecord>> {
        let records = self.records.read().await;
        let mut pending: Vec<_> = records
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.updated_at);
        pending.truncate(limit);
        Ok(pending)
    }
}

/// Reports keyed by reference code.
#[derive(Default)]
pub struct MemoryReportRepository {
    reports: RwLock<HashMap<String, Report>>,
}

impl MemoryReportRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportRepository for MemoryReportRepository {
    async fn get(&self, reference_code: &str) -> Result<Option<Report>> {
        Ok(self.reports.read().await.get(reference_code).cloned())
    }

    async fn insert(&self, report: &Report) -> Result<()> {
        let mut reports = self.reports.write().await;
        if reports.contains_key(&report.reference_code) {
            return Err(IntegrityError::DuplicateReference(report.reference_code.clone()));
        }
        reports.insert(report.reference_code.clone(), report.clone());
        Ok(())
    }

    async fn save(&self, report: &Report) -> Result<()> {
        let mut stored = report.clone();
        stored.updated_at = Utc::now();
        self.reports
            .write()
            .await
            .insert(report.reference_code.clone(), stored);
        Ok(())
    }

    async fn mark_anchored(
        &self,
        reference_code: &str,
        anchoring: &ReportAnchoring,
    ) -> Result<Report> {
        let mut reports = self.reports.write().await;
        let report = reports
            .get_mut(reference_code)
            .ok_or_else(|| IntegrityError::ReportNotFound(reference_code.to_string()))?;
        report.apply_anchoring(anchoring, Utc::now());
        Ok(report.clone())
    }

    async fn delete(&self, reference_code: &str) -> Result<bool> {
        Ok(self.reports.write().await.remove(reference_code).is_some())
    }

    async fn next_reference_code(&self, year: i32) -> Result<String> {
        let reports = self.reports.read().await;
        let last = reports
            .keys()
            .filter_map(|code| reference_sequence(code, year))
            .max()
            .unwrap_or(0);
        Ok(reference_code(year, last + 1))
    }

    async fn list_unanchored(&self, limit: usize) -> Result<Vec<Report>> {
        let reports = self.reports.read().await;
        let mut unanchored: Vec<_> = reports
            .values()
            .filter(|r| !r.is_hash_anchored)
            .cloned()
            .collect();
        unanchored.sort_by_key(|r| r.created_at);
        unanchored.truncate(limit);
        Ok(unanchored)
    }
}
