//! Upsert sinks
//!
//! The pipeline persists through the [`UpsertSink`] trait: insert a record if
//! its dimension tuple is new, otherwise overwrite every measure with the
//! incoming values. A call on a batch either commits the whole batch or
//! reports one failure.
//!
//! Two implementations ship with the crate:
//! - [`PgUpsertSink`] writes to the `ad_report_data` table in PostgreSQL
//! - [`MemorySink`] keeps records in a map, for tests and dry runs

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::models::{AdReportRecord, DimensionKey, Measures};

/// SQLSTATE raised when one statement touches the same conflict key twice
const CARDINALITY_VIOLATION: &str = "21000";

/// Idempotent persistence keyed on the dimension tuple
#[async_trait]
pub trait UpsertSink: Send + Sync {
    /// Persist a whole batch atomically
    async fn upsert_batch(&self, records: &[AdReportRecord]) -> Result<(), StorageError>;

    /// Persist a single record
    async fn upsert(&self, record: &AdReportRecord) -> Result<(), StorageError> {
        self.upsert_batch(std::slice::from_ref(record)).await
    }

    /// Check that the backing store is reachable
    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Map-backed sink with the same overwrite semantics as the database
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<HashMap<DimensionKey, Measures>>,
    batches: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct dimension tuples stored
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &DimensionKey) -> Option<Measures> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of `upsert_batch` calls received
    pub fn batches_received(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpsertSink for MemorySink {
    async fn upsert_batch(&self, records: &[AdReportRecord]) -> Result<(), StorageError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            rows.insert(record.key.clone(), record.measures.clone());
        }
        Ok(())
    }
}

// ============================================================================
// PostgreSQL sink
// ============================================================================

const BULK_UPSERT_SQL: &str = r#"
INSERT INTO ad_report_data (
    mobile_app_resolved_id, mobile_app_name, domain, ad_unit_name, ad_unit_id,
    inventory_format_name, operating_system_version_name, operating_system_name,
    country_name, country_criteria_id, date,
    ad_exchange_total_requests, ad_exchange_responses_served, ad_exchange_match_rate,
    ad_exchange_line_item_level_impressions, ad_exchange_line_item_level_clicks,
    ad_exchange_line_item_level_ctr, average_ecpm, payout, ad_exchange_cost_per_click
)
SELECT * FROM UNNEST(
    $1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
    $6::text[], $7::text[], $8::text[], $9::text[], $10::text[], $11::date[],
    $12::bigint[], $13::bigint[], $14::float8[], $15::bigint[], $16::bigint[],
    $17::float8[], $18::float8[], $19::float8[], $20::float8[]
)
ON CONFLICT (
    date, mobile_app_resolved_id, mobile_app_name, ad_unit_name, ad_unit_id,
    inventory_format_name, domain, operating_system_version_name,
    operating_system_name, country_name, country_criteria_id
)
DO UPDATE SET
    ad_exchange_total_requests = EXCLUDED.ad_exchange_total_requests,
    ad_exchange_responses_served = EXCLUDED.ad_exchange_responses_served,
    ad_exchange_match_rate = EXCLUDED.ad_exchange_match_rate,
    ad_exchange_line_item_level_impressions = EXCLUDED.ad_exchange_line_item_level_impressions,
    ad_exchange_line_item_level_clicks = EXCLUDED.ad_exchange_line_item_level_clicks,
    ad_exchange_line_item_level_ctr = EXCLUDED.ad_exchange_line_item_level_ctr,
    average_ecpm = EXCLUDED.average_ecpm,
    payout = EXCLUDED.payout,
    ad_exchange_cost_per_click = EXCLUDED.ad_exchange_cost_per_click
"#;

const SINGLE_UPSERT_SQL: &str = r#"
INSERT INTO ad_report_data (
    mobile_app_resolved_id, mobile_app_name, domain, ad_unit_name, ad_unit_id,
    inventory_format_name, operating_system_version_name, operating_system_name,
    country_name, country_criteria_id, date,
    ad_exchange_total_requests, ad_exchange_responses_served, ad_exchange_match_rate,
    ad_exchange_line_item_level_impressions, ad_exchange_line_item_level_clicks,
    ad_exchange_line_item_level_ctr, average_ecpm, payout, ad_exchange_cost_per_click
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
ON CONFLICT (
    date, mobile_app_resolved_id, mobile_app_name, ad_unit_name, ad_unit_id,
    inventory_format_name, domain, operating_system_version_name,
    operating_system_name, country_name, country_criteria_id
)
DO UPDATE SET
    ad_exchange_total_requests = EXCLUDED.ad_exchange_total_requests,
    ad_exchange_responses_served = EXCLUDED.ad_exchange_responses_served,
    ad_exchange_match_rate = EXCLUDED.ad_exchange_match_rate,
    ad_exchange_line_item_level_impressions = EXCLUDED.ad_exchange_line_item_level_impressions,
    ad_exchange_line_item_level_clicks = EXCLUDED.ad_exchange_line_item_level_clicks,
    ad_exchange_line_item_level_ctr = EXCLUDED.ad_exchange_line_item_level_ctr,
    average_ecpm = EXCLUDED.average_ecpm,
    payout = EXCLUDED.payout,
    ad_exchange_cost_per_click = EXCLUDED.ad_exchange_cost_per_click
"#;

/// Column-major view of a batch, one vector per UNNEST parameter
#[derive(Default)]
struct BatchColumns {
    mobile_app_resolved_id: Vec<String>,
    mobile_app_name: Vec<String>,
    domain: Vec<String>,
    ad_unit_name: Vec<String>,
    ad_unit_id: Vec<String>,
    inventory_format_name: Vec<String>,
    operating_system_version_name: Vec<String>,
    operating_system_name: Vec<String>,
    country_name: Vec<String>,
    country_criteria_id: Vec<String>,
    date: Vec<NaiveDate>,
    total_requests: Vec<Option<i64>>,
    responses_served: Vec<Option<i64>>,
    match_rate: Vec<Option<f64>>,
    impressions: Vec<Option<i64>>,
    clicks: Vec<Option<i64>>,
    ctr: Vec<Option<f64>>,
    average_ecpm: Vec<Option<f64>>,
    payout: Vec<Option<f64>>,
    cost_per_click: Vec<Option<f64>>,
}

impl BatchColumns {
    fn from_records(records: &[AdReportRecord]) -> Self {
        let mut columns = Self::default();
        for AdReportRecord { key, measures } in records {
            columns.mobile_app_resolved_id.push(key.mobile_app_resolved_id.clone());
            columns.mobile_app_name.push(key.mobile_app_name.clone());
            columns.domain.push(key.domain.clone());
            columns.ad_unit_name.push(key.ad_unit_name.clone());
            columns.ad_unit_id.push(key.ad_unit_id.clone());
            columns.inventory_format_name.push(key.inventory_format_name.clone());
            columns
                .operating_system_version_name
                .push(key.operating_system_version_name.clone());
            columns.operating_system_name.push(key.operating_system_name.clone());
            columns.country_name.push(key.country_name.clone());
            columns.country_criteria_id.push(key.country_criteria_id.clone());
            columns.date.push(key.date);
            columns.total_requests.push(measures.total_requests);
            columns.responses_served.push(measures.responses_served);
            columns.match_rate.push(measures.match_rate);
            columns.impressions.push(measures.impressions);
            columns.clicks.push(measures.clicks);
            columns.ctr.push(measures.ctr);
            columns.average_ecpm.push(measures.average_ecpm);
            columns.payout.push(measures.payout);
            columns.cost_per_click.push(measures.cost_per_click);
        }
        columns
    }
}

/// PostgreSQL sink using a multi-row `ON CONFLICT` upsert
#[derive(Debug, Clone)]
pub struct PgUpsertSink {
    pool: PgPool,
}

impl PgUpsertSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn bulk_upsert(
        tx: &mut Transaction<'_, Postgres>,
        records: &[AdReportRecord],
    ) -> Result<(), sqlx::Error> {
        let columns = BatchColumns::from_records(records);
        sqlx::query(BULK_UPSERT_SQL)
            .bind(columns.mobile_app_resolved_id)
            .bind(columns.mobile_app_name)
            .bind(columns.domain)
            .bind(columns.ad_unit_name)
            .bind(columns.ad_unit_id)
            .bind(columns.inventory_format_name)
            .bind(columns.operating_system_version_name)
            .bind(columns.operating_system_name)
            .bind(columns.country_name)
            .bind(columns.country_criteria_id)
            .bind(columns.date)
            .bind(columns.total_requests)
            .bind(columns.responses_served)
            .bind(columns.match_rate)
            .bind(columns.impressions)
            .bind(columns.clicks)
            .bind(columns.ctr)
            .bind(columns.average_ecpm)
            .bind(columns.payout)
            .bind(columns.cost_per_click)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn single_upsert(
        tx: &mut Transaction<'_, Postgres>,
        record: &AdReportRecord,
    ) -> Result<(), sqlx::Error> {
        let AdReportRecord { key, measures } = record;
        sqlx::query(SINGLE_UPSERT_SQL)
            .bind(&key.mobile_app_resolved_id)
            .bind(&key.mobile_app_name)
            .bind(&key.domain)
            .bind(&key.ad_unit_name)
            .bind(&key.ad_unit_id)
            .bind(&key.inventory_format_name)
            .bind(&key.operating_system_version_name)
            .bind(&key.operating_system_name)
            .bind(&key.country_name)
            .bind(&key.country_criteria_id)
            .bind(key.date)
            .bind(measures.total_requests)
            .bind(measures.responses_served)
            .bind(measures.match_rate)
            .bind(measures.impressions)
            .bind(measures.clicks)
            .bind(measures.ctr)
            .bind(measures.average_ecpm)
            .bind(measures.payout)
            .bind(measures.cost_per_click)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Row-by-row replay in a fresh transaction, later rows win
    async fn upsert_row_by_row(&self, records: &[AdReportRecord]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::single_upsert(&mut tx, record).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn is_cardinality_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(CARDINALITY_VIOLATION))
}

#[async_trait]
impl UpsertSink for PgUpsertSink {
    async fn upsert_batch(&self, records: &[AdReportRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        match Self::bulk_upsert(&mut tx, records).await {
            Ok(()) => {
                tx.commit().await?;
                debug!(records = records.len(), "Upserted batch");
                Ok(())
            },
            Err(err) if is_cardinality_violation(&err) => {
                tx.rollback().await?;
                warn!(
                    records = records.len(),
                    "Batch repeats a dimension tuple, retrying row by row"
                );
                self.upsert_row_by_row(records).await
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn upsert(&self, record: &AdReportRecord) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        Self::single_upsert(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
