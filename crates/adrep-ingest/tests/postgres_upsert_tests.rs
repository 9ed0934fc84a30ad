//! PostgreSQL upsert tests
//!
//! Runs [`PgUpsertSink`] against a real PostgreSQL container to verify the
//! `ON CONFLICT` behaviour on the 11-column dimension key.
//!
//! These tests require Docker. Run with:
//!
//! ```bash
//! cargo test -p adrep-ingest --test postgres_upsert_tests -- --ignored --nocapture
//! ```

use std::sync::Arc;

use adrep_ingest::{
    AdReportRecord, DimensionKey, ImportOrchestrator, IngestConfig, JobStatus, Measures,
    PgUpsertSink, UpsertSink,
};
use anyhow::Result;
use chrono::NaiveDate;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

const CREATE_TABLE: &str = r#"
CREATE TABLE ad_report_data (
    id BIGSERIAL PRIMARY KEY,
    mobile_app_resolved_id TEXT NOT NULL,
    mobile_app_name TEXT NOT NULL,
    domain TEXT NOT NULL,
    ad_unit_name TEXT NOT NULL,
    ad_unit_id TEXT NOT NULL,
    inventory_format_name TEXT NOT NULL,
    operating_system_version_name TEXT NOT NULL,
    operating_system_name TEXT NOT NULL,
    country_name TEXT NOT NULL,
    country_criteria_id TEXT NOT NULL,
    date DATE NOT NULL,
    ad_exchange_total_requests BIGINT,
    ad_exchange_responses_served BIGINT,
    ad_exchange_match_rate DOUBLE PRECISION,
    ad_exchange_line_item_level_impressions BIGINT,
    ad_exchange_line_item_level_clicks BIGINT,
    ad_exchange_line_item_level_ctr DOUBLE PRECISION,
    average_ecpm DOUBLE PRECISION,
    payout DOUBLE PRECISION,
    ad_exchange_cost_per_click DOUBLE PRECISION,
    CONSTRAINT unique_ad_report_record UNIQUE (
        date, mobile_app_resolved_id, mobile_app_name, ad_unit_name, ad_unit_id,
        inventory_format_name, domain, operating_system_version_name,
        operating_system_name, country_name, country_criteria_id
    )
)
"#;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,adrep_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

async fn start_database() -> Result<(ContainerAsync<Postgres>, PgPool)> {
    let container = Postgres::default().with_tag("16-alpine").start().await?;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let conn_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&conn_string)
        .await?;
    sqlx::query(CREATE_TABLE).execute(&pool).await?;

    Ok((container, pool))
}

async fn row_count(pool: &PgPool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM ad_report_data")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn record(app: &str, clicks: i64, payout: Option<f64>) -> AdReportRecord {
    AdReportRecord {
        key: DimensionKey {
            mobile_app_resolved_id: app.to_string(),
            mobile_app_name: "Example App".to_string(),
            domain: "example.com".to_string(),
            ad_unit_name: "Banner Top".to_string(),
            ad_unit_id: "au-1".to_string(),
            inventory_format_name: "Banner".to_string(),
            operating_system_version_name: "14.2".to_string(),
            operating_system_name: "Android".to_string(),
            country_name: "Germany".to_string(),
            country_criteria_id: "2276".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        },
        measures: Measures {
            clicks: Some(clicks),
            payout,
            ..Default::default()
        },
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_bulk_upsert_overwrites_measures() -> Result<()> {
    init_tracing();
    let (_container, pool) = start_database().await?;
    let sink = PgUpsertSink::new(pool.clone());

    sink.upsert_batch(&[record("a", 1, Some(0.5)), record("b", 2, None), record("c", 3, None)])
        .await?;
    sink.upsert_batch(&[record("a", 10, None), record("b", 20, Some(4.0)), record("c", 30, None)])
        .await?;

    assert_eq!(row_count(&pool).await?, 3);

    let (clicks, payout): (Option<i64>, Option<f64>) = sqlx::query_as(
        "SELECT ad_exchange_line_item_level_clicks, payout FROM ad_report_data WHERE mobile_app_resolved_id = 'a'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(clicks, Some(10));
    assert_eq!(payout, None, "measures are replaced, not merged");

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_duplicate_key_within_batch_falls_back_to_rows() -> Result<()> {
    init_tracing();
    let (_container, pool) = start_database().await?;
    let sink = PgUpsertSink::new(pool.clone());

    sink.upsert_batch(&[record("a", 1, None), record("b", 2, None), record("a", 7, None)])
        .await?;

    assert_eq!(row_count(&pool).await?, 2);
    let clicks: Option<i64> = sqlx::query_scalar(
        "SELECT ad_exchange_line_item_level_clicks FROM ad_report_data WHERE mobile_app_resolved_id = 'a'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(clicks, Some(7), "later rows win");

    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_reimport_through_pipeline_is_idempotent() -> Result<()> {
    init_tracing();
    let (_container, pool) = start_database().await?;
    let sink: Arc<dyn UpsertSink> = Arc::new(PgUpsertSink::new(pool.clone()));
    sink.health_check().await?;

    let orchestrator = ImportOrchestrator::new(IngestConfig::default(), sink);
    let csv = "App ID,App Name,Domain,Ad Unit,Ad Unit ID,Inventory Format,OS Version,OS,Country,Country ID,Date,Clicks\n\
               a,Example App,example.com,Banner Top,au-1,Banner,14.2,Android,Germany,2276,31-01-2024,1\n\
               b,Example App,example.com,Banner Top,au-1,Banner,14.2,Android,Germany,2276,2024-01-31,2\n\
               c,Example App,example.com,Banner Top,au-1,Banner,14.2,Android,Germany,2276,2024-01-31,3\n";

    for _ in 0..2 {
        let job_id = orchestrator.submit(csv.as_bytes(), "report.csv")?;
        let status = loop {
            match orchestrator.job_status(job_id) {
                Some(status) if status.is_terminal() => break status,
                _ => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        };
        info!(job_id, status = %status, "Import finished");
        assert!(matches!(status, JobStatus::Completed(_)));
    }

    assert_eq!(row_count(&pool).await?, 3);
    orchestrator.shutdown().await;
    Ok(())
}
