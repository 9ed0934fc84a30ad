//! ADREP Ingest - import ad inventory reports from the command line

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adrep_common::logging::{init_logging, LogConfig, LogLevel};
use adrep_ingest::{
    ImportOrchestrator, IngestConfig, JobStatus, MemorySink, PgUpsertSink, StorageBackend,
    UpsertSink,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "adrep-ingest")]
#[command(author, version, about = "ADREP report import tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Import one CSV report
    Import {
        /// CSV file to import
        file: PathBuf,

        /// Records per persistence batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Keep records in memory instead of writing to PostgreSQL
        #[arg(long)]
        memory: bool,

        /// PostgreSQL connection string
        #[arg(long, env = "DATABASE_URL", default_value = "postgresql://localhost/adrep")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("adrep-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Import {
            file,
            batch_size,
            memory,
            database_url,
        } => {
            let mut config = IngestConfig::from_env().context("Invalid ingest configuration")?;
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if memory {
                config.storage = StorageBackend::Memory;
            }
            config.validate()?;

            import(config, &file, &database_url).await?;
        },
    }

    Ok(())
}

async fn import(config: IngestConfig, file: &Path, database_url: &str) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let sink: Arc<dyn UpsertSink> = match config.storage {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Arc::new(MemorySink::new())
        },
        StorageBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.persistence_workers as u32 + 1)
                .acquire_timeout(Duration::from_secs(10))
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;
            Arc::new(PgUpsertSink::new(pool))
        },
    };
    sink.health_check().await.context("Storage health check failed")?;

    let orchestrator = ImportOrchestrator::new(config, sink);
    let job_id = orchestrator.submit(bytes, filename.as_str())?;
    info!(job_id, filename = %filename, "Import started");

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos:>3}% {msg}")?
            .progress_chars("=> "),
    );

    let status = loop {
        if let Some(progress) = orchestrator.progress(job_id) {
            bar.set_position(u64::from(progress.progress_percentage));
            bar.set_message(format!(
                "{} ({}/{} rows, {} errors)",
                progress.current_phase,
                progress.processed_records,
                progress.total_records,
                progress.error_records
            ));
        }

        match orchestrator.job_status(job_id) {
            Some(status) if status.is_terminal() => break status,
            Some(_) => tokio::time::sleep(Duration::from_millis(200)).await,
            None => bail!("Import job {} disappeared", job_id),
        }
    };

    orchestrator.shutdown().await;

    match status {
        JobStatus::Failed(_) => {
            bar.abandon_with_message(status.to_string());
            bail!("{}", status)
        },
        _ => {
            bar.finish_with_message(status.to_string());
            info!(job_id, status = %status, "Import finished");
            Ok(())
        },
    }
}
