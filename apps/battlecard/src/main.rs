mod config;
mod errors;
mod generation;
mod geocode;
mod llm_client;
mod models;
mod pipeline;
mod source;
mod storage;
#[cfg(test)]
mod testing;

use std::io::Cursor;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StorageBackend};
use crate::errors::{RowError, SourceError};
use crate::generation::PromptBuilder;
use crate::geocode::google::GoogleGeocoder;
use crate::llm_client::rate_limit::RateLimiter;
use crate::llm_client::{build_backend, LlmClient};
use crate::models::TenantRecord;
use crate::pipeline::{Pipeline, RunReport};
use crate::source::{CsvRecordSource, InputLocation};
use crate::storage::local::LocalBlobStore;
use crate::storage::s3::{build_s3_client, S3BlobStore};
use crate::storage::{BlobStore, StorageWriter};

/// Exit status for configuration errors and an unusable input table.
const EXIT_FATAL: u8 = 2;

type Records = Box<dyn Iterator<Item = Result<TenantRecord, RowError>> + Send>;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("battlecard: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    // Logs go to stderr; stdout carries only the run report.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.log_level))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting battlecard v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(report) => ExitCode::from(report.exit_code()),
        Err(e) => {
            error!("Run aborted: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(config: Config) -> Result<RunReport> {
    let store: Arc<dyn BlobStore> = match &config.storage.backend {
        StorageBackend::S3 { bucket } => {
            info!("Storing battlecards in s3://{bucket}/{}", config.storage.key_prefix);
            Arc::new(S3BlobStore::new(build_s3_client(&config.s3).await, bucket.clone()))
        }
        StorageBackend::Local { root } => {
            info!("Storing battlecards under {}", root.display());
            Arc::new(LocalBlobStore::new(root.clone()))
        }
    };

    let backend = build_backend(&config.llm).context("failed to build LLM HTTP client")?;
    let limiter = Arc::new(RateLimiter::new(config.llm.requests_per_minute));
    let llm = LlmClient::from_config(backend, limiter, &config.llm);
    info!(
        "LLM client initialized (provider: {:?}, model: {})",
        config.llm.provider,
        llm.model_id()
    );

    let writer = StorageWriter::new(store, config.storage.key_prefix.clone(), config.storage.timeout);
    let mut pipeline = Pipeline::new(llm, PromptBuilder::new(&config.pipeline), writer, &config.pipeline);
    if let Some(geocode) = &config.geocode {
        let geocoder = GoogleGeocoder::new(geocode).context("failed to build geocoding HTTP client")?;
        info!("Geocoding enabled (region: {})", geocode.region_code);
        pipeline = pipeline.with_geocoder(Arc::new(geocoder), geocode.timeout);
    }
    let pipeline = Arc::new(pipeline);

    let records = open_records(&config).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; no new tenants will be started");
                cancel.cancel();
            }
        }
    });

    let report = pipeline.run(records, cancel).await;

    let json = serde_json::to_string_pretty(&report).context("failed to encode run report")?;
    println!("{json}");
    if let Some(path) = &config.report_path {
        if let Err(e) = tokio::fs::write(path, &json).await {
            warn!("Could not write report to {}: {e}", path.display());
        }
    }

    for prospect in report.scores.top_prospects.iter().take(5) {
        info!(
            "Top prospect: {} ({}) score {}",
            prospect.tenant_id,
            prospect.name.as_deref().unwrap_or("unnamed"),
            prospect.overall_score
        );
    }
    for failure in &report.failures {
        warn!("Failed: {} ({}): {}", failure.tenant_id, failure.kind, failure.reason);
    }

    Ok(report)
}

/// Opens the configured input table, fetching it first when it lives in object storage.
async fn open_records(config: &Config) -> Result<Records, SourceError> {
    match InputLocation::parse(&config.source.input) {
        InputLocation::File(path) => {
            let source = CsvRecordSource::load(Path::new(&path), &config.source).await?;
            info!("Reading tenants from {path} ({} columns)", source.headers().len());
            Ok(Box::new(source))
        }
        InputLocation::Object { bucket, key } => {
            let location = format!("s3://{bucket}/{key}");
            let store = S3BlobStore::new(build_s3_client(&config.s3).await, bucket);
            let body = store.get(&key).await.map_err(|e| SourceError::Fetch {
                location: location.clone(),
                message: e.to_string(),
            })?;
            let source = CsvRecordSource::from_reader(Cursor::new(body), &config.source)?;
            info!("Reading tenants from {location} ({} columns)", source.headers().len());
            Ok(Box::new(source))
        }
    }
}
