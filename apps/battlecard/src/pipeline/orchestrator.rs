//! Pipeline Orchestrator: drives every tenant record to a terminal outcome.
//!
//! Flow per tenant: build prompt → skip if an up-to-date card is stored →
//! (optional research call) → battlecard call → process → (optional
//! geocode) → write. The run report is uploaded as the run summary.
//!
//! Tenants run on a bounded pool of tokio tasks sharing one `LlmClient` (and so
//! one rate limiter). A tenant's failure never touches another tenant, and
//! only a `SourceError` (raised before `run` is called) can abort a run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::errors::RowError;
use crate::generation::{process, PromptBuilder};
use crate::geocode::{self, Geocoder};
use crate::llm_client::LlmClient;
use crate::models::{
    Battlecard, Coordinates, FailureKind, OutcomeKind, Priority, Provenance, RunOutcome,
    TenantRecord, TenantReport, TenantStage, TokenUsage,
};
use crate::pipeline::report::RunReport;
use crate::storage::StorageWriter;

pub struct Pipeline {
    llm: LlmClient,
    prompts: PromptBuilder,
    writer: StorageWriter,
    geocoder: Option<(Arc<dyn Geocoder>, Duration)>,
    concurrency: usize,
    force: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Run loop
// ────────────────────────────────────────────────────────────────────────────

impl Pipeline {
    pub fn new(
        llm: LlmClient,
        prompts: PromptBuilder,
        writer: StorageWriter,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            llm,
            prompts,
            writer,
            geocoder: None,
            concurrency: config.concurrency.max(1),
            force: config.force,
        }
    }

    /// Attaches a location to every newly generated card.
    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>, timeout: Duration) -> Self {
        self.geocoder = Some((geocoder, timeout));
        self
    }

    /// Processes every record and returns the aggregate report.
    ///
    /// Records are pulled from the source only when a worker slot is free, so
    /// after `cancel` fires no further records are read or started. Tenants
    /// already in flight run to completion.
    pub async fn run<I>(self: Arc<Self>, records: I, cancel: CancellationToken) -> RunReport
    where
        I: IntoIterator<Item = Result<TenantRecord, RowError>>,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            model_id = self.llm.model_id(),
            concurrency = self.concurrency,
            force = self.force,
            "Starting battlecard run"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut records = records.into_iter();
        let mut handles: Vec<(String, usize, JoinHandle<TenantReport>)> = Vec::new();
        let mut reports = Vec::new();
        let mut cancelled = false;

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(item) = records.next() else { break };
            let record = match item {
                Ok(record) => record,
                Err(row_error) => {
                    warn!("Skipping input row: {row_error}");
                    reports.push(TenantReport::from_row_error(&row_error));
                    continue;
                }
            };

            let tenant_id = record.tenant_id().to_string();
            let row = record.row();
            let span = info_span!("tenant", tenant_id = %tenant_id, row);
            let pipeline = Arc::clone(&self);
            let handle = tokio::spawn(
                async move {
                    let _permit = permit;
                    pipeline.process_tenant(record).await
                }
                .instrument(span),
            );
            handles.push((tenant_id, row, handle));
        }

        if cancelled {
            warn!(
                in_flight = handles.len(),
                "Run cancelled; waiting for started tenants to finish"
            );
        }

        for (tenant_id, row, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(join_error) => {
                    error!(tenant_id = %tenant_id, "Tenant task aborted: {join_error}");
                    TenantReport {
                        tenant_id,
                        row,
                        name: None,
                        stage: TenantStage::Fetched,
                        outcome: RunOutcome::Failed {
                            kind: FailureKind::Internal,
                            message: format!("tenant task aborted: {join_error}"),
                        },
                        usage: TokenUsage::default(),
                        overall_score: None,
                        priority: None,
                        confidence: None,
                        address: None,
                        coordinates: None,
                    }
                }
            };
            reports.push(report);
        }

        let mut report = RunReport::build(run_id, started_at, self.llm.model_id(), cancelled, reports);
        match self.writer.write_summary(&report).await {
            Ok(key) => report.summary_key = Some(key.to_string()),
            Err(e) => error!(%run_id, "Could not store run summary: {e}"),
        }
        info!(
            %run_id,
            total = report.counts.total,
            success = report.counts.success,
            skipped = report.counts.skipped,
            failed = report.counts.failed,
            input_tokens = report.token_usage.input_tokens,
            output_tokens = report.token_usage.output_tokens,
            cancelled,
            "Battlecard run finished"
        );
        report
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-tenant state machine
// ────────────────────────────────────────────────────────────────────────────

/// What is known about a tenant while it moves through the stages.
struct TenantRun {
    tenant_id: String,
    row: usize,
    name: Option<String>,
    stage: TenantStage,
    usage: TokenUsage,
    overall_score: Option<u32>,
    priority: Option<Priority>,
    confidence: Option<f64>,
    address: Option<String>,
    coordinates: Option<Coordinates>,
}

impl TenantRun {
    fn new(record: &TenantRecord) -> Self {
        Self {
            tenant_id: record.tenant_id().to_string(),
            row: record.row(),
            name: record.name().map(String::from),
            stage: TenantStage::Fetched,
            usage: TokenUsage::default(),
            overall_score: None,
            priority: None,
            confidence: None,
            address: record.address(),
            coordinates: None,
        }
    }

    fn note_card(&mut self, card: &Battlecard) {
        self.overall_score = card.overall_score;
        self.priority = card.priority;
        self.confidence = card.confidence;
        self.coordinates = card.geocode.as_ref().and_then(|g| g.coordinates());
    }

    fn finish(self, stage: TenantStage, outcome: RunOutcome) -> TenantReport {
        match &outcome {
            RunOutcome::Success { storage_key } => info!(storage_key = %storage_key, "Battlecard stored"),
            RunOutcome::Skipped(reason) => info!("Skipped: {reason}"),
            RunOutcome::Failed { kind, message } => {
                warn!(stage = ?self.stage, %kind, "Tenant failed: {message}")
            }
        }
        TenantReport {
            tenant_id: self.tenant_id,
            row: self.row,
            name: self.name,
            stage,
            outcome,
            usage: self.usage,
            overall_score: self.overall_score,
            priority: self.priority,
            confidence: self.confidence,
            address: self.address,
            coordinates: self.coordinates,
        }
    }
}

impl Pipeline {
    async fn process_tenant(&self, record: TenantRecord) -> TenantReport {
        let mut run = TenantRun::new(&record);

        let prompt = self.prompts.build(&record);
        let prompt_hash = prompt.hash();
        run.stage = TenantStage::Prompted;

        // Skip-before-generate: an identical prompt to the same model was already answered.
        if !self.force {
            match self.writer.find_existing(record.tenant_id()).await {
                Ok(Some(existing)) if existing.matches_generation(&prompt_hash, self.llm.model_id()) => {
                    run.note_card(&existing.card);
                    let key = self.writer.key_for(record.tenant_id());
                    return run.finish(TenantStage::Skipped, RunOutcome::already_exists(key.to_string()));
                }
                Ok(_) => {}
                // Fail before spending an LLM call on a card that cannot be stored.
                Err(e) => return run.finish(TenantStage::StoreFailed, RunOutcome::from(&e)),
            }
        }

        let research_notes = match prompt.research_request() {
            Some(request) => match self.llm.complete(&request).await {
                Ok(completion) => {
                    run.usage += completion.usage;
                    Some(completion.text)
                }
                Err(e) => {
                    warn!("Research call failed, continuing without notes: {e}");
                    None
                }
            },
            None => None,
        };

        let request = prompt.battlecard_request(research_notes.as_deref());
        let completion = match self.llm.complete(&request).await {
            Ok(completion) => completion,
            Err(e) => return run.finish(TenantStage::LlmFailed, RunOutcome::from(&e)),
        };
        run.usage += completion.usage;
        run.stage = TenantStage::Completed;

        let provenance = Provenance::new(record.tenant_id(), self.llm.model_id(), &prompt_hash);
        let mut card = match process(&record, &completion.text, provenance) {
            Ok(card) => card,
            Err(e) => return run.finish(TenantStage::ProcessFailed, RunOutcome::from(&e)),
        };
        if let Some((geocoder, timeout)) = &self.geocoder {
            card.geocode = geocode::locate(geocoder.as_ref(), &record, *timeout).await;
        }
        run.note_card(&card);
        run.stage = TenantStage::Processed;

        let outcome = self.writer.write(&card).await;
        let stage = match outcome.kind() {
            OutcomeKind::Success => TenantStage::Stored,
            OutcomeKind::Skipped => TenantStage::Skipped,
            OutcomeKind::Failed => TenantStage::StoreFailed,
        };
        run.finish(stage, outcome)
    }
}
