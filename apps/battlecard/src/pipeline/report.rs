//! Run report: the machine-readable result of one pipeline run.
//!
//! Printed on stdout and uploaded next to the cards as the run summary.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{
    Coordinates, FailureKind, OutcomeKind, Priority, RunOutcome, TenantReport, TokenUsage,
};

/// How many scored tenants the report ranks.
pub const TOP_PROSPECTS: usize = 20;

/// Inclusive score ranges, highest first.
const SCORE_BUCKETS: [(&str, u32, u32); 5] = [
    ("80-100", 80, 100),
    ("60-79", 60, 79),
    ("40-59", 40, 59),
    ("20-39", 20, 39),
    ("0-19", 0, 19),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTenant {
    pub tenant_id: String,
    pub row: usize,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedTenant {
    pub tenant_id: String,
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreBucket {
    pub range: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prospect {
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub overall_score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    /// Tenants whose current battlecard carries a score.
    pub scored: usize,
    pub average_score: Option<f64>,
    /// Mean confidence over scored tenants that report one, two decimals.
    pub average_confidence: Option<f64>,
    pub distribution: Vec<ScoreBucket>,
    pub top_prospects: Vec<Prospect>,
}

impl ScoreSummary {
    fn from_tenants(tenants: &[TenantReport]) -> Self {
        let mut prospects: Vec<Prospect> = tenants
            .iter()
            .filter(|t| t.outcome.kind() != OutcomeKind::Failed)
            .filter_map(|t| {
                t.overall_score.map(|score| Prospect {
                    tenant_id: t.tenant_id.clone(),
                    name: t.name.clone(),
                    overall_score: score,
                    priority: t.priority,
                    confidence: t.confidence,
                    address: t.address.clone(),
                    coordinates: t.coordinates,
                })
            })
            .collect();

        let scored = prospects.len();
        let average_score = (scored > 0).then(|| {
            let sum: u64 = prospects.iter().map(|p| u64::from(p.overall_score)).sum();
            (sum as f64 / scored as f64 * 10.0).round() / 10.0
        });
        let confidences: Vec<f64> = prospects.iter().filter_map(|p| p.confidence).collect();
        let average_confidence = (!confidences.is_empty()).then(|| {
            let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
            (mean * 100.0).round() / 100.0
        });
        let distribution = SCORE_BUCKETS
            .iter()
            .map(|&(range, low, high)| ScoreBucket {
                range,
                count: prospects
                    .iter()
                    .filter(|p| (low..=high).contains(&p.overall_score))
                    .count(),
            })
            .collect();

        prospects.sort_by(|a, b| {
            Reverse(a.overall_score)
                .cmp(&Reverse(b.overall_score))
                .then_with(|| a.tenant_id.cmp(&b.tenant_id))
        });
        prospects.truncate(TOP_PROSPECTS);

        Self {
            scored,
            average_score,
            average_confidence,
            distribution,
            top_prospects: prospects,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub model_id: String,
    /// The run was interrupted; tenants never started are not listed.
    pub cancelled: bool,
    pub counts: OutcomeCounts,
    pub failures: Vec<FailedTenant>,
    pub skipped: Vec<SkippedTenant>,
    pub token_usage: TokenUsage,
    pub scores: ScoreSummary,
    pub tenants: Vec<TenantReport>,
    /// Where this report was uploaded, once stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_key: Option<String>,
}

impl RunReport {
    /// Aggregates per-tenant results. Tenants are listed in input order.
    pub fn build(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        model_id: &str,
        cancelled: bool,
        mut tenants: Vec<TenantReport>,
    ) -> Self {
        tenants.sort_by_key(|t| t.row);

        let mut counts = OutcomeCounts {
            total: tenants.len(),
            ..OutcomeCounts::default()
        };
        let mut failures = Vec::new();
        let mut skipped = Vec::new();
        let mut token_usage = TokenUsage::default();

        for tenant in &tenants {
            token_usage += tenant.usage;
            match &tenant.outcome {
                RunOutcome::Success { .. } => counts.success += 1,
                RunOutcome::Skipped(reason) => {
                    counts.skipped += 1;
                    skipped.push(SkippedTenant {
                        tenant_id: tenant.tenant_id.clone(),
                        row: tenant.row,
                        reason: reason.to_string(),
                    });
                }
                RunOutcome::Failed { kind, message } => {
                    counts.failed += 1;
                    failures.push(FailedTenant {
                        tenant_id: tenant.tenant_id.clone(),
                        row: tenant.row,
                        kind: *kind,
                        reason: message.clone(),
                    });
                }
            }
        }

        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            model_id: model_id.to_string(),
            cancelled,
            counts,
            failures,
            skipped,
            token_usage,
            scores: ScoreSummary::from_tenants(&tenants),
            tenants,
            summary_key: None,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0
    }

    /// 0 when no tenant failed, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.has_failures())
    }
}
