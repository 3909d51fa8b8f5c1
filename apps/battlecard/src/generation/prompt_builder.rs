//! Prompt Builder: turns a tenant record into the exact text sent to the model.
//!
//! `build` is total and pure: no clock, no randomness, no I/O. Fields are rendered
//! in sorted order so the same record always yields byte-identical prompts,
//! which is what makes `Prompt::hash` usable for skip-before-generate.

use sha2::{Digest, Sha256};

use crate::config::PipelineConfig;
use crate::generation::prompts::{
    BATTLECARD_PROMPT_TEMPLATE, BATTLECARD_SYSTEM, NOT_PROVIDED, RESEARCH_NOTES_TEMPLATE,
    RESEARCH_PROMPT_TEMPLATE, RESEARCH_SYSTEM,
};
use crate::llm_client::prompts::{GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM, RECENCY_INSTRUCTION};
use crate::llm_client::CompletionRequest;
use crate::models::TenantRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Present when the two-pass research flow is enabled.
    pub research: Option<ResearchPrompt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchPrompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Hex SHA-256 over every part of the prompt.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            Some(self.system.as_str()),
            Some(self.user.as_str()),
            self.research.as_ref().map(|r| r.system.as_str()),
            self.research.as_ref().map(|r| r.user.as_str()),
        ] {
            match part {
                Some(text) => {
                    hasher.update([1u8]);
                    hasher.update(text.as_bytes());
                }
                None => hasher.update([0u8]),
            }
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    pub fn research_request(&self) -> Option<CompletionRequest> {
        self.research
            .as_ref()
            .map(|r| CompletionRequest::research(r.system.clone(), r.user.clone()))
    }

    /// The battlecard request, with research findings appended when available.
    pub fn battlecard_request(&self, research_notes: Option<&str>) -> CompletionRequest {
        let user = match research_notes.map(str::trim).filter(|n| !n.is_empty()) {
            Some(notes) => {
                let mut user = self.user.clone();
                user.push_str(&render_template(RESEARCH_NOTES_TEMPLATE, &[("notes", notes)]));
                user
            }
            None => self.user.clone(),
        };
        CompletionRequest::json(self.system.clone(), user)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    research_pass: bool,
}

impl PromptBuilder {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            research_pass: config.research_pass,
        }
    }

    pub fn build(&self, record: &TenantRecord) -> Prompt {
        let profile = render_profile(record);
        let user = render_template(
            BATTLECARD_PROMPT_TEMPLATE,
            &[
                ("grounding_instruction", GROUNDING_INSTRUCTION),
                ("tenant_id", record.tenant_id()),
                ("profile", profile.as_str()),
                ("metrics", render_metrics(record).as_str()),
                ("attributes", render_attributes(record).as_str()),
            ],
        );

        let research = self.research_pass.then(|| ResearchPrompt {
            system: RESEARCH_SYSTEM.to_string(),
            user: render_template(
                RESEARCH_PROMPT_TEMPLATE,
                &[
                    ("recency_instruction", RECENCY_INSTRUCTION),
                    ("profile", profile.as_str()),
                ],
            ),
        });

        Prompt {
            system: format!("{BATTLECARD_SYSTEM} {JSON_ONLY_SYSTEM}"),
            user,
            research,
        }
    }
}

fn render_profile(record: &TenantRecord) -> String {
    let or_placeholder = |v: Option<&str>| v.unwrap_or(NOT_PROVIDED).to_string();
    format!(
        "- Name: {}\n- Industry: {}\n- Plan tier: {}",
        or_placeholder(record.name()),
        or_placeholder(record.industry()),
        or_placeholder(record.plan_tier()),
    )
}

fn render_metrics(record: &TenantRecord) -> String {
    if record.metrics().is_empty() {
        return format!("- {NOT_PROVIDED}");
    }
    record
        .metrics()
        .iter()
        .map(|(name, value)| format!("- {name}: {}", format_number(*value)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_attributes(record: &TenantRecord) -> String {
    let lines: Vec<String> = record
        .fields()
        .iter()
        .filter(|(name, value)| {
            !value.trim().is_empty()
                && !TenantRecord::is_profile_column(name)
                && !record.metrics().contains_key(name.as_str())
        })
        .map(|(name, value)| format!("- {name}: {}", value.trim()))
        .collect();
    if lines.is_empty() {
        format!("- {NOT_PROVIDED}")
    } else {
        lines.join("\n")
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

/// Single-pass `{name}` substitution. Inserted values are never rescanned, so
/// braces inside tenant data cannot pull in other placeholders.
fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replacement = after.find('}').and_then(|end| {
            let name = &after[..end];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (end, *value))
        });
        match replacement {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(id: &str, pairs: &[(&str, &str)], metrics: &[(&str, f64)]) -> TenantRecord {
        TenantRecord::new(
            id,
            1,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            metrics
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn acme() -> TenantRecord {
        record(
            "t1",
            &[
                ("name", "Acme"),
                ("industry", "Manufacturing"),
                ("plan_tier", "Enterprise"),
                ("employees", "1200"),
                ("region", "EMEA"),
            ],
            &[("employees", 1200.0)],
        )
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = PromptBuilder::new(&PipelineConfig {
            research_pass: true,
            ..PipelineConfig::default()
        });
        let a = builder.build(&acme());
        let b = builder.build(&acme());
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_prompt_contains_record_data() {
        let prompt = PromptBuilder::default().build(&acme());
        assert!(prompt.user.contains("- Tenant ID: t1"));
        assert!(prompt.user.contains("- Name: Acme"));
        assert!(prompt.user.contains("- Plan tier: Enterprise"));
        assert!(prompt.user.contains("- employees: 1200"));
        assert!(prompt.user.contains("- region: EMEA"));
        assert!(prompt.user.contains("\"tenant_id\": \"t1\""));
        assert!(!prompt.user.contains("{profile}"));
        assert!(prompt.system.contains("valid JSON only"));
        assert!(prompt.research.is_none());
    }

    #[test]
    fn test_missing_fields_use_placeholder() {
        let prompt = PromptBuilder::default().build(&record("t2", &[], &[]));
        assert!(prompt.user.contains("- Name: Not provided"));
        assert!(prompt.user.contains("- Industry: Not provided"));
        assert!(prompt.user.contains("USAGE METRICS:\n- Not provided"));
    }

    #[test]
    fn test_different_records_hash_differently() {
        let builder = PromptBuilder::default();
        let other = record("t9", &[("name", "Globex")], &[]);
        assert_ne!(builder.build(&acme()).hash(), builder.build(&other).hash());
    }

    #[test]
    fn test_research_pass_changes_hash() {
        let plain = PromptBuilder::default().build(&acme());
        let researched = PromptBuilder::new(&PipelineConfig {
            research_pass: true,
            ..PipelineConfig::default()
        })
        .build(&acme());
        assert_eq!(plain.user, researched.user);
        assert_ne!(plain.hash(), researched.hash());
        assert!(researched
            .research
            .as_ref()
            .unwrap()
            .user
            .contains("- Name: Acme"));
    }

    #[test]
    fn test_braces_in_data_are_not_expanded() {
        let prompt = PromptBuilder::default().build(&record("t3", &[("name", "{metrics} Inc")], &[]));
        assert!(prompt.user.contains("- Name: {metrics} Inc"));
    }

    #[test]
    fn test_battlecard_request_appends_notes() {
        let prompt = PromptBuilder::default().build(&acme());
        let request = prompt.battlecard_request(Some("Opened a new plant in 2025."));
        assert!(request.json_output);
        assert!(request.user.starts_with(&prompt.user));
        assert!(request.user.contains("RESEARCH NOTES"));
        assert!(request.user.contains("Opened a new plant in 2025."));

        let without = prompt.battlecard_request(Some("   "));
        assert_eq!(without.user, prompt.user);
    }

    #[test]
    fn test_render_template_leaves_unknown_braces() {
        assert_eq!(
            render_template("{a} {\n  \"x\": 1 } {b}", &[("a", "1")]),
            "1 {\n  \"x\": 1 } {b}"
        );
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1200.0), "1200");
        assert_eq!(format_number(35.5), "35.5");
    }
}
