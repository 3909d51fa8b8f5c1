//! Battlecard Processor: normalizes raw model text into the fixed section schema.
//!
//! JSON is preferred (the prompt asks for it), but the processor also accepts
//! fenced JSON, JSON embedded in prose, and plain "Heading:" / markdown text.
//! Any section the backend did not deliver gets the `NOT_AVAILABLE` placeholder.
//! The only hard failures are text that is empty or explicitly about another tenant.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::ProcessError;
use crate::llm_client::strip_json_fences;
use crate::models::battlecard::normalize_label;
use crate::models::{Battlecard, Priority, Provenance, Section, Sections, TenantRecord};

/// Nesting depth searched for sections, e.g. `{"battlecard": {"summary": ...}}`.
const MAX_JSON_DEPTH: usize = 2;

const SCORE_KEYS: &[&str] = &["overall_score", "score", "fit_score"];
const PRIORITY_KEYS: &[&str] = &["priority_level", "priority"];
const CONFIDENCE_KEYS: &[&str] = &["confidence_score", "confidence", "data_confidence"];

#[derive(Debug, Default)]
struct Extracted {
    sections: HashMap<Section, String>,
    overall_score: Option<u32>,
    priority: Option<Priority>,
    confidence: Option<f64>,
}

impl Extracted {
    fn append(&mut self, section: Section, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let entry = self.sections.entry(section).or_default();
        if !entry.is_empty() {
            entry.push('\n');
        }
        entry.push_str(text);
    }

    fn is_empty(&self) -> bool {
        self.sections.is_empty()
            && self.overall_score.is_none()
            && self.priority.is_none()
            && self.confidence.is_none()
    }
}

pub fn process(
    record: &TenantRecord,
    raw: &str,
    provenance: Provenance,
) -> Result<Battlecard, ProcessError> {
    let text = strip_json_fences(raw);
    if text.is_empty() {
        return Err(ProcessError::Unparseable {
            reason: "backend returned an empty response".to_string(),
        });
    }

    let mut extracted = match parse_json_object(text) {
        Some(object) => {
            check_tenant(record, &object)?;
            let mut extracted = Extracted::default();
            extract_object(&object, 0, &mut extracted);
            if extracted.sections.is_empty() {
                extracted.append(Section::Summary, &render_object(&object));
            }
            extracted
        }
        None => extract_text(text),
    };

    let missing: Vec<&str> = Section::ALL
        .into_iter()
        .filter(|s| !extracted.sections.contains_key(s))
        .map(Section::key)
        .collect();
    if !missing.is_empty() {
        debug!(tenant_id = record.tenant_id(), ?missing, "Filling sections with placeholder");
    }

    Ok(Battlecard {
        provenance,
        sections: Sections::from_fn(|s| extracted.sections.remove(&s)),
        overall_score: extracted.overall_score,
        priority: extracted.priority,
        confidence: extracted.confidence,
        geocode: None,
    })
}

/// Finds a JSON object in the text: the whole text first, then the widest
/// `{ ... }` span. A top-level array yields its first object.
fn parse_json_object(text: &str) -> Option<Map<String, Value>> {
    let as_object = |value: Value| match value {
        Value::Object(map) => Some(map),
        Value::Array(items) => items.into_iter().find_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        }),
        _ => None,
    };

    if let Some(map) = serde_json::from_str(text).ok().and_then(as_object) {
        return Some(map);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end])
        .ok()
        .and_then(as_object)
}

fn check_tenant(record: &TenantRecord, object: &Map<String, Value>) -> Result<(), ProcessError> {
    let claimed = match object.get("tenant_id") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Ok(()),
    };
    if claimed.is_empty() || claimed == record.tenant_id() {
        Ok(())
    } else {
        Err(ProcessError::Unparseable {
            reason: format!(
                "response is for tenant '{claimed}', expected '{}'",
                record.tenant_id()
            ),
        })
    }
}

fn extract_object(object: &Map<String, Value>, depth: usize, out: &mut Extracted) {
    for (key, value) in object {
        if let Some(section) = Section::from_label(key) {
            out.append(section, &render_value(value));
            continue;
        }
        let normalized = normalize_label(key);
        if SCORE_KEYS.contains(&normalized.as_str()) {
            out.overall_score = out.overall_score.or_else(|| score_from_value(value));
        } else if PRIORITY_KEYS.contains(&normalized.as_str()) {
            out.priority = out
                .priority
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()));
        } else if CONFIDENCE_KEYS.contains(&normalized.as_str()) && !value.is_object() {
            out.confidence = out.confidence.or_else(|| confidence_from_value(value));
        } else if let Value::Object(inner) = value {
            if depth < MAX_JSON_DEPTH {
                extract_object(inner, depth + 1, out);
            }
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_inline)
            .filter(|s| !s.is_empty())
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => render_object(map),
    }
}

fn render_object(map: &Map<String, Value>) -> String {
    map.iter()
        .map(|(k, v)| (k, render_inline(v)))
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single-line rendering used for list items and nested values.
fn render_inline(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(render_inline)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k, render_inline(v)))
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("; "),
        other => render_value(other),
    }
}

fn score_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_f64().and_then(clamp_score),
        Value::String(s) => parse_score(s),
        _ => None,
    }
}

/// Accepts "72", "72.5", "72/100" and "72%".
fn parse_score(text: &str) -> Option<u32> {
    text.trim()
        .split(['/', '%'])
        .next()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .and_then(clamp_score)
}

fn clamp_score(value: f64) -> Option<u32> {
    value
        .is_finite()
        .then(|| value.round().clamp(0.0, 100.0) as u32)
}

fn confidence_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(clamp_confidence),
        Value::String(s) => parse_confidence(s),
        _ => None,
    }
}

/// Accepts a fraction ("0.85") or a percentage ("85", "85%").
fn parse_confidence(text: &str) -> Option<f64> {
    text.trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(clamp_confidence)
}

fn clamp_confidence(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let fraction = if value > 1.0 { value / 100.0 } else { value };
    Some(fraction.clamp(0.0, 1.0))
}

enum Line<'a> {
    Section(Section, &'a str),
    Score(&'a str),
    Priority(&'a str),
    Confidence(&'a str),
    Body(&'a str),
}

/// Recognizes "## Strengths", "**Weaknesses:**", "Objections: ..." and
/// "Overall score: 80" lines.
fn classify_line(line: &str) -> Line<'_> {
    let (label, rest) = match line.split_once(':') {
        Some((label, rest)) => (label, rest.trim().trim_start_matches('*').trim()),
        None => (line, ""),
    };
    let label = label.trim().trim_start_matches('#').trim().trim_matches('*').trim();
    if label.starts_with(['-', '+']) {
        return Line::Body(line);
    }

    if let Some(section) = Section::from_label(label) {
        return Line::Section(section, rest);
    }
    let normalized = normalize_label(label);
    if SCORE_KEYS.contains(&normalized.as_str()) {
        Line::Score(rest)
    } else if PRIORITY_KEYS.contains(&normalized.as_str()) {
        Line::Priority(rest)
    } else if CONFIDENCE_KEYS.contains(&normalized.as_str()) {
        Line::Confidence(rest)
    } else {
        Line::Body(line)
    }
}

fn extract_text(text: &str) -> Extracted {
    let mut out = Extracted::default();
    let mut preamble = Vec::new();
    let mut current: Option<Section> = None;

    for line in text.lines() {
        match classify_line(line) {
            Line::Section(section, rest) => {
                current = Some(section);
                out.append(section, rest);
            }
            Line::Score(rest) => out.overall_score = out.overall_score.or_else(|| parse_score(rest)),
            Line::Priority(rest) => {
                out.priority = out
                    .priority
                    .or_else(|| rest.trim_matches(|c: char| !c.is_alphanumeric()).parse().ok())
            }
            Line::Confidence(rest) => {
                out.confidence = out.confidence.or_else(|| parse_confidence(rest))
            }
            Line::Body(body) => match current {
                Some(section) => out.append(section, body),
                None => preamble.push(body),
            },
        }
    }

    if out.is_empty() {
        // Nothing recognizable: keep the text rather than dropping it.
        out.append(Section::Summary, text);
    } else if !out.sections.contains_key(&Section::Summary) {
        out.append(Section::Summary, &preamble.join("\n"));
    }
    out
}
