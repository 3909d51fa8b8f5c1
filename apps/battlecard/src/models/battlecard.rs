use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::geocode::GeocodeData;

/// Placeholder written into any section the backend did not deliver.
pub const NOT_AVAILABLE: &str = "Not available.";

/// The fixed battlecard section schema, in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Summary,
    Strengths,
    Weaknesses,
    ObjectionHandling,
    CompetitivePositioning,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Summary,
        Section::Strengths,
        Section::Weaknesses,
        Section::ObjectionHandling,
        Section::CompetitivePositioning,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Section::Summary => "summary",
            Section::Strengths => "strengths",
            Section::Weaknesses => "weaknesses",
            Section::ObjectionHandling => "objection_handling",
            Section::CompetitivePositioning => "competitive_positioning",
        }
    }

    /// Normalized names (lowercase, `_`-separated) that map onto this section.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Section::Summary => &["summary", "overview", "executive_summary", "profile_summary"],
            Section::Strengths => &["strengths", "key_strengths", "key_selling_points", "selling_points"],
            Section::Weaknesses => &["weaknesses", "risks", "pain_points", "likely_pain_points", "gaps"],
            Section::ObjectionHandling => &[
                "objection_handling",
                "objections",
                "common_objections",
                "objection_responses",
            ],
            Section::CompetitivePositioning => &[
                "competitive_positioning",
                "competitive_notes",
                "competition",
                "competitive_angles",
                "competitive_landscape",
            ],
        }
    }

    /// Matches a free-form label ("Objection Handling", "competitive-notes") to a section.
    pub fn from_label(label: &str) -> Option<Section> {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            return None;
        }
        Section::ALL
            .into_iter()
            .find(|s| s.aliases().contains(&normalized.as_str()))
    }
}

/// Lowercases and collapses every run of non-alphanumerics to a single `_`.
pub(crate) fn normalize_label(label: &str) -> String {
    let mapped: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    mapped
        .split('_')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// All five sections. Being a struct, a card can never be partially shaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sections {
    pub summary: String,
    pub strengths: String,
    pub weaknesses: String,
    pub objection_handling: String,
    pub competitive_positioning: String,
}

impl Sections {
    /// Builds every section from `f`, substituting the placeholder for blank text.
    pub fn from_fn(mut f: impl FnMut(Section) -> Option<String>) -> Self {
        let mut take = |s: Section| {
            f(s).map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };
        Self {
            summary: take(Section::Summary),
            strengths: take(Section::Strengths),
            weaknesses: take(Section::Weaknesses),
            objection_handling: take(Section::ObjectionHandling),
            competitive_positioning: take(Section::CompetitivePositioning),
        }
    }

    pub fn get(&self, section: Section) -> &str {
        match section {
            Section::Summary => &self.summary,
            Section::Strengths => &self.strengths,
            Section::Weaknesses => &self.weaknesses,
            Section::ObjectionHandling => &self.objection_handling,
            Section::CompetitivePositioning => &self.competitive_positioning,
        }
    }

    pub fn is_placeholder(&self, section: Section) -> bool {
        self.get(section) == NOT_AVAILABLE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Immediate,
    High,
    Medium,
    Low,
    Disqualify,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Priority::Immediate),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            "disqualify" | "disqualified" => Ok(Priority::Disqualify),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Immediate => "immediate",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::Disqualify => "disqualify",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub tenant_id: String,
    pub generated_at: DateTime<Utc>,
    pub model_id: String,
    pub prompt_hash: String,
}

impl Provenance {
    pub fn new(tenant_id: &str, model_id: &str, prompt_hash: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            generated_at: Utc::now(),
            model_id: model_id.to_string(),
            prompt_hash: prompt_hash.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battlecard {
    pub provenance: Provenance,
    pub sections: Sections,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// How well the model could verify the data behind the card, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocode: Option<GeocodeData>,
}

impl Battlecard {
    pub fn tenant_id(&self) -> &str {
        &self.provenance.tenant_id
    }

    /// SHA-256 over everything except `generated_at`, hex encoded.
    /// Two cards with identical content hash identically regardless of when
    /// they were produced.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.provenance.tenant_id.as_str(),
            self.provenance.model_id.as_str(),
            self.provenance.prompt_hash.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        for section in Section::ALL {
            hasher.update(section.key().as_bytes());
            hasher.update([0u8]);
            hasher.update(self.sections.get(section).as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(
            self.overall_score
                .map(|s| s.to_string())
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update([0u8]);
        hasher.update(
            self.priority
                .map(|p| p.to_string())
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update([0u8]);
        hasher.update(
            self.confidence
                .map(|c| c.to_string())
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update([0u8]);
        if let Some(geocode) = &self.geocode {
            hasher.update(serde_json::to_vec(geocode).unwrap_or_default());
        }
        hex::encode(hasher.finalize())
    }
}

/// The JSON document written to the blob store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBattlecard {
    pub content_hash: String,
    #[serde(flatten)]
    pub card: Battlecard,
}

impl StoredBattlecard {
    pub fn new(card: Battlecard) -> Self {
        Self {
            content_hash: card.content_hash(),
            card,
        }
    }

    /// Whether this stored card was generated from the same prompt by the same model.
    pub fn matches_generation(&self, prompt_hash: &str, model_id: &str) -> bool {
        self.card.provenance.prompt_hash == prompt_hash && self.card.provenance.model_id == model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(summary: &str) -> Battlecard {
        Battlecard {
            provenance: Provenance::new("t1", "gemini-2.5-flash", "abc"),
            sections: Sections::from_fn(|s| (s == Section::Summary).then(|| summary.to_string())),
            overall_score: Some(72),
            priority: Some(Priority::High),
            confidence: Some(0.8),
            geocode: None,
        }
    }

    #[test]
    fn test_from_fn_fills_placeholders() {
        let sections = Sections::from_fn(|s| match s {
            Section::Strengths => Some("  ".to_string()),
            Section::Summary => Some("Acme is growing".to_string()),
            _ => None,
        });
        assert_eq!(sections.summary, "Acme is growing");
        for s in [
            Section::Strengths,
            Section::Weaknesses,
            Section::ObjectionHandling,
            Section::CompetitivePositioning,
        ] {
            assert!(sections.is_placeholder(s), "{s:?} should be a placeholder");
        }
    }

    #[test]
    fn test_content_hash_ignores_generation_time() {
        let a = card("Acme");
        let mut b = a.clone();
        b.provenance.generated_at = a.provenance.generated_at + chrono::Duration::hours(3);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_changes_with_sections() {
        assert_ne!(card("Acme").content_hash(), card("Acme Corp").content_hash());
    }

    #[test]
    fn test_content_hash_covers_geocode() {
        let plain = card("Acme");
        let mut located = plain.clone();
        located.geocode = Some(GeocodeData::no_results("Springfield, IL"));
        assert_ne!(plain.content_hash(), located.content_hash());
    }

    #[test]
    fn test_section_from_label_variants() {
        assert_eq!(Section::from_label("Objection Handling"), Some(Section::ObjectionHandling));
        assert_eq!(Section::from_label("competitive-notes"), Some(Section::CompetitivePositioning));
        assert_eq!(Section::from_label("## Summary"), Some(Section::Summary));
        assert_eq!(Section::from_label("pricing"), None);
        assert_eq!(Section::from_label(""), None);
    }

    #[test]
    fn test_stored_card_flattens_provenance() {
        let stored = StoredBattlecard::new(card("Acme"));
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["provenance"]["tenant_id"], "t1");
        assert_eq!(json["sections"]["weaknesses"], NOT_AVAILABLE);
        assert_eq!(json["content_hash"], stored.card.content_hash());

        let back: StoredBattlecard = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn test_priority_parses_loosely() {
        assert_eq!("High".parse::<Priority>(), Ok(Priority::High));
        assert_eq!(" disqualified ".parse::<Priority>(), Ok(Priority::Disqualify));
        assert!("urgent".parse::<Priority>().is_err());
    }
}
