use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const NAME_COLUMNS: &[&str] = &["name", "tenant_name", "company", "company_name"];
const INDUSTRY_COLUMNS: &[&str] = &["industry", "vertical"];
const PLAN_COLUMNS: &[&str] = &["plan_tier", "plan", "tier"];
const STREET_COLUMNS: &[&str] = &["address", "street_address", "street"];
const CITY_COLUMNS: &[&str] = &["city"];
const STATE_COLUMNS: &[&str] = &["state", "province"];
const POSTCODE_COLUMNS: &[&str] = &["zipcode", "zip", "zip_code", "postal_code"];

/// One customer row from the input table.
///
/// Immutable once built by the record source. Every column other than the
/// identifier is kept verbatim in `fields`; columns configured as numeric are
/// additionally parsed into `metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    tenant_id: String,
    row: usize,
    fields: BTreeMap<String, String>,
    metrics: BTreeMap<String, f64>,
}

impl TenantRecord {
    pub fn new(
        tenant_id: impl Into<String>,
        row: usize,
        fields: BTreeMap<String, String>,
        metrics: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            row,
            fields,
            metrics,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// 1-based data row this record came from.
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    /// Case-insensitive field lookup. Missing fields read as "".
    pub fn field(&self, column: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(column))
            .map(|(_, v)| v.trim())
            .unwrap_or("")
    }

    pub fn name(&self) -> Option<&str> {
        self.first_present(NAME_COLUMNS)
    }

    pub fn industry(&self) -> Option<&str> {
        self.first_present(INDUSTRY_COLUMNS)
    }

    pub fn plan_tier(&self) -> Option<&str> {
        self.first_present(PLAN_COLUMNS)
    }

    /// Postal address as "street, city, state zip", skipping absent parts.
    /// `None` when the row carries no address columns at all.
    pub fn address(&self) -> Option<String> {
        let street = self.first_present(STREET_COLUMNS);
        let city = self.first_present(CITY_COLUMNS);
        let region = [self.first_present(STATE_COLUMNS), self.first_present(POSTCODE_COLUMNS)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let parts: Vec<&str> = [street, city, Some(region.as_str())]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    /// Whether `column` is one of the well-known profile columns rendered on
    /// their own line in prompts.
    pub fn is_profile_column(column: &str) -> bool {
        NAME_COLUMNS
            .iter()
            .chain(INDUSTRY_COLUMNS)
            .chain(PLAN_COLUMNS)
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    fn first_present(&self, columns: &[&str]) -> Option<&str> {
        columns
            .iter()
            .map(|c| self.field(c))
            .find(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> TenantRecord {
        let fields = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TenantRecord::new("t1", 1, fields, BTreeMap::new())
    }

    #[test]
    fn test_missing_field_reads_empty() {
        let r = record(&[("name", "Acme")]);
        assert_eq!(r.field("industry"), "");
        assert_eq!(r.industry(), None);
    }

    #[test]
    fn test_field_lookup_is_case_insensitive_and_trimmed() {
        let r = record(&[("Industry", "  Logistics ")]);
        assert_eq!(r.field("industry"), "Logistics");
        assert_eq!(r.industry(), Some("Logistics"));
    }

    #[test]
    fn test_name_falls_back_to_company_column() {
        let r = record(&[("name", ""), ("company", "Globex")]);
        assert_eq!(r.name(), Some("Globex"));
    }

    #[test]
    fn test_address_joins_present_parts() {
        let r = record(&[
            ("Address", "1 Main St"),
            ("City", "Springfield"),
            ("State", "IL"),
            ("Zipcode", "62701"),
        ]);
        assert_eq!(r.address().as_deref(), Some("1 Main St, Springfield, IL 62701"));

        let r = record(&[("city", "Austin"), ("state", "TX")]);
        assert_eq!(r.address().as_deref(), Some("Austin, TX"));

        assert_eq!(record(&[("name", "Acme")]).address(), None);
    }

    #[test]
    fn test_profile_columns() {
        assert!(TenantRecord::is_profile_column("Plan_Tier"));
        assert!(!TenantRecord::is_profile_column("employees"));
    }
}
