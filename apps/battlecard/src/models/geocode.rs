use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeStatus {
    Success,
    NoResults,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Where a tenant's address landed on the map. Attached to the battlecard;
/// a failed lookup is recorded here rather than failing the tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeData {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub formatted_address: String,
    pub geocode_status: GeocodeStatus,
    /// Match precision reported by the provider, e.g. `ROOFTOP`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocode_error: Option<String>,
}

impl GeocodeData {
    pub fn no_results(address: &str) -> Self {
        Self::unlocated(address, GeocodeStatus::NoResults, None)
    }

    pub fn error(address: &str, message: impl Into<String>) -> Self {
        Self::unlocated(address, GeocodeStatus::Error, Some(message.into()))
    }

    fn unlocated(address: &str, status: GeocodeStatus, error: Option<String>) -> Self {
        Self {
            latitude: None,
            longitude: None,
            formatted_address: address.to_string(),
            geocode_status: status,
            granularity: None,
            place_id: None,
            geocode_error: error,
        }
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        Some(Coordinates {
            latitude: self.latitude?,
            longitude: self.longitude?,
        })
    }
}
