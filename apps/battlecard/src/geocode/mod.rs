//! Address enrichment: places each tenant on the map.
//!
//! Optional stage. A lookup failure is written onto the card as
//! `geocode_status: "error"` and the tenant carries on.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::GeocodeError;
use crate::models::{GeocodeData, GeocodeStatus, TenantRecord};

pub mod google;

/// A successful match for an address.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeMatch {
    pub latitude: f64,
    pub longitude: f64,
    pub formatted_address: Option<String>,
    pub granularity: Option<String>,
    pub place_id: Option<String>,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` means the provider found nothing for the address.
    async fn lookup(&self, address: &str) -> Result<Option<GeocodeMatch>, GeocodeError>;
}

/// Geocodes the record's address. `None` when the row has no address columns.
pub async fn locate(
    geocoder: &dyn Geocoder,
    record: &TenantRecord,
    timeout: Duration,
) -> Option<GeocodeData> {
    let address = record.address()?;
    let result = tokio::time::timeout(timeout, geocoder.lookup(&address))
        .await
        .unwrap_or_else(|_| Err(GeocodeError::Timeout(timeout.as_secs())));

    let data = match result {
        Ok(Some(found)) => GeocodeData {
            latitude: Some(found.latitude),
            longitude: Some(found.longitude),
            formatted_address: found.formatted_address.unwrap_or_else(|| address.clone()),
            geocode_status: GeocodeStatus::Success,
            granularity: found.granularity,
            place_id: found.place_id,
            geocode_error: None,
        },
        Ok(None) => GeocodeData::no_results(&address),
        Err(e) => {
            warn!("Geocoding failed for '{address}': {e}");
            GeocodeData::error(&address, e.to_string())
        }
    };
    debug!(status = ?data.geocode_status, "Geocoded address");
    Some(data)
}
