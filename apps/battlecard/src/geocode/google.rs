//! Google Geocoding API (v4) address lookup.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::config::GeocodeConfig;
use crate::errors::GeocodeError;
use crate::geocode::{GeocodeMatch, Geocoder};

const GEOCODE_ADDRESS_URL: &str = "https://geocode.googleapis.com/v4beta/geocode/address/";

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeocodeResult {
    location: Option<LatLng>,
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    granularity: Option<String>,
    #[serde(default)]
    place_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    message: String,
}

pub struct GoogleGeocoder {
    client: Client,
    api_key: String,
    region_code: String,
}

impl GoogleGeocoder {
    pub fn new(config: &GeocodeConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(config.timeout).build()?,
            api_key: config.api_key.clone(),
            region_code: config.region_code.clone(),
        })
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn lookup(&self, address: &str) -> Result<Option<GeocodeMatch>, GeocodeError> {
        let url = address_url(address)?;
        let response = self
            .client
            .get(url)
            .header("X-Goog-Api-Key", &self.api_key)
            .query(&[("regionCode", self.region_code.as_str())])
            .send()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_str::<GoogleError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(GeocodeError::Http {
                status: status.as_u16(),
                message,
            });
        }
        parse_response(&body)
    }
}

/// The address travels as a single percent-encoded path segment.
fn address_url(address: &str) -> Result<Url, GeocodeError> {
    let mut url = Url::parse(GEOCODE_ADDRESS_URL).map_err(|e| GeocodeError::Transport(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| GeocodeError::Transport("geocoding URL cannot take a path".to_string()))?
        .pop_if_empty()
        .push(address);
    Ok(url)
}

fn parse_response(body: &str) -> Result<Option<GeocodeMatch>, GeocodeError> {
    let parsed: GeocodeResponse =
        serde_json::from_str(body).map_err(|e| GeocodeError::Decode(e.to_string()))?;
    Ok(parsed.results.into_iter().find_map(|result| {
        let location = result.location?;
        Some(GeocodeMatch {
            latitude: location.latitude,
            longitude: location.longitude,
            formatted_address: result.formatted_address,
            granularity: result.granularity,
            place_id: result.place_id,
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_one_encoded_segment() {
        let url = address_url("1 Main St, Springfield, IL 62701").unwrap();
        assert_eq!(
            url.as_str(),
            "https://geocode.googleapis.com/v4beta/geocode/address/1%20Main%20St,%20Springfield,%20IL%2062701"
        );
        let url = address_url("Suite 4/5 Elm Rd").unwrap();
        assert!(url.path().ends_with("/Suite%204%2F5%20Elm%20Rd"));
    }

    #[test]
    fn test_parse_first_result() {
        let body = r#"{
            "results": [{
                "location": {"latitude": 39.7817, "longitude": -89.6501},
                "formattedAddress": "1 Main St, Springfield, IL 62701, USA",
                "granularity": "ROOFTOP",
                "placeId": "ChIJ123"
            }]
        }"#;
        let found = parse_response(body).unwrap().unwrap();
        assert_eq!(found.latitude, 39.7817);
        assert_eq!(found.longitude, -89.6501);
        assert_eq!(found.granularity.as_deref(), Some("ROOFTOP"));
        assert_eq!(found.place_id.as_deref(), Some("ChIJ123"));
    }

    #[test]
    fn test_parse_empty_results() {
        assert_eq!(parse_response("{}").unwrap(), None);
        assert_eq!(parse_response(r#"{"results": []}"#).unwrap(), None);
    }

    #[test]
    fn test_parse_garbage_is_decode_error() {
        assert!(matches!(parse_response("<html>"), Err(GeocodeError::Decode(_))));
    }
}
