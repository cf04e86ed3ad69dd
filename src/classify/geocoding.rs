// Google reverse geocoding resolver.
//
// Asks the Geocoding API what sits at a coordinate and returns the type
// tags of the top result. Without an API key the resolver answers with no
// tags at all, which the classifier turns into `general`.
//
// API docs: https://developers.google.com/maps/documentation/geocoding/requests-reverse-geocoding

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::traits::{PlaceHint, PlaceResolver};

pub const DEFAULT_GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Reverse-geocoding place resolver.
pub struct GeocodingResolver {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeocodingResolver {
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent("kindred/0.1 (activity-patterns)")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl PlaceResolver for GeocodingResolver {
    async fn resolve(&self, latitude: f64, longitude: f64) -> Result<PlaceHint> {
        if self.api_key.is_empty() {
            warn!("GOOGLE_MAPS_API_KEY not set, skipping place lookup");
            return Ok(PlaceHint::default());
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latlng", format!("{latitude},{longitude}")),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await
            .context("Geocoding API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Geocoding API returned {}: {}", status, body);
        }

        let body: GeocodeResponse = response
            .json()
            .await
            .context("Failed to parse Geocoding API response")?;
        check_status(&body)?;

        let hint = hint_from_response(body);
        debug!(tags = ?hint.tags, name = ?hint.name, "Resolved place");
        Ok(hint)
    }
}

/// The API reports failures like a bad key in the body of a 200 response.
/// OK and ZERO_RESULTS are answers; anything else is an error.
pub fn check_status(response: &GeocodeResponse) -> Result<()> {
    match response.status.as_deref() {
        None | Some("OK") | Some("ZERO_RESULTS") => Ok(()),
        Some(status) => {
            let detail = response.error_message.as_deref().unwrap_or("no details");
            warn!(status, detail, "Geocoding API refused the lookup");
            anyhow::bail!("Geocoding API status {status}: {detail}")
        }
    }
}

/// Pull the top result's tags and name out of a geocoder response.
pub fn hint_from_response(response: GeocodeResponse) -> PlaceHint {
    match response.results.into_iter().next() {
        Some(top) => PlaceHint {
            tags: top.types,
            name: top.formatted_address,
        },
        None => PlaceHint::default(),
    }
}

// --- Geocoding API response types ---

#[derive(Debug, Deserialize)]
pub struct GeocodeResponse {
    #[serde(default)]
    pub results: Vec<GeocodeResult>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GeocodeResult {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub formatted_address: Option<String>,
}
