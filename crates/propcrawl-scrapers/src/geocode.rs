use async_trait::async_trait;
use propcrawl_core::{GeocodeConfig, PropertyRecord, Result};
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GeocodeError {
    #[error("geocoding request timed out")]
    Timeout,
    #[error("geocoding failed: {0}")]
    Failed(String),
}

/// An external address lookup service.
#[async_trait]
pub trait GeocodeLookup: Send + Sync {
    /// `Ok(None)` means the service answered but knows no such place.
    async fn lookup(&self, address: &str) -> std::result::Result<Option<(f64, f64)>, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Nominatim (OpenStreetMap) compatible search endpoint.
#[derive(Debug, Clone)]
pub struct NominatimLookup {
    client: Client,
    endpoint: Url,
    user_agent: String,
}

impl NominatimLookup {
    pub fn new(config: &GeocodeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: Url::parse(&config.endpoint)?,
            user_agent: config.user_agent.clone(),
        })
    }
}

#[async_trait]
impl GeocodeLookup for NominatimLookup {
    async fn lookup(&self, address: &str) -> std::result::Result<Option<(f64, f64)>, GeocodeError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("q", address)
            .append_pair("format", "json")
            .append_pair("limit", "1");

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeocodeError::Timeout
                } else {
                    GeocodeError::Failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(GeocodeError::Failed(format!("HTTP {}", response.status())));
        }

        let places: Vec<NominatimPlace> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GeocodeError::Timeout
            } else {
                GeocodeError::Failed(format!("invalid response: {}", e))
            }
        })?;

        let Some(place) = places.first() else {
            return Ok(None);
        };
        let lat = place
            .lat
            .parse::<f64>()
            .map_err(|e| GeocodeError::Failed(format!("invalid latitude: {}", e)))?;
        let lon = place
            .lon
            .parse::<f64>()
            .map_err(|e| GeocodeError::Failed(format!("invalid longitude: {}", e)))?;
        Ok(Some((lat, lon)))
    }
}

/// Fills in coordinates from addresses, one call at a time.
///
/// Calls are spaced by at least `min_interval`. A timeout is retried exactly
/// once after `retry_delay`; any other failure yields no coordinates.
pub struct GeocodeEnricher {
    lookup: Box<dyn GeocodeLookup>,
    retry_delay: Duration,
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl GeocodeEnricher {
    pub fn new(lookup: Box<dyn GeocodeLookup>, config: &GeocodeConfig) -> Self {
        Self::with_timing(
            lookup,
            Duration::from_millis(config.retry_delay_ms),
            Duration::from_millis(config.min_interval_ms),
        )
    }

    pub fn with_timing(
        lookup: Box<dyn GeocodeLookup>,
        retry_delay: Duration,
        min_interval: Duration,
    ) -> Self {
        Self {
            lookup,
            retry_delay,
            min_interval,
            last_call: None,
        }
    }

    async fn call(
        &mut self,
        address: &str,
    ) -> std::result::Result<Option<(f64, f64)>, GeocodeError> {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        self.last_call = Some(Instant::now());
        self.lookup.lookup(address).await
    }

    pub async fn resolve(&mut self, address: &str) -> (Option<f64>, Option<f64>) {
        let address = address.trim();
        if address.is_empty() {
            return (None, None);
        }

        let outcome = match self.call(address).await {
            Err(GeocodeError::Timeout) => {
                warn!("Geocoding '{}' timed out, retrying once", address);
                tokio::time::sleep(self.retry_delay).await;
                self.call(address).await
            }
            other => other,
        };

        match outcome {
            Ok(Some((lat, lon))) => {
                debug!("Geocoded '{}' to ({}, {})", address, lat, lon);
                (Some(lat), Some(lon))
            }
            Ok(None) => {
                debug!("No geocoding match for '{}'", address);
                (None, None)
            }
            Err(e) => {
                warn!("Could not geocode '{}': {}", address, e);
                (None, None)
            }
        }
    }

    /// Geocode a record that has an address but no coordinates.
    /// Returns whether coordinates were added.
    pub async fn enrich(&mut self, record: &mut PropertyRecord) -> bool {
        if record.has_coordinates() {
            return false;
        }
        let Some(address) = record.address.clone() else {
            return false;
        };
        match self.resolve(&address).await {
            (Some(lat), Some(lon)) => {
                record.latitude = Some(lat);
                record.longitude = Some(lon);
                true
            }
            _ => false,
        }
    }
}
