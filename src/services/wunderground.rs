//! Weather Underground PWS client (secondary provider, wind gusts only).
//!
//! Each configured station is queried concurrently; the reported gusts are
//! averaged. A station that is offline answers `204 No Content` and is
//! simply skipped.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;

use crate::cache::models::MetricField;
use crate::errors::ProviderError;
use crate::services::provider::{ProviderPayload, StationReading, WeatherProvider};

const PROVIDER: &str = "wunderground";

const WUNDERGROUND_FIELDS: &[MetricField] = &[MetricField::WindGust];

#[derive(Debug, Clone)]
pub struct WundergroundClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

// --- Wunderground JSON response types ---

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    #[serde(default)]
    observations: Vec<PwsObservation>,
}

#[derive(Debug, Deserialize)]
struct PwsObservation {
    imperial: Option<ImperialUnits>,
}

#[derive(Debug, Deserialize)]
struct ImperialUnits {
    #[serde(rename = "windGust")]
    wind_gust: Option<f64>,
}

impl WundergroundClient {
    pub fn new(base_url: &str, api_key: Option<String>, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Current gust of one station, `None` when it reported nothing.
    async fn fetch_station(&self, api_key: &str, station_id: &str) -> Result<Option<f64>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/observations/current", self.base_url))
            .query(&[
                ("stationId", station_id),
                ("format", "json"),
                ("units", "e"),
                ("apiKey", api_key),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ProviderError::from_status(PROVIDER, status));
        }

        let body: CurrentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        Ok(extract_gust(&body))
    }
}

fn extract_gust(body: &CurrentResponse) -> Option<f64> {
    body.observations
        .first()
        .and_then(|obs| obs.imperial.as_ref())
        .and_then(|units| units.wind_gust)
        .filter(|gust| gust.is_finite())
}

#[async_trait]
impl WeatherProvider for WundergroundClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn fields(&self) -> &'static [MetricField] {
        WUNDERGROUND_FIELDS
    }

    async fn fetch(&self, station_ids: &[String]) -> Result<ProviderPayload, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| ProviderError::Auth {
            provider: PROVIDER,
            message: "API key not configured".to_string(),
        })?;

        let results = join_all(
            station_ids
                .iter()
                .map(|id| self.fetch_station(api_key, id)),
        )
        .await;

        let mut payload = ProviderPayload::default();
        let mut gusts = Vec::new();
        let mut first_error = None;

        for (id, result) in station_ids.iter().zip(results) {
            match result {
                Ok(Some(gust)) => {
                    gusts.push(gust);
                    payload.found_stations.push(id.clone());
                }
                Ok(None) => {
                    tracing::debug!("Wunderground: station {} reported no gust", id);
                    payload.missing_stations.push(id.clone());
                }
                Err(e) => {
                    tracing::warn!("Wunderground: station {} failed: {}", id, e);
                    payload.missing_stations.push(id.clone());
                    first_error.get_or_insert(e);
                }
            }
        }

        if gusts.is_empty() {
            return Err(first_error.unwrap_or(ProviderError::MalformedResponse {
                provider: PROVIDER,
                message: "no station reported a wind gust".to_string(),
            }));
        }

        let mean = gusts.iter().sum::<f64>() / gusts.len() as f64;
        payload.readings.insert(
            MetricField::WindGust,
            StationReading {
                value: mean,
                station_id: Some(payload.found_stations.join(",")),
            },
        );

        Ok(payload)
    }
}
