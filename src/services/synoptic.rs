//! Synoptic Data client (primary provider).
//!
//! Supplies temperature, humidity, wind speed and soil moisture from the
//! `stations/latest` endpoint. Every fetch first exchanges the API key for a
//! short-lived token.
//! See: https://docs.synopticdata.com/services/latest

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::cache::models::MetricField;
use crate::errors::ProviderError;
use crate::services::provider::{ProviderPayload, WeatherProvider};

const PROVIDER: &str = "synoptic";

const SYNOPTIC_FIELDS: &[MetricField] = &[
    MetricField::Temperature,
    MetricField::Humidity,
    MetricField::WindSpeed,
    MetricField::SoilMoisture,
];

const AIR_TEMP_KEY: &str = "air_temp_value_1";
const HUMIDITY_KEY: &str = "relative_humidity_value_1";
const WIND_SPEED_KEY: &str = "wind_speed_value_1";
const SOIL_MOISTURE_FALLBACK_KEY: &str = "soil_moisture_value_1";

/// Client for the Synoptic Data latest-observations API.
#[derive(Debug, Clone)]
pub struct SynopticClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

// --- Synoptic JSON response types ---

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(rename = "TOKEN")]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(rename = "STATION")]
    station: Option<Vec<SynopticStation>>,
}

#[derive(Debug, Deserialize)]
struct SynopticStation {
    #[serde(rename = "STID")]
    stid: String,
    #[serde(rename = "OBSERVATIONS", default)]
    observations: BTreeMap<String, SynopticObservation>,
}

#[derive(Debug, Deserialize)]
struct SynopticObservation {
    /// Numeric for measurements, but some sensors report strings.
    value: Option<serde_json::Value>,
}

impl SynopticStation {
    fn numeric(&self, key: &str) -> Option<f64> {
        self.observations
            .get(key)
            .and_then(|obs| obs.value.as_ref())
            .and_then(|v| v.as_f64())
    }

    /// Soil moisture at 15 cm depth, falling back to the first soil sensor.
    fn soil_moisture_15cm(&self) -> Option<f64> {
        self.observations
            .keys()
            .filter(|key| key.contains("soil_moisture"))
            .find(|key| key.contains("0.15") || key.contains("15cm") || key.contains("15_cm"))
            .and_then(|key| self.numeric(key))
            .or_else(|| self.numeric(SOIL_MOISTURE_FALLBACK_KEY))
    }
}

impl SynopticClient {
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

    /// Exchange the permanent API key for a temporary token.
    async fn fetch_token(&self) -> Result<String, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| ProviderError::Auth {
            provider: PROVIDER,
            message: "API key not configured".to_string(),
        })?;

        let response = self
            .client
            .get(format!("{}/auth", self.base_url))
            .query(&[("apikey", api_key)])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(ProviderError::from_status(PROVIDER, response.status()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        body.token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::Auth {
                provider: PROVIDER,
                message: "token missing from auth response".to_string(),
            })
    }
}

#[async_trait]
impl WeatherProvider for SynopticClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn fields(&self) -> &'static [MetricField] {
        SYNOPTIC_FIELDS
    }

    async fn fetch(&self, station_ids: &[String]) -> Result<ProviderPayload, ProviderError> {
        let token = self.fetch_token().await?;
        let stid = station_ids.join(",");
        tracing::debug!("Synoptic: requesting latest observations for {}", stid);

        let response = self
            .client
            .get(format!("{}/stations/latest", self.base_url))
            .query(&[("stid", stid.as_str()), ("token", token.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(ProviderError::from_status(PROVIDER, response.status()));
        }

        let raw_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        extract_payload(&raw_json, station_ids)
    }
}

/// Pull the primary metrics out of a `stations/latest` response.
///
/// Stations are visited in request order; the first station reporting a
/// metric supplies it.
pub fn extract_payload(
    raw_json: &serde_json::Value,
    station_ids: &[String],
) -> Result<ProviderPayload, ProviderError> {
    let response: LatestResponse =
        serde_json::from_value(raw_json.clone()).map_err(|e| ProviderError::MalformedResponse {
            provider: PROVIDER,
            message: format!("response structure error: {}", e),
        })?;

    let stations = response
        .station
        .ok_or_else(|| ProviderError::MalformedResponse {
            provider: PROVIDER,
            message: "response missing STATION data".to_string(),
        })?;

    let mut ordered: Vec<&SynopticStation> = Vec::with_capacity(stations.len());
    for id in station_ids {
        ordered.extend(stations.iter().filter(|s| &s.stid == id));
    }
    ordered.extend(stations.iter().filter(|s| !station_ids.contains(&s.stid)));

    let mut payload = ProviderPayload::default();
    for station in ordered {
        payload.found_stations.push(station.stid.clone());
        payload.offer(MetricField::Temperature, station.numeric(AIR_TEMP_KEY), &station.stid);
        payload.offer(MetricField::Humidity, station.numeric(HUMIDITY_KEY), &station.stid);
        payload.offer(MetricField::WindSpeed, station.numeric(WIND_SPEED_KEY), &station.stid);
        payload.offer(MetricField::SoilMoisture, station.soil_moisture_15cm(), &station.stid);
    }
    payload.missing_stations = station_ids
        .iter()
        .filter(|id| !payload.found_stations.contains(id))
        .cloned()
        .collect();

    if !payload.missing_stations.is_empty() {
        tracing::warn!(
            "Synoptic: no data for stations {:?}",
            payload.missing_stations
        );
    }

    if payload.readings.is_empty() {
        return Err(ProviderError::MalformedResponse {
            provider: PROVIDER,
            message: "no usable observations in response".to_string(),
        });
    }

    Ok(payload)
}
