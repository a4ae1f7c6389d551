//! Scripted providers and fixtures shared by the unit tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::cache::models::MetricField;
use crate::config::AppConfig;
use crate::errors::ProviderError;
use crate::services::provider::{ProviderPayload, StationReading, WeatherProvider};
use crate::services::retry::RetryPolicy;

const PRIMARY_FIELDS: &[MetricField] = &[
    MetricField::Temperature,
    MetricField::Humidity,
    MetricField::WindSpeed,
    MetricField::SoilMoisture,
];

const GUST_FIELDS: &[MetricField] = &[MetricField::WindGust];

pub(crate) fn temp_cache_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("fire-risk-monitor-{}", Uuid::new_v4()))
        .join("weather_cache.json")
}

/// Single attempt, no waiting between attempts.
pub(crate) fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::from_millis(1),
        multiplier: 1.0,
        max_delay: Duration::from_millis(1),
        jitter: 0.0,
        attempt_timeout: Duration::from_secs(2),
    }
}

/// A provider answering with whatever the test scripted last.
pub(crate) struct ScriptedProvider {
    name: &'static str,
    fields: &'static [MetricField],
    response: Mutex<Result<ProviderPayload, ProviderError>>,
    delay: Duration,
    calls: AtomicU32,
}

fn payload(readings: &[(MetricField, f64)], station: &str) -> ProviderPayload {
    let mut payload = ProviderPayload::default();
    for (field, value) in readings {
        payload.readings.insert(
            *field,
            StationReading {
                value: *value,
                station_id: Some(station.to_string()),
            },
        );
    }
    payload.found_stations.push(station.to_string());
    payload
}

impl ScriptedProvider {
    pub(crate) fn primary(temperature: f64, humidity: f64, wind_speed: f64, soil: f64) -> Self {
        Self {
            name: "synoptic",
            fields: PRIMARY_FIELDS,
            response: Mutex::new(Ok(payload(
                &[
                    (MetricField::Temperature, temperature),
                    (MetricField::Humidity, humidity),
                    (MetricField::WindSpeed, wind_speed),
                    (MetricField::SoilMoisture, soil),
                ],
                "SEYC1",
            ))),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn gusts(gust: f64) -> Self {
        Self {
            name: "wunderground",
            fields: GUST_FIELDS,
            response: Mutex::new(Ok(payload(&[(MetricField::WindGust, gust)], "KCASIERR68"))),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every following fetch fails.
    pub(crate) fn fail(&self) {
        *self.lock() = Err(ProviderError::Unavailable {
            provider: self.name,
            message: "HTTP 503".to_string(),
        });
    }

    pub(crate) fn succeed_with(&self, readings: &[(MetricField, f64)]) {
        *self.lock() = Ok(payload(readings, "SEYC1"));
    }

    pub(crate) fn succeed_with_gust(&self, gust: f64) {
        *self.lock() = Ok(payload(&[(MetricField::WindGust, gust)], "KCASIERR68"));
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Result<ProviderPayload, ProviderError>> {
        self.response.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WeatherProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn fields(&self) -> &'static [MetricField] {
        self.fields
    }

    async fn fetch(&self, _station_ids: &[String]) -> Result<ProviderPayload, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self.lock().clone();
        response
    }
}

/// Configuration pointing at a private cache file, with short timeouts.
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        cache_file: temp_cache_path(),
        synoptic_api_key: None,
        synoptic_base_url: "http://127.0.0.1:9".to_string(),
        synoptic_station_ids: vec!["C3DLA".to_string(), "SEYC1".to_string()],
        wunderground_api_key: None,
        wunderground_base_url: "http://127.0.0.1:9".to_string(),
        wunderground_station_ids: vec!["KCASIERR68".to_string()],
        user_agent: "fire-risk-monitor-test".to_string(),
        retry: fast_retry(),
        refresh_cadence: Duration::from_secs(900),
        refresh_offset: Duration::from_secs(120),
        failure_retry: Duration::from_secs(60),
        wait_for_fresh_timeout: Duration::from_secs(2),
        startup_fetch_timeout: Duration::from_secs(2),
        freshness_threshold: Duration::from_secs(600),
        critical_staleness: Duration::from_secs(1800),
        override_session_ttl: Duration::from_secs(3600),
    }
}
