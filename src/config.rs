use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::services::retry::RetryPolicy;

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Location of the persisted cache document.
    pub cache_file: PathBuf,
    pub synoptic_api_key: Option<String>,
    pub synoptic_base_url: String,
    pub synoptic_station_ids: Vec<String>,
    pub wunderground_api_key: Option<String>,
    pub wunderground_base_url: String,
    pub wunderground_station_ids: Vec<String>,
    pub user_agent: String,
    pub retry: RetryPolicy,
    /// Primary upstream update cadence; scheduled refreshes align to it.
    pub refresh_cadence: Duration,
    /// How long after each cadence boundary the scheduled refresh fires.
    pub refresh_offset: Duration,
    /// Earlier re-trigger after a failed cycle.
    pub failure_retry: Duration,
    pub wait_for_fresh_timeout: Duration,
    pub startup_fetch_timeout: Duration,
    /// Data older than this (since the last full success) is not fresh.
    pub freshness_threshold: Duration,
    /// Data older than this is refreshed before answering, even when the
    /// caller did not ask to wait.
    pub critical_staleness: Duration,
    /// Session overrides not updated for this long are dropped.
    pub override_session_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let synoptic_api_key = optional_var("SYNOPTICDATA_API_KEY");
        if synoptic_api_key.is_none() {
            tracing::warn!("No Synoptic API key provided. Set SYNOPTICDATA_API_KEY.");
        }
        let wunderground_api_key = optional_var("WUNDERGROUND_API_KEY");
        if wunderground_api_key.is_none() {
            tracing::warn!("No Weather Underground API key provided. Set WUNDERGROUND_API_KEY.");
        }

        Self {
            cache_file: PathBuf::from(
                std::env::var("CACHE_FILE")
                    .unwrap_or_else(|_| "./data/weather_cache.json".to_string()),
            ),
            synoptic_api_key,
            synoptic_base_url: std::env::var("SYNOPTIC_BASE_URL")
                .unwrap_or_else(|_| "https://api.synopticdata.com/v2".to_string()),
            synoptic_station_ids: station_list("SYNOPTIC_STATION_IDS", "C3DLA,SEYC1,629PG"),
            wunderground_api_key,
            wunderground_base_url: std::env::var("WUNDERGROUND_BASE_URL")
                .unwrap_or_else(|_| "https://api.weather.com/v2/pws".to_string()),
            wunderground_station_ids: station_list(
                "WUNDERGROUND_STATION_IDS",
                "KCASIERR68,KCASIERR63,KCASIERR72",
            ),
            user_agent: std::env::var("HTTP_USER_AGENT")
                .unwrap_or_else(|_| "FireRiskMonitor/0.1".to_string()),
            retry: RetryPolicy {
                max_attempts: parse_var("RETRY_MAX_ATTEMPTS", 3),
                base_delay: Duration::from_millis(parse_var("RETRY_BASE_DELAY_MS", 1000)),
                multiplier: parse_var("RETRY_MULTIPLIER", 2.0),
                max_delay: Duration::from_millis(parse_var("RETRY_MAX_DELAY_MS", 10_000)),
                jitter: parse_var("RETRY_JITTER", 0.25),
                attempt_timeout: Duration::from_secs(parse_var("PROVIDER_TIMEOUT_SECS", 10)),
            },
            refresh_cadence: Duration::from_secs(parse_var::<u64>("REFRESH_CADENCE_MINS", 15) * 60),
            refresh_offset: Duration::from_secs(parse_var("REFRESH_OFFSET_SECS", 120)),
            failure_retry: Duration::from_secs(parse_var("REFRESH_FAILURE_RETRY_SECS", 60)),
            wait_for_fresh_timeout: Duration::from_secs(parse_var(
                "WAIT_FOR_FRESH_TIMEOUT_SECS",
                15,
            )),
            startup_fetch_timeout: Duration::from_secs(parse_var(
                "STARTUP_FETCH_TIMEOUT_SECS",
                15,
            )),
            freshness_threshold: Duration::from_secs(
                parse_var::<u64>("FRESHNESS_THRESHOLD_MINS", 10) * 60,
            ),
            critical_staleness: Duration::from_secs(
                parse_var::<u64>("CRITICAL_STALENESS_MINS", 30) * 60,
            ),
            override_session_ttl: Duration::from_secs(
                parse_var::<u64>("OVERRIDE_SESSION_TTL_MINS", 60) * 60,
            ),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read a variable and parse it, falling back to `default` when it is unset
/// or unparseable.
fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("{} has invalid value '{}', using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Comma-separated station list, blanks dropped.
fn station_list(name: &str, default: &str) -> Vec<String> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    split_stations(&raw)
}

fn split_stations(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
