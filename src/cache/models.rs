use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

/// A weather metric tracked by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    Temperature,
    Humidity,
    WindSpeed,
    WindGust,
    SoilMoisture,
}

impl MetricField {
    pub const ALL: [MetricField; 5] = [
        MetricField::Temperature,
        MetricField::Humidity,
        MetricField::WindSpeed,
        MetricField::WindGust,
        MetricField::SoilMoisture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricField::Temperature => "temperature",
            MetricField::Humidity => "humidity",
            MetricField::WindSpeed => "wind_speed",
            MetricField::WindGust => "wind_gust",
            MetricField::SoilMoisture => "soil_moisture",
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| AppError::BadRequest(format!("unknown weather field '{}'", s)))
    }
}

/// Where a field's current value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldSource {
    Live,
    MemoryCache,
    DiskCache,
    Default,
}

impl FieldSource {
    /// Everything except a value from the current cycle's live fetch counts as cached.
    pub fn is_cached(&self) -> bool {
        !matches!(self, FieldSource::Live)
    }
}

/// A value observed upstream, with the time it was taken into the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub station_id: Option<String>,
}

/// Everything the cache knows about one field.
///
/// `live` is set only while `memory` holds a value from the most recent
/// cycle's successful fetch; any cycle that does not deliver the field clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSlot {
    pub memory: Option<Observation>,
    pub disk: Option<Observation>,
    pub live: bool,
}

/// A field as seen by readers of the cache: value may be absent before any
/// source ever held one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReading {
    pub field: MetricField,
    pub value: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: FieldSource,
    pub station_id: Option<String>,
}

/// Immutable copy of the whole field cache, taken under one read lock.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    pub slots: BTreeMap<MetricField, FieldSlot>,
    /// Time of the last fully successful cycle, or the persisted value when
    /// only disk data exists.
    pub last_updated: Option<DateTime<Utc>>,
    /// At least one provider fetch has succeeded in this process.
    pub has_live_data: bool,
    /// A persisted cache was loaded at startup.
    pub disk_loaded: bool,
    /// At least one refresh cycle, successful or not, has committed.
    pub cycle_committed: bool,
}

impl CacheState {
    pub fn slot(&self, field: MetricField) -> Option<&FieldSlot> {
        self.slots.get(&field)
    }

    /// Whether any source, live or persisted, has ever supplied data.
    pub fn has_any_data(&self) -> bool {
        self.has_live_data || self.disk_loaded
    }
}

/// One field of an assembled snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedField {
    pub value: f64,
    pub source: FieldSource,
    pub timestamp: Option<DateTime<Utc>>,
    pub station_id: Option<String>,
    /// The value did not come from the current cycle's live fetch.
    pub cached: bool,
    /// The value was replaced by a session override.
    pub overridden: bool,
}

/// The fully populated, consistent view handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSnapshot {
    pub fields: BTreeMap<MetricField, ResolvedField>,
    pub last_updated: Option<DateTime<Utc>>,
    pub using_cached_data: bool,
    pub cached_fields: BTreeMap<MetricField, bool>,
}

impl CacheSnapshot {
    pub fn field(&self, field: MetricField) -> Option<&ResolvedField> {
        self.fields.get(&field)
    }

    /// Effective values, the input of the external risk evaluator.
    pub fn values(&self) -> BTreeMap<MetricField, f64> {
        self.fields
            .iter()
            .map(|(field, resolved)| (*field, resolved.value))
            .collect()
    }

    /// Age of a field's value relative to `now`; `None` for defaults.
    pub fn field_age(&self, field: MetricField, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.field(field)
            .and_then(|resolved| resolved.timestamp)
            .map(|ts| now - ts)
    }
}

/// How a refresh cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcomeKind {
    /// Both providers delivered every field; the snapshot was persisted.
    Success,
    /// Some fields were refreshed, others kept their cached values.
    Partial,
    /// No provider delivered anything.
    Failed,
}

/// Coordinator bookkeeping, exposed via the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshState {
    pub in_progress: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_cycles: u64,
    pub last_cycle_id: Option<Uuid>,
    pub last_outcome: Option<CycleOutcomeKind>,
    pub last_cycle_duration_ms: Option<u64>,
    pub next_trigger_at: Option<DateTime<Utc>>,
}
