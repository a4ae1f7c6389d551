//! Fallback resolution: picks the best available value for each field.
//!
//! Priority, highest first:
//! 1. live value from the current cycle
//! 2. cached value, memory or disk, whichever has the most recent timestamp
//!    (ties go to memory)
//! 3. hard-coded default, only when neither memory nor disk ever held a value

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::cache::models::{CacheState, FieldSlot, FieldSource, MetricField, Observation};

/// Fallback values for when no data was ever available for a field.
const DEFAULT_TEMPERATURE: f64 = 15.0;
const DEFAULT_HUMIDITY: f64 = 40.0;
const DEFAULT_WIND_SPEED: f64 = 5.0;
const DEFAULT_WIND_GUST: f64 = 8.0;
const DEFAULT_SOIL_MOISTURE: f64 = 20.0;

/// The value chosen for a field and the level that supplied it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub value: f64,
    pub source: FieldSource,
    pub timestamp: Option<DateTime<Utc>>,
    pub station_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FallbackResolver {
    defaults: BTreeMap<MetricField, f64>,
}

impl Default for FallbackResolver {
    fn default() -> Self {
        let defaults = MetricField::ALL
            .into_iter()
            .map(|field| {
                let value = match field {
                    MetricField::Temperature => DEFAULT_TEMPERATURE,
                    MetricField::Humidity => DEFAULT_HUMIDITY,
                    MetricField::WindSpeed => DEFAULT_WIND_SPEED,
                    MetricField::WindGust => DEFAULT_WIND_GUST,
                    MetricField::SoilMoisture => DEFAULT_SOIL_MOISTURE,
                };
                (field, value)
            })
            .collect();
        Self { defaults }
    }
}

impl FallbackResolver {
    pub fn default_value(&self, field: MetricField) -> f64 {
        self.defaults.get(&field).copied().unwrap_or_default()
    }

    /// Best observation a slot holds, without falling back to defaults.
    pub fn best_observation(slot: &FieldSlot) -> Option<(&Observation, FieldSource)> {
        if slot.live {
            if let Some(memory) = &slot.memory {
                return Some((memory, FieldSource::Live));
            }
        }

        match (&slot.memory, &slot.disk) {
            (Some(memory), Some(disk)) if disk.timestamp > memory.timestamp => {
                Some((disk, FieldSource::DiskCache))
            }
            (Some(memory), _) => Some((memory, FieldSource::MemoryCache)),
            (None, Some(disk)) => Some((disk, FieldSource::DiskCache)),
            (None, None) => None,
        }
    }

    pub fn resolve(&self, field: MetricField, slot: Option<&FieldSlot>) -> Resolution {
        match slot.and_then(Self::best_observation) {
            Some((obs, source)) => Resolution {
                value: obs.value,
                source,
                timestamp: Some(obs.timestamp),
                station_id: obs.station_id.clone(),
            },
            None => Resolution {
                value: self.default_value(field),
                source: FieldSource::Default,
                timestamp: None,
                station_id: None,
            },
        }
    }

    /// Resolve every field; the result always has an entry per `MetricField`.
    pub fn resolve_all(&self, state: &CacheState) -> BTreeMap<MetricField, Resolution> {
        MetricField::ALL
            .into_iter()
            .map(|field| (field, self.resolve(field, state.slot(field))))
            .collect()
    }
}
