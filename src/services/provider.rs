//! The seam between the refresh engine and the upstream weather services.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::cache::models::MetricField;
use crate::errors::ProviderError;

/// One metric reported by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct StationReading {
    pub value: f64,
    pub station_id: Option<String>,
}

/// Result of one successful provider fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderPayload {
    pub readings: BTreeMap<MetricField, StationReading>,
    pub found_stations: Vec<String>,
    pub missing_stations: Vec<String>,
}

impl ProviderPayload {
    /// Record a reading unless a value is already present or the value is
    /// not a finite number.
    pub fn offer(&mut self, field: MetricField, value: Option<f64>, station_id: &str) {
        let Some(value) = value.filter(|v| v.is_finite()) else {
            return;
        };
        self.readings.entry(field).or_insert_with(|| StationReading {
            value,
            station_id: Some(station_id.to_string()),
        });
    }
}

/// An upstream weather data source.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Metrics this provider is responsible for.
    fn fields(&self) -> &'static [MetricField];

    /// Fetch the latest observations for the given stations.
    async fn fetch(&self, station_ids: &[String]) -> Result<ProviderPayload, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_keeps_first_finite_value() {
        let mut payload = ProviderPayload::default();
        payload.offer(MetricField::Temperature, None, "A");
        payload.offer(MetricField::Temperature, Some(f64::NAN), "A");
        payload.offer(MetricField::Temperature, Some(21.5), "B");
        payload.offer(MetricField::Temperature, Some(30.0), "C");

        let reading = &payload.readings[&MetricField::Temperature];
        assert_eq!(reading.value, 21.5);
        assert_eq!(reading.station_id.as_deref(), Some("B"));
    }
}
