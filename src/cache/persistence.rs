//! Disk persistence for the last fully successful snapshot.
//!
//! Layout: `{ "fields": { name: { value, timestamp, source } }, "last_updated": ts }`.
//! A missing or unreadable file is an empty cache, never a startup failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::models::{FieldSource, MetricField, Observation};
use crate::errors::PersistenceError;

/// One persisted field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedField {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub source: FieldSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_id: Option<String>,
}

impl PersistedField {
    pub fn from_observation(obs: &Observation, source: FieldSource) -> Self {
        Self {
            value: obs.value,
            timestamp: obs.timestamp,
            source,
            station_id: obs.station_id.clone(),
        }
    }

    pub fn to_observation(&self) -> Observation {
        Observation {
            value: self.value,
            timestamp: self.timestamp,
            station_id: self.station_id.clone(),
        }
    }
}

/// On-disk form of the most recent fully successful snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedCache {
    #[serde(default)]
    pub fields: BTreeMap<MetricField, PersistedField>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Reads and atomically writes the persisted cache file.
#[derive(Debug, Clone)]
pub struct DiskPersistence {
    path: PathBuf,
}

impl DiskPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted cache. Missing and corrupt files both yield `None`;
    /// the reason is logged.
    pub async fn load(&self) -> Option<PersistedCache> {
        match self.try_load().await {
            Ok(Some(cache)) => {
                tracing::info!(
                    "Persistence: loaded {} fields from {}",
                    cache.fields.len(),
                    self.path.display()
                );
                Some(cache)
            }
            Ok(None) => {
                tracing::info!(
                    "Persistence: no cache file at {}, starting empty",
                    self.path.display()
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Persistence: ignoring unreadable cache file {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Load the persisted cache, distinguishing "absent" from "broken".
    pub async fn try_load(&self) -> Result<Option<PersistedCache>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let cache: PersistedCache = serde_json::from_slice(&bytes)?;
        Ok(Some(cache))
    }

    /// Write the cache via a temp file and rename, so a reader never sees a
    /// half-written document.
    pub async fn persist(&self, cache: &PersistedCache) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let body = serde_json::to_vec_pretty(cache)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &body).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        tracing::debug!(
            "Persistence: wrote {} fields to {}",
            cache.fields.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    fn temp_cache_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("fire-risk-monitor-{}", Uuid::new_v4()))
            .join("weather_cache.json")
    }

    fn sample_cache() -> PersistedCache {
        let ts = "2026-07-01T12:02:00Z".parse::<DateTime<Utc>>().unwrap();
        let mut fields = BTreeMap::new();
        fields.insert(
            MetricField::Temperature,
            PersistedField {
                value: 22.0,
                timestamp: ts,
                source: FieldSource::Live,
                station_id: Some("SEYC1".to_string()),
            },
        );
        fields.insert(
            MetricField::WindGust,
            PersistedField {
                value: 4.5,
                timestamp: ts,
                source: FieldSource::Live,
                station_id: None,
            },
        );
        PersistedCache {
            fields,
            last_updated: Some(ts),
        }
    }

    #[tokio::test]
    async fn test_round_trip_preserves_values_and_timestamps() {
        let persistence = DiskPersistence::new(temp_cache_path());
        let cache = sample_cache();

        assert_ok!(persistence.persist(&cache).await);
        let loaded = persistence.load().await.expect("cache should load");

        assert_eq!(loaded, cache);
        // Writing what was read yields the same document again.
        assert_ok!(persistence.persist(&loaded).await);
        assert_eq!(persistence.load().await, Some(cache));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let persistence = DiskPersistence::new(temp_cache_path());
        assert!(matches!(persistence.try_load().await, Ok(None)));
        assert_eq!(persistence.load().await, None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty_not_fatal() {
        let path = temp_cache_path();
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"{\"fields\": {\"temperature\": ")
            .await
            .unwrap();

        let persistence = DiskPersistence::new(&path);
        assert_err!(persistence.try_load().await);
        assert_eq!(persistence.load().await, None);
    }

    #[tokio::test]
    async fn test_document_layout() {
        let path = temp_cache_path();
        let persistence = DiskPersistence::new(&path);
        persistence.persist(&sample_cache()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(raw["fields"]["temperature"]["value"], 22.0);
        assert_eq!(raw["fields"]["temperature"]["source"], "live");
        assert_eq!(raw["last_updated"], "2026-07-01T12:02:00Z");
        assert!(raw["fields"]["wind_gust"].get("station_id").is_none());
        assert!(!path.with_extension("tmp").exists());
    }
}
