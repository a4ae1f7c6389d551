//! In-memory field store.
//!
//! One `CacheState` behind a `tokio::sync::RwLock`. Readers only ever get
//! cloned copies taken under a single read lock, so they never observe a
//! half-applied refresh cycle. Mutation belongs to the refresh coordinator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::cache::models::{
    CacheState, FieldSlot, FieldSource, MetricField, MetricReading, Observation,
};
use crate::cache::persistence::{DiskPersistence, PersistedCache, PersistedField};
use crate::services::resolver::FallbackResolver;

#[derive(Debug)]
pub struct FieldCache {
    inner: RwLock<CacheState>,
}

impl Default for FieldCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldCache {
    pub fn new() -> Self {
        let slots = MetricField::ALL
            .into_iter()
            .map(|field| (field, FieldSlot::default()))
            .collect();
        Self {
            inner: RwLock::new(CacheState {
                slots,
                ..CacheState::default()
            }),
        }
    }

    /// Load the persisted cache (if any) and seed disk-level values from it.
    ///
    /// Nothing is marked live and nothing is flagged as cached here: whether
    /// the process ends up serving cached data is decided by the first
    /// refresh cycle. Returns whether disk data was loaded.
    pub async fn initialize(&self, persistence: &DiskPersistence) -> bool {
        match persistence.load().await {
            Some(persisted) => self.seed_from_disk(&persisted).await,
            None => false,
        }
    }

    /// Seed disk-level observations. Non-finite values are skipped.
    pub async fn seed_from_disk(&self, persisted: &PersistedCache) -> bool {
        let mut state = self.inner.write().await;
        let mut seeded = 0;
        for (field, stored) in &persisted.fields {
            if !stored.value.is_finite() {
                tracing::warn!("Cache: skipping non-finite persisted {}", field);
                continue;
            }
            state.slots.entry(*field).or_default().disk = Some(stored.to_observation());
            seeded += 1;
        }
        if seeded > 0 {
            state.disk_loaded = true;
            if state.last_updated.is_none() {
                state.last_updated = persisted.last_updated;
            }
        }
        tracing::info!("Cache: seeded {} fields from disk", seeded);
        seeded > 0
    }

    /// Current value, provenance and timestamp of one field. `value` is
    /// `None` when no source has ever held one.
    pub async fn get(&self, field: MetricField) -> MetricReading {
        let state = self.inner.read().await;
        let best = state
            .slot(field)
            .and_then(FallbackResolver::best_observation);
        match best {
            Some((obs, source)) => MetricReading {
                field,
                value: Some(obs.value),
                timestamp: Some(obs.timestamp),
                source,
                station_id: obs.station_id.clone(),
            },
            None => MetricReading {
                field,
                value: None,
                timestamp: None,
                source: FieldSource::Default,
                station_id: None,
            },
        }
    }

    /// Store one field at the given provenance level.
    ///
    /// `Live` and `MemoryCache` write the in-memory value (only `Live` marks
    /// it as current), `DiskCache` writes the disk-level value and `Default`
    /// forgets both so the field falls back to its default.
    pub async fn set(
        &self,
        field: MetricField,
        value: f64,
        timestamp: DateTime<Utc>,
        source: FieldSource,
        station_id: Option<String>,
    ) {
        let obs = Observation {
            value,
            timestamp,
            station_id,
        };
        let mut guard = self.inner.write().await;
        let state = &mut *guard;
        let slot = state.slots.entry(field).or_default();
        match source {
            FieldSource::Live => {
                slot.memory = Some(obs);
                slot.live = true;
                state.has_live_data = true;
            }
            FieldSource::MemoryCache => {
                slot.memory = Some(obs);
                slot.live = false;
            }
            FieldSource::DiskCache => {
                slot.disk = Some(obs);
                state.disk_loaded = true;
            }
            FieldSource::Default => {
                *slot = FieldSlot::default();
            }
        }
    }

    /// Apply one refresh cycle atomically.
    ///
    /// Fields in `readings` become live; every other field loses its live
    /// mark but keeps its previous values. Returns the committed state.
    pub(crate) async fn commit_cycle(
        &self,
        readings: &BTreeMap<MetricField, Observation>,
        full_success: bool,
        now: DateTime<Utc>,
    ) -> CacheState {
        let mut state = self.inner.write().await;
        for field in MetricField::ALL {
            let slot = state.slots.entry(field).or_default();
            match readings.get(&field) {
                Some(obs) => {
                    slot.memory = Some(obs.clone());
                    slot.live = true;
                }
                None => slot.live = false,
            }
        }
        if !readings.is_empty() {
            state.has_live_data = true;
        }
        state.cycle_committed = true;
        if full_success {
            state.last_updated = Some(now);
        }
        state.clone()
    }

    /// Immutable copy of the whole cache.
    pub async fn snapshot(&self) -> CacheState {
        self.inner.read().await.clone()
    }
}

/// Build the persisted form of a committed, fully live state.
pub(crate) fn to_persisted(state: &CacheState) -> PersistedCache {
    let fields = state
        .slots
        .iter()
        .filter_map(|(field, slot)| {
            FallbackResolver::best_observation(slot)
                .map(|(obs, source)| (*field, PersistedField::from_observation(obs, source)))
        })
        .collect();
    PersistedCache {
        fields,
        last_updated: state.last_updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn reading(value: f64, at: &str) -> Observation {
        Observation {
            value,
            timestamp: ts(at),
            station_id: Some("SEYC1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_empty_cache_reports_default_without_value() {
        let cache = FieldCache::new();
        let r = cache.get(MetricField::Humidity).await;
        assert_eq!(r.value, None);
        assert_eq!(r.source, FieldSource::Default);
        assert!(!cache.snapshot().await.has_any_data());
    }

    #[tokio::test]
    async fn test_seed_from_disk_does_not_mark_live() {
        let cache = FieldCache::new();
        let mut fields = BTreeMap::new();
        fields.insert(
            MetricField::Temperature,
            PersistedField {
                value: 18.5,
                timestamp: ts("2026-07-01T10:00:00Z"),
                source: FieldSource::Live,
                station_id: None,
            },
        );
        let persisted = PersistedCache {
            fields,
            last_updated: Some(ts("2026-07-01T10:00:00Z")),
        };

        assert!(cache.seed_from_disk(&persisted).await);

        let r = cache.get(MetricField::Temperature).await;
        assert_eq!(r.value, Some(18.5));
        assert_eq!(r.source, FieldSource::DiskCache);
        let state = cache.snapshot().await;
        assert!(state.disk_loaded);
        assert!(!state.has_live_data);
        assert!(!state.cycle_committed);
        assert_eq!(state.last_updated, Some(ts("2026-07-01T10:00:00Z")));
    }

    #[tokio::test]
    async fn test_set_levels() {
        let cache = FieldCache::new();
        cache
            .set(
                MetricField::WindSpeed,
                5.2,
                ts("2026-07-01T12:00:00Z"),
                FieldSource::Live,
                Some("629PG".to_string()),
            )
            .await;
        let r = cache.get(MetricField::WindSpeed).await;
        assert_eq!(r.source, FieldSource::Live);
        assert_eq!(r.station_id.as_deref(), Some("629PG"));

        cache
            .set(
                MetricField::WindSpeed,
                4.0,
                ts("2026-07-01T12:15:00Z"),
                FieldSource::MemoryCache,
                None,
            )
            .await;
        let r = cache.get(MetricField::WindSpeed).await;
        assert_eq!(r.source, FieldSource::MemoryCache);
        assert_eq!(r.value, Some(4.0));

        cache
            .set(
                MetricField::WindSpeed,
                0.0,
                ts("2026-07-01T12:20:00Z"),
                FieldSource::Default,
                None,
            )
            .await;
        assert_eq!(cache.get(MetricField::WindSpeed).await.value, None);
    }

    #[tokio::test]
    async fn test_commit_cycle_demotes_missing_fields() {
        let cache = FieldCache::new();
        let mut first = BTreeMap::new();
        for field in MetricField::ALL {
            first.insert(field, reading(1.0, "2026-07-01T12:00:00Z"));
        }
        let state = cache
            .commit_cycle(&first, true, ts("2026-07-01T12:00:00Z"))
            .await;
        assert!(state.slots.values().all(|s| s.live));
        assert!(state.cycle_committed);
        assert_eq!(state.last_updated, Some(ts("2026-07-01T12:00:00Z")));

        let mut second = BTreeMap::new();
        second.insert(MetricField::WindGust, reading(9.0, "2026-07-01T12:15:00Z"));
        let state = cache
            .commit_cycle(&second, false, ts("2026-07-01T12:15:00Z"))
            .await;

        assert!(state.slots[&MetricField::WindGust].live);
        assert!(!state.slots[&MetricField::Temperature].live);
        // Previous value kept, only provenance changes.
        assert_eq!(
            state.slots[&MetricField::Temperature].memory.as_ref().unwrap().value,
            1.0
        );
        assert_eq!(state.last_updated, Some(ts("2026-07-01T12:00:00Z")));
        assert_eq!(
            cache.get(MetricField::Temperature).await.source,
            FieldSource::MemoryCache
        );
    }

    #[tokio::test]
    async fn test_to_persisted_uses_committed_values() {
        let cache = FieldCache::new();
        let mut readings = BTreeMap::new();
        readings.insert(MetricField::Temperature, reading(22.0, "2026-07-01T12:00:00Z"));
        let state = cache
            .commit_cycle(&readings, true, ts("2026-07-01T12:00:00Z"))
            .await;

        let persisted = to_persisted(&state);
        assert_eq!(persisted.fields.len(), 1);
        assert_eq!(persisted.fields[&MetricField::Temperature].value, 22.0);
        assert_eq!(
            persisted.fields[&MetricField::Temperature].source,
            FieldSource::Live
        );
        assert_eq!(persisted.last_updated, Some(ts("2026-07-01T12:00:00Z")));
    }
}
