//! Snapshot assembly: the consistent, fully populated view handed to
//! consumers.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::models::{CacheSnapshot, CacheState, FieldSource, ResolvedField};
use crate::errors::AppError;
use crate::services::overrides::FieldOverrides;
use crate::services::resolver::FallbackResolver;

/// Disk data younger than this counts as current until the first cycle.
const DEFAULT_STARTUP_DISK_GRACE_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct SnapshotAssembler {
    resolver: FallbackResolver,
    startup_disk_grace: Duration,
}

impl Default for SnapshotAssembler {
    fn default() -> Self {
        Self::new(
            FallbackResolver::default(),
            Duration::from_secs(DEFAULT_STARTUP_DISK_GRACE_SECS),
        )
    }
}

impl SnapshotAssembler {
    pub fn new(resolver: FallbackResolver, startup_disk_grace: Duration) -> Self {
        Self {
            resolver,
            startup_disk_grace,
        }
    }

    /// Resolve every field of `state`, then apply `overrides`.
    ///
    /// Deterministic for a given state, override set and `now`. Fails only
    /// when no source has ever supplied data.
    ///
    /// Until the first refresh cycle commits, disk values persisted within
    /// the startup grace window keep `source = DiskCache` but are not flagged
    /// as cached: the process has not yet failed to refresh them.
    pub fn assemble(
        &self,
        state: &CacheState,
        overrides: &FieldOverrides,
        now: DateTime<Utc>,
    ) -> Result<CacheSnapshot, AppError> {
        if !state.has_any_data() {
            return Err(AppError::NoDataEverObtained);
        }

        let grace = chrono::Duration::from_std(self.startup_disk_grace)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let disk_is_current = !state.cycle_committed
            && state.last_updated.is_some_and(|t| now - t <= grace);

        let fields: BTreeMap<_, _> = self
            .resolver
            .resolve_all(state)
            .into_iter()
            .map(|(field, resolution)| {
                let override_value = overrides.get(&field).copied();
                let resolved = ResolvedField {
                    value: override_value.unwrap_or(resolution.value),
                    source: resolution.source,
                    timestamp: resolution.timestamp,
                    station_id: resolution.station_id,
                    cached: match resolution.source {
                        FieldSource::DiskCache if disk_is_current => false,
                        source => source.is_cached(),
                    },
                    overridden: override_value.is_some(),
                };
                (field, resolved)
            })
            .collect();

        let cached_fields: BTreeMap<_, _> = fields
            .iter()
            .map(|(field, resolved)| (*field, resolved.cached))
            .collect();
        let using_cached_data = cached_fields.values().any(|cached| *cached);

        Ok(CacheSnapshot {
            fields,
            last_updated: state.last_updated,
            using_cached_data,
            cached_fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::models::{FieldSlot, MetricField, Observation};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn now() -> DateTime<Utc> {
        ts("2026-07-01T12:05:00Z")
    }

    fn live_state() -> CacheState {
        let slots = MetricField::ALL
            .into_iter()
            .map(|field| {
                (
                    field,
                    FieldSlot {
                        memory: Some(Observation {
                            value: 10.0,
                            timestamp: ts("2026-07-01T12:00:00Z"),
                            station_id: None,
                        }),
                        disk: None,
                        live: true,
                    },
                )
            })
            .collect();
        CacheState {
            slots,
            last_updated: Some(ts("2026-07-01T12:00:00Z")),
            has_live_data: true,
            disk_loaded: false,
            cycle_committed: true,
        }
    }

    #[test]
    fn test_empty_state_is_unavailable() {
        let result = SnapshotAssembler::default().assemble(
            &CacheState::default(),
            &FieldOverrides::new(),
            now(),
        );
        assert!(matches!(result, Err(AppError::NoDataEverObtained)));
    }

    #[test]
    fn test_all_live_is_not_cached() {
        let snapshot = SnapshotAssembler::default()
            .assemble(&live_state(), &FieldOverrides::new(), now())
            .unwrap();
        assert!(!snapshot.using_cached_data);
        assert_eq!(snapshot.fields.len(), 5);
        assert!(snapshot.cached_fields.values().all(|c| !c));
        assert_eq!(snapshot.values().len(), 5);
        assert_eq!(snapshot.values()[&MetricField::Humidity], 10.0);
    }

    #[test]
    fn test_one_cached_field_flags_snapshot() {
        let mut state = live_state();
        state.slots.get_mut(&MetricField::SoilMoisture).unwrap().live = false;

        let snapshot = SnapshotAssembler::default()
            .assemble(&state, &FieldOverrides::new(), now())
            .unwrap();

        assert!(snapshot.using_cached_data);
        assert!(snapshot.cached_fields[&MetricField::SoilMoisture]);
        assert!(!snapshot.cached_fields[&MetricField::Temperature]);
        assert_eq!(
            snapshot.field(MetricField::SoilMoisture).unwrap().source,
            FieldSource::MemoryCache
        );
    }

    #[test]
    fn test_missing_field_falls_back_to_default() {
        let mut state = live_state();
        state.slots.remove(&MetricField::WindGust);

        let snapshot = SnapshotAssembler::default()
            .assemble(&state, &FieldOverrides::new(), now())
            .unwrap();
        let gust = snapshot.field(MetricField::WindGust).unwrap();
        assert_eq!(gust.value, 8.0);
        assert_eq!(gust.source, FieldSource::Default);
        assert!(gust.cached);
    }

    #[test]
    fn test_override_replaces_only_its_field() {
        let mut overrides = FieldOverrides::new();
        overrides.insert(MetricField::Temperature, 38.0);

        let assembler = SnapshotAssembler::default();
        let plain = assembler
            .assemble(&live_state(), &FieldOverrides::new(), now())
            .unwrap();
        let snapshot = assembler.assemble(&live_state(), &overrides, now()).unwrap();

        let temp = snapshot.field(MetricField::Temperature).unwrap();
        assert_eq!(temp.value, 38.0);
        assert!(temp.overridden);
        assert_eq!(temp.source, FieldSource::Live);
        for field in MetricField::ALL.into_iter().filter(|f| *f != MetricField::Temperature) {
            assert_eq!(snapshot.field(field), plain.field(field));
        }
    }

    fn disk_only_state() -> CacheState {
        let mut state = live_state();
        for slot in state.slots.values_mut() {
            slot.disk = slot.memory.take();
            slot.live = false;
        }
        state.has_live_data = false;
        state.disk_loaded = true;
        state.cycle_committed = false;
        state
    }

    #[test]
    fn test_recent_disk_data_not_cached_before_first_cycle() {
        let snapshot = SnapshotAssembler::default()
            .assemble(&disk_only_state(), &FieldOverrides::new(), now())
            .unwrap();

        assert!(!snapshot.using_cached_data);
        for resolved in snapshot.fields.values() {
            assert_eq!(resolved.source, FieldSource::DiskCache);
            assert!(!resolved.cached);
        }
    }

    #[test]
    fn test_old_disk_data_is_cached_before_first_cycle() {
        let later = ts("2026-07-01T13:00:00Z");
        let snapshot = SnapshotAssembler::default()
            .assemble(&disk_only_state(), &FieldOverrides::new(), later)
            .unwrap();
        assert!(snapshot.using_cached_data);
    }

    #[test]
    fn test_disk_data_cached_once_a_cycle_committed() {
        let mut state = disk_only_state();
        state.cycle_committed = true;
        let snapshot = SnapshotAssembler::default()
            .assemble(&state, &FieldOverrides::new(), now())
            .unwrap();
        assert!(snapshot.using_cached_data);
        assert!(snapshot.cached_fields.values().all(|c| *c));
    }
}
