//! Entry point of the core for the API and admin layers.
//!
//! `WeatherMonitor` owns the cache, the refresh coordinator and the override
//! layer, and turns them into snapshots with freshness metadata.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::cache::field_cache::FieldCache;
use crate::cache::models::{CacheSnapshot, CacheState, MetricField, MetricReading, RefreshState};
use crate::cache::persistence::DiskPersistence;
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::helpers::format_age;
use crate::services::overrides::{FieldOverrides, OverrideLayer, SessionId};
use crate::services::provider::WeatherProvider;
use crate::services::refresh::{CycleOutcome, ProviderBinding, RefreshCoordinator};
use crate::services::resolver::FallbackResolver;
use crate::services::scheduler::{run_scheduler, RefreshSchedule};
use crate::services::snapshot::SnapshotAssembler;
use crate::services::synoptic::SynopticClient;
use crate::services::wunderground::WundergroundClient;

/// Freshness metadata forwarded verbatim by the API layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    pub last_updated: Option<DateTime<Utc>>,
    pub is_fresh: bool,
    pub refresh_in_progress: bool,
    pub using_cached_data: bool,
    pub cached_fields: BTreeMap<MetricField, bool>,
    pub field_timestamps: BTreeMap<MetricField, Option<DateTime<Utc>>>,
    /// Age of `last_updated`, e.g. "5 minutes".
    pub age: Option<String>,
    /// Age of the oldest cached field, when any field is cached.
    pub cached_age: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResponse {
    pub snapshot: CacheSnapshot,
    pub cache_info: CacheInfo,
}

pub struct WeatherMonitor {
    coordinator: Arc<RefreshCoordinator>,
    overrides: OverrideLayer,
    assembler: SnapshotAssembler,
    schedule: RefreshSchedule,
    wait_for_fresh_timeout: Duration,
    startup_fetch_timeout: Duration,
    freshness_threshold: Duration,
    critical_staleness: Duration,
}

impl WeatherMonitor {
    /// Build the monitor with the real Synoptic and Weather Underground clients.
    pub fn new(config: &AppConfig) -> Self {
        let synoptic = SynopticClient::new(
            &config.synoptic_base_url,
            config.synoptic_api_key.clone(),
            &config.user_agent,
        );
        let wunderground = WundergroundClient::new(
            &config.wunderground_base_url,
            config.wunderground_api_key.clone(),
            &config.user_agent,
        );
        Self::with_providers(config, Arc::new(synoptic), Arc::new(wunderground))
    }

    pub fn with_providers(
        config: &AppConfig,
        primary: Arc<dyn WeatherProvider>,
        gusts: Arc<dyn WeatherProvider>,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(
            Arc::new(FieldCache::new()),
            DiskPersistence::new(&config.cache_file),
            ProviderBinding::new(primary, config.synoptic_station_ids.clone()),
            ProviderBinding::new(gusts, config.wunderground_station_ids.clone()),
            config.retry.clone(),
        );
        Self {
            coordinator: Arc::new(coordinator),
            overrides: OverrideLayer::new(config.override_session_ttl),
            assembler: SnapshotAssembler::new(
                FallbackResolver::default(),
                config.freshness_threshold,
            ),
            schedule: RefreshSchedule::from_config(config),
            wait_for_fresh_timeout: config.wait_for_fresh_timeout,
            startup_fetch_timeout: config.startup_fetch_timeout,
            freshness_threshold: config.freshness_threshold,
            critical_staleness: config.critical_staleness,
        }
    }

    /// Seed the cache from disk, then attempt one bounded live fetch.
    ///
    /// Never fails; returns whether any data is available afterwards.
    pub async fn initialize(&self) -> bool {
        let cache = self.coordinator.cache();
        let from_disk = cache.initialize(self.coordinator.persistence()).await;
        tracing::info!(
            "Monitor: starting with {} data, attempting live fetch",
            if from_disk { "persisted" } else { "no" }
        );

        match self.coordinator.refresh_and_wait(self.startup_fetch_timeout).await {
            Some(outcome) => tracing::info!("Monitor: initial fetch ended {:?}", outcome.kind),
            None => tracing::warn!("Monitor: initial fetch still running, continuing start-up"),
        }

        cache.snapshot().await.has_any_data()
    }

    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        tokio::spawn(run_scheduler(
            Arc::clone(&self.coordinator),
            self.schedule.clone(),
        ))
    }

    /// Assemble the snapshot for `session` (overrides applied) with its
    /// freshness metadata.
    ///
    /// An empty cache triggers and awaits a bounded refresh first. Stale data
    /// is refreshed in the background, or awaited when `wait_for_fresh` is
    /// set or the data is critically stale; a wait that times out serves the
    /// current cache.
    pub async fn snapshot(
        &self,
        session: Option<&SessionId>,
        wait_for_fresh: bool,
    ) -> Result<SnapshotResponse, AppError> {
        let mut state = self.coordinator.cache().snapshot().await;

        if !state.has_any_data() {
            tracing::info!("Monitor: cache empty, fetching before answering");
            state = self.wait_for_cycle(self.startup_fetch_timeout).await;
        } else if !self.is_fresh(state.last_updated, Utc::now()) {
            let critical = !within(state.last_updated, self.critical_staleness, Utc::now());
            if wait_for_fresh || critical {
                tracing::info!(
                    "Monitor: data {}, waiting for fresh data",
                    if critical { "critically stale" } else { "stale" }
                );
                state = self.wait_for_cycle(self.wait_for_fresh_timeout).await;
            } else if !self.coordinator.state().await.in_progress {
                tracing::info!("Monitor: data stale, scheduling background refresh");
                let _cycle = self.coordinator.trigger().await;
            }
        }

        let overrides = match session {
            Some(session) => self.overrides.for_session(session).await,
            None => FieldOverrides::new(),
        };
        let snapshot = self
            .assembler
            .assemble(&state, &overrides, Utc::now())
            .map_err(|e| {
            tracing::error!("Monitor: no data available after refresh attempt");
            e
        })?;

        let refresh_in_progress = self.coordinator.state().await.in_progress;
        let cache_info = self.cache_info(&snapshot, refresh_in_progress, Utc::now());
        Ok(SnapshotResponse {
            snapshot,
            cache_info,
        })
    }

    async fn wait_for_cycle(&self, timeout: Duration) -> CacheState {
        match self.coordinator.refresh_and_wait(timeout).await {
            Some(outcome) => outcome.committed,
            None => self.coordinator.cache().snapshot().await,
        }
    }

    fn is_fresh(&self, last_updated: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        within(last_updated, self.freshness_threshold, now)
    }

    fn cache_info(
        &self,
        snapshot: &CacheSnapshot,
        refresh_in_progress: bool,
        now: DateTime<Utc>,
    ) -> CacheInfo {
        let oldest_cached = snapshot
            .fields
            .values()
            .filter(|resolved| resolved.cached)
            .filter_map(|resolved| resolved.timestamp)
            .min();

        CacheInfo {
            last_updated: snapshot.last_updated,
            is_fresh: self.is_fresh(snapshot.last_updated, now),
            refresh_in_progress,
            using_cached_data: snapshot.using_cached_data,
            cached_fields: snapshot.cached_fields.clone(),
            field_timestamps: snapshot
                .fields
                .iter()
                .map(|(field, resolved)| (*field, resolved.timestamp))
                .collect(),
            age: snapshot.last_updated.map(|t| format_age(now, t)),
            cached_age: oldest_cached.map(|t| format_age(now, t)),
        }
    }

    /// Current reading of one field, without defaults or overrides.
    pub async fn get(&self, field: MetricField) -> MetricReading {
        self.coordinator.cache().get(field).await
    }

    /// Force a refresh (admin action) and wait up to the fresh-data timeout.
    pub async fn refresh_now(&self) -> Option<CycleOutcome> {
        self.coordinator
            .refresh_and_wait(self.wait_for_fresh_timeout)
            .await
    }

    pub async fn refresh_state(&self) -> RefreshState {
        self.coordinator.state().await
    }

    pub async fn set_overrides(
        &self,
        session: &SessionId,
        overrides: FieldOverrides,
    ) -> Result<FieldOverrides, AppError> {
        self.overrides.set_overrides(session, overrides).await
    }

    pub async fn set_overrides_by_name(
        &self,
        session: &SessionId,
        raw: &HashMap<String, f64>,
    ) -> Result<FieldOverrides, AppError> {
        self.overrides.set_overrides_by_name(session, raw).await
    }

    pub async fn clear_overrides(&self, session: &SessionId) -> bool {
        self.overrides.clear_overrides(session).await
    }

    pub async fn overrides_for(&self, session: &SessionId) -> FieldOverrides {
        self.overrides.for_session(session).await
    }
}

/// Whether `last_updated` is no older than `max_age` at `now`.
fn within(last_updated: Option<DateTime<Utc>>, max_age: Duration, now: DateTime<Utc>) -> bool {
    let max_age = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
    last_updated.is_some_and(|t| now - t <= max_age)
}
