//! Refresh coordinator: the single writer of the field cache.
//!
//! A cycle fetches both providers concurrently (each under its own retry
//! policy), commits whatever arrived in one atomic step, and persists the
//! cache only when every field came back live.
//!
//! Single-flight: the in-flight cycle is registered as a `Shared` future.
//! Any trigger arriving while it runs gets a clone of that future instead of
//! starting a second cycle, so concurrent callers observe the same outcome
//! from exactly one pair of upstream fetches.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::cache::field_cache::{to_persisted, FieldCache};
use crate::cache::models::{CacheState, CycleOutcomeKind, MetricField, Observation, RefreshState};
use crate::cache::persistence::DiskPersistence;
use crate::errors::ProviderError;
use crate::services::provider::{ProviderPayload, WeatherProvider};
use crate::services::retry::RetryPolicy;

/// A provider together with the stations it is asked about.
#[derive(Clone)]
pub struct ProviderBinding {
    pub provider: Arc<dyn WeatherProvider>,
    pub station_ids: Vec<String>,
}

impl ProviderBinding {
    pub fn new(provider: Arc<dyn WeatherProvider>, station_ids: Vec<String>) -> Self {
        Self {
            provider,
            station_ids,
        }
    }
}

/// Result of one refresh cycle, shared by every caller attached to it.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub cycle_id: Uuid,
    pub kind: CycleOutcomeKind,
    pub completed_at: DateTime<Utc>,
    /// Cache contents as committed by this cycle.
    pub committed: CacheState,
    pub failures: Vec<ProviderError>,
    pub persisted: bool,
}

/// Handle to the in-flight cycle.
pub type InFlightCycle = Shared<BoxFuture<'static, CycleOutcome>>;

pub struct RefreshCoordinator {
    cache: Arc<FieldCache>,
    persistence: DiskPersistence,
    primary: ProviderBinding,
    gusts: ProviderBinding,
    retry: RetryPolicy,
    state: RwLock<RefreshState>,
    in_flight: Mutex<Option<InFlightCycle>>,
}

impl RefreshCoordinator {
    pub fn new(
        cache: Arc<FieldCache>,
        persistence: DiskPersistence,
        primary: ProviderBinding,
        gusts: ProviderBinding,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            cache,
            persistence,
            primary,
            gusts,
            retry,
            state: RwLock::new(RefreshState::default()),
            in_flight: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<FieldCache> {
        &self.cache
    }

    pub fn persistence(&self) -> &DiskPersistence {
        &self.persistence
    }

    /// Copy of the current bookkeeping.
    pub async fn state(&self) -> RefreshState {
        self.state.read().await.clone()
    }

    pub async fn set_next_trigger(&self, at: DateTime<Utc>) {
        self.state.write().await.next_trigger_at = Some(at);
    }

    /// Start a cycle, or attach to the one already running.
    ///
    /// The cycle is driven by a spawned task, so dropping the returned handle
    /// never cancels it.
    pub async fn trigger(self: &Arc<Self>) -> InFlightCycle {
        let mut slot = self.in_flight.lock().await;
        if let Some(cycle) = slot.as_ref() {
            tracing::debug!("Refresh: attaching to in-flight cycle");
            return cycle.clone();
        }

        // Visible to readers before the spawned task gets scheduled.
        self.state.write().await.in_progress = true;

        let this = Arc::clone(self);
        let cycle_id = Uuid::new_v4();
        let cycle = async move {
            match AssertUnwindSafe(Arc::clone(&this).run_cycle(cycle_id))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => this.abandon_cycle(cycle_id).await,
            }
        }
        .boxed()
        .shared();
        *slot = Some(cycle.clone());
        tokio::spawn(cycle.clone());
        cycle
    }

    /// Trigger (or join) a cycle and wait for it, at most `timeout`.
    ///
    /// `None` means the wait timed out; the cycle keeps running and callers
    /// fall back to whatever the cache currently holds.
    pub async fn refresh_and_wait(self: &Arc<Self>, timeout: Duration) -> Option<CycleOutcome> {
        let cycle = self.trigger().await;
        match tokio::time::timeout(timeout, cycle).await {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                tracing::warn!(
                    "Refresh: no result within {}s, serving current cache",
                    timeout.as_secs_f64()
                );
                None
            }
        }
    }

    async fn fetch(&self, binding: &ProviderBinding) -> Result<ProviderPayload, ProviderError> {
        let provider = &binding.provider;
        self.retry
            .run(provider.name(), || provider.fetch(&binding.station_ids))
            .await
    }

    /// Bookkeeping for a cycle that panicked: release the in-flight slot so
    /// later triggers start a new cycle, and report it as failed.
    async fn abandon_cycle(&self, cycle_id: Uuid) -> CycleOutcome {
        tracing::error!("Refresh: cycle {} panicked, abandoning it", cycle_id);
        let now = Utc::now();
        {
            let mut state = self.state.write().await;
            state.in_progress = false;
            state.total_cycles += 1;
            state.consecutive_failures += 1;
            state.last_outcome = Some(CycleOutcomeKind::Failed);
        }
        *self.in_flight.lock().await = None;

        CycleOutcome {
            cycle_id,
            kind: CycleOutcomeKind::Failed,
            completed_at: now,
            committed: self.cache.snapshot().await,
            failures: Vec::new(),
            persisted: false,
        }
    }

    async fn run_cycle(self: Arc<Self>, cycle_id: Uuid) -> CycleOutcome {
        let started = Instant::now();
        {
            let mut state = self.state.write().await;
            state.in_progress = true;
            state.last_attempt = Some(Utc::now());
            state.last_cycle_id = Some(cycle_id);
        }
        tracing::info!("Refresh: cycle {} started", cycle_id);

        let (primary, gusts) = tokio::join!(self.fetch(&self.primary), self.fetch(&self.gusts));

        let now = Utc::now();
        let mut readings = BTreeMap::new();
        let mut failures = Vec::new();
        for (binding, result) in [(&self.primary, primary), (&self.gusts, gusts)] {
            match result {
                Ok(payload) => {
                    for field in binding.provider.fields() {
                        if let Some(reading) = payload.readings.get(field) {
                            readings.insert(
                                *field,
                                Observation {
                                    value: reading.value,
                                    timestamp: now,
                                    station_id: reading.station_id.clone(),
                                },
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Refresh: cycle {} {} failed: {}", cycle_id, binding.provider.name(), e);
                    failures.push(e);
                }
            }
        }

        let complete = MetricField::ALL.iter().all(|f| readings.contains_key(f));
        let kind = if failures.is_empty() && complete {
            CycleOutcomeKind::Success
        } else if readings.is_empty() {
            CycleOutcomeKind::Failed
        } else {
            CycleOutcomeKind::Partial
        };
        let full_success = kind == CycleOutcomeKind::Success;

        let committed = self.cache.commit_cycle(&readings, full_success, now).await;

        let persisted = if full_success {
            match self.persistence.persist(&to_persisted(&committed)).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Refresh: cycle {} could not persist cache: {}", cycle_id, e);
                    false
                }
            }
        } else {
            false
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        {
            let mut state = self.state.write().await;
            state.in_progress = false;
            state.total_cycles += 1;
            state.last_outcome = Some(kind);
            state.last_cycle_duration_ms = Some(duration_ms);
            if full_success {
                state.last_success = Some(now);
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
            }
        }

        match kind {
            CycleOutcomeKind::Success => tracing::info!(
                "Refresh: cycle {} complete in {}ms, {} fields live",
                cycle_id,
                duration_ms,
                readings.len()
            ),
            _ => tracing::warn!(
                "Refresh: cycle {} ended {:?} in {}ms, {} fields live, serving cached values for the rest",
                cycle_id,
                kind,
                duration_ms,
                readings.len()
            ),
        }

        *self.in_flight.lock().await = None;

        CycleOutcome {
            cycle_id,
            kind,
            completed_at: now,
            committed,
            failures,
            persisted,
        }
    }
}
