//! Background scheduler for periodic refresh cycles.
//!
//! The primary upstream publishes new observations on a fixed cadence, so
//! triggers are aligned to the cadence boundaries (plus a short offset for
//! upstream processing) rather than run on a fixed interval from start-up.
//! After a failed or partial cycle the next trigger comes sooner.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::models::CycleOutcomeKind;
use crate::config::AppConfig;
use crate::services::refresh::RefreshCoordinator;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Minimum sleep between scheduled triggers (seconds).
const SCHEDULER_MIN_SLEEP_SECS: u64 = 30;

/// Maximum sleep between scheduled triggers (seconds).
const SCHEDULER_MAX_SLEEP_SECS: u64 = 1800;

/// Smallest cadence accepted; shorter values are raised to this.
const SCHEDULER_MIN_CADENCE_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Schedule calculation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RefreshSchedule {
    pub cadence: Duration,
    pub offset: Duration,
    pub failure_retry: Duration,
}

impl RefreshSchedule {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cadence: config.refresh_cadence,
            offset: config.refresh_offset,
            failure_retry: config.failure_retry,
        }
    }

    /// How long to sleep before the next trigger, given the last outcome.
    pub fn sleep_duration(&self, now: DateTime<Utc>, last: Option<CycleOutcomeKind>) -> Duration {
        let mut target = next_aligned_trigger(now, self.cadence, self.offset);
        if matches!(last, Some(CycleOutcomeKind::Failed | CycleOutcomeKind::Partial)) {
            let retry_at = now + to_chrono(self.failure_retry);
            if retry_at < target {
                target = retry_at;
            }
        }
        let secs = (target - now).num_seconds().max(0) as u64;
        Duration::from_secs(secs.clamp(SCHEDULER_MIN_SLEEP_SECS, SCHEDULER_MAX_SLEEP_SECS))
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(SCHEDULER_MAX_SLEEP_SECS as i64))
}

/// First `boundary + offset` strictly after `now`, where boundaries are
/// multiples of `cadence` since the Unix epoch (e.g. :00, :15, :30, :45 for
/// a 15 minute cadence).
pub fn next_aligned_trigger(now: DateTime<Utc>, cadence: Duration, offset: Duration) -> DateTime<Utc> {
    let cadence_secs = (cadence.as_secs() as i64).max(SCHEDULER_MIN_CADENCE_SECS);
    let offset_secs = offset.as_secs() as i64 % cadence_secs;

    let t = now.timestamp();
    let boundary = t - t.rem_euclid(cadence_secs);
    let mut next = boundary + offset_secs;
    if next <= t {
        next += cadence_secs;
    }
    DateTime::from_timestamp(next, 0).unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Main scheduler loop
// ---------------------------------------------------------------------------

/// Run the scheduler forever. Should be spawned via
/// `tokio::spawn(run_scheduler(...))`.
pub async fn run_scheduler(coordinator: Arc<RefreshCoordinator>, schedule: RefreshSchedule) {
    tracing::info!(
        "Scheduler: started (cadence {}s, offset {}s)",
        schedule.cadence.as_secs(),
        schedule.offset.as_secs()
    );

    let mut last = coordinator.state().await.last_outcome;
    loop {
        let now = Utc::now();
        let sleep = schedule.sleep_duration(now, last);
        let wake_at = now + to_chrono(sleep);
        coordinator.set_next_trigger(wake_at).await;
        tracing::debug!(
            "Scheduler: sleeping {}s until {}",
            sleep.as_secs(),
            wake_at.format("%H:%M:%S")
        );

        tokio::time::sleep(sleep).await;

        let outcome = coordinator.trigger().await.await;
        last = Some(outcome.kind);
    }
}
