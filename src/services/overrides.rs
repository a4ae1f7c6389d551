//! Session-scoped manual overrides for controlled testing.
//!
//! Overrides live only here: they never reach the field cache or the disk,
//! and the assembler sees them only when handed the owning session's map.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cache::models::MetricField;
use crate::errors::AppError;

/// Opaque session identifier supplied by the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type FieldOverrides = BTreeMap<MetricField, f64>;

/// Sessions are forgotten after this long without an update.
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
struct SessionOverrides {
    fields: FieldOverrides,
    updated_at: Instant,
}

#[derive(Debug)]
pub struct OverrideLayer {
    sessions: RwLock<HashMap<SessionId, SessionOverrides>>,
    ttl: Duration,
}

impl Default for OverrideLayer {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SESSION_TTL_SECS))
    }
}

impl OverrideLayer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, entry: &SessionOverrides, now: Instant) -> bool {
        now.duration_since(entry.updated_at) > self.ttl
    }

    /// Merge `overrides` into the session's existing set. Fields not named
    /// keep their previous override (or none). Rejects non-finite values
    /// without applying any of the update. Returns the merged set.
    ///
    /// Expired sessions are dropped here, so the map never outgrows the
    /// sessions active within the TTL.
    pub async fn set_overrides(
        &self,
        session: &SessionId,
        overrides: FieldOverrides,
    ) -> Result<FieldOverrides, AppError> {
        if let Some((field, value)) = overrides.iter().find(|(_, v)| !v.is_finite()) {
            return Err(AppError::BadRequest(format!(
                "override for {} must be a finite number, got {}",
                field, value
            )));
        }

        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_expired(entry, now));
        if sessions.len() < before {
            tracing::debug!("Overrides: expired {} sessions", before - sessions.len());
        }

        let entry = sessions
            .entry(session.clone())
            .or_insert_with(|| SessionOverrides {
                fields: FieldOverrides::new(),
                updated_at: now,
            });
        entry.fields.extend(overrides);
        entry.updated_at = now;
        tracing::info!(
            "Overrides: session {} now overrides {:?}",
            session,
            entry.fields.keys().map(MetricField::as_str).collect::<Vec<_>>()
        );
        Ok(entry.fields.clone())
    }

    /// Same as [`set_overrides`](Self::set_overrides) for a map keyed by
    /// field names, as received from the admin layer.
    pub async fn set_overrides_by_name(
        &self,
        session: &SessionId,
        raw: &HashMap<String, f64>,
    ) -> Result<FieldOverrides, AppError> {
        let parsed = parse_overrides(raw)?;
        self.set_overrides(session, parsed).await
    }

    /// Drop every override of the session. Returns whether any existed.
    pub async fn clear_overrides(&self, session: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(session).is_some();
        if removed {
            tracing::info!("Overrides: cleared for session {}", session);
        }
        removed
    }

    /// Copy of the session's overrides; empty when it has none or they
    /// expired.
    pub async fn for_session(&self, session: &SessionId) -> FieldOverrides {
        let now = Instant::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(session) {
                None => return FieldOverrides::new(),
                Some(entry) if !self.is_expired(entry, now) => return entry.fields.clone(),
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write().await;
        if sessions
            .get(session)
            .is_some_and(|entry| self.is_expired(entry, now))
        {
            sessions.remove(session);
            tracing::info!("Overrides: session {} expired", session);
        }
        FieldOverrides::new()
    }
}

/// Parse a name-keyed override map. Unknown field names are rejected.
pub fn parse_overrides(raw: &HashMap<String, f64>) -> Result<FieldOverrides, AppError> {
    raw.iter()
        .map(|(name, value)| Ok((name.parse::<MetricField>()?, *value)))
        .collect()
}
