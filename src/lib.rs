//! Weather cache and refresh engine behind a wildfire risk dashboard.
//!
//! Keeps five weather metrics available at all times: live values from the
//! Synoptic Data and Weather Underground providers when they answer, cached
//! values (memory, then disk) with explicit provenance when they do not.
//! The external API and risk layers consume [`WeatherMonitor::snapshot`].

pub mod cache;
pub mod config;
pub mod errors;
mod helpers;
pub mod services;

pub use cache::models::{CacheSnapshot, FieldSource, MetricField, RefreshState};
pub use config::AppConfig;
pub use errors::{AppError, ErrorResponse};
pub use services::monitor::{CacheInfo, SnapshotResponse, WeatherMonitor};
pub use services::overrides::SessionId;
