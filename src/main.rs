// Fire Risk Monitor v0.1
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fire_risk_monitor::{AppConfig, WeatherMonitor};

#[tokio::main]
async fn main() {
    // Local development: pick up a .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fire_risk_monitor=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = AppConfig::from_env();
    tracing::info!("Cache file: {}", config.cache_file.display());

    let monitor = WeatherMonitor::new(&config);
    if !monitor.initialize().await {
        tracing::warn!("No weather data yet; snapshots answer unavailable until a fetch succeeds");
    }

    let scheduler = monitor.spawn_scheduler();

    match monitor.snapshot(None, false).await {
        Ok(response) => match serde_json::to_string(&response.cache_info) {
            Ok(info) => tracing::info!("Current cache: {}", info),
            Err(e) => tracing::error!("Failed to serialize cache info: {}", e),
        },
        Err(e) => tracing::warn!("Snapshot unavailable: {}", e),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
    scheduler.abort();
}
