//! Slimy.ai Codes Service — Binary Entrypoint
//! Boots the Axum HTTP server, wiring routes, shared state, and middleware.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use slimy_codes_service::config::ServiceConfig;
use slimy_codes_service::metrics::Metrics;
use slimy_codes_service::{api, build_state};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - SLIMY_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("SLIMY_DEV_LOG").ok().is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("slimy_codes_service=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments. This lets the
    // feed URLs, cache TTLs, and OPENAI_API_KEY come from .env locally.
    let _ = dotenvy::dotenv();

    // Initialize dev tracing early (no-op in production).
    enable_dev_tracing();

    let cfg = ServiceConfig::from_env();
    let metrics = Metrics::init(cfg.cache_ttl.as_secs());

    let state = build_state(&cfg);
    let router = api::router(state).merge(metrics.router());

    Ok(router.into())
}
