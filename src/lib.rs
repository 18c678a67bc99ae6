// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod chat;
pub mod codes;
pub mod config;
pub mod metrics;
pub mod ratelimit;
pub mod store;

use std::sync::Arc;

use axum::Router;

use api::AppState;
use chat::history::ChatHistory;
use chat::provider::{ChatProvider, MockChatProvider, OpenAiProvider, UnconfiguredProvider};
use chat::retry::RetryPolicy;
use codes::aggregator::{Aggregator, FeedSlot};
use codes::cache::CodesCache;
use codes::report::ReportLog;
use codes::sources::{community::CommunityFeed, primary::PrimaryFeed, sample::SampleFeed};
use codes::types::SourceKind;
use config::ServiceConfig;
use ratelimit::RateLimiter;
use store::{KvStore, MemoryStore};

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::codes::types::{AggregationResult, Code, HealthReport, Scope};

/// Wire the full application state from configuration. Everything is
/// explicitly constructed and injected here; nothing hangs off a module
/// global, so tests can assemble their own [`AppState`] with doubles.
pub fn build_state(cfg: &ServiceConfig) -> AppState {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let cache = CodesCache::new(Arc::clone(&kv), cfg.cache_ttl, cfg.cache_stale);

    let mut slots = Vec::new();
    for kind in &cfg.source_priority {
        let slot = match kind {
            SourceKind::AggregatorPrimary => match &cfg.primary_feed_url {
                Some(url) => FeedSlot::configured(*kind, Box::new(PrimaryFeed::new(url.clone()))),
                None => FeedSlot::unconfigured(*kind),
            },
            SourceKind::CommunitySecondary => match &cfg.community_feed_url {
                Some(url) => FeedSlot::configured(*kind, Box::new(CommunityFeed::new(url.clone()))),
                None => FeedSlot::unconfigured(*kind),
            },
            SourceKind::Sample => FeedSlot::configured(*kind, Box::new(SampleFeed)),
        };
        slots.push(slot);
    }

    let aggregator = Aggregator::new(slots, cfg.source_priority.clone(), cache);

    let chat_provider: Arc<dyn ChatProvider> = if cfg.chat_mock_mode {
        Arc::new(MockChatProvider::echo())
    } else {
        match &cfg.openai_api_key {
            Some(key) => Arc::new(OpenAiProvider::new(key.clone(), cfg.openai_model.clone())),
            None => Arc::new(UnconfiguredProvider),
        }
    };

    AppState {
        aggregator: Arc::new(aggregator),
        reports: Arc::new(ReportLog::new(cfg.report_dir.clone())),
        limiter: Arc::new(RateLimiter::new(
            Arc::clone(&kv),
            cfg.chat_rate_limit,
            cfg.chat_rate_window,
        )),
        chat_provider,
        retry: RetryPolicy::default(),
        chat_history: Arc::new(ChatHistory::with_capacity(2_000)),
    }
}

/// Build the same Router the binary serves, from environment configuration.
pub async fn app() -> anyhow::Result<Router> {
    let cfg = ServiceConfig::from_env();
    Ok(api::router(build_state(&cfg)))
}

/// Current UNIX time in seconds.
pub(crate) fn now_unix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current UNIX time in milliseconds.
pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
