// src/config.rs
//! Service configuration from environment variables (loaded via `.env` in
//! local runs) plus the source-priority TOML file.

use std::path::PathBuf;
use std::time::Duration;

use crate::codes::sources::load_priority_default;
use crate::codes::types::SourceKind;

pub const ENV_PRIMARY_FEED_URL: &str = "CODES_PRIMARY_FEED_URL";
pub const ENV_COMMUNITY_FEED_URL: &str = "CODES_COMMUNITY_FEED_URL";
pub const ENV_CACHE_TTL_SECS: &str = "CODES_CACHE_TTL_SECS";
pub const ENV_CACHE_STALE_SECS: &str = "CODES_CACHE_STALE_SECS";
pub const ENV_REPORT_DIR: &str = "CODES_REPORT_DIR";
pub const ENV_CHAT_RATE_LIMIT: &str = "CHAT_RATE_LIMIT";
pub const ENV_CHAT_RATE_WINDOW_SECS: &str = "CHAT_RATE_WINDOW_SECS";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const ENV_CHAT_TEST_MODE: &str = "CHAT_TEST_MODE";

pub const DEFAULT_CACHE_TTL_SECS: u64 = 30;
pub const DEFAULT_CACHE_STALE_SECS: u64 = 600;
pub const DEFAULT_REPORT_DIR: &str = "data/code-reports";
pub const DEFAULT_CHAT_RATE_LIMIT: u32 = 10;
pub const DEFAULT_CHAT_RATE_WINDOW_SECS: u64 = 60;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub primary_feed_url: Option<String>,
    pub community_feed_url: Option<String>,
    pub cache_ttl: Duration,
    pub cache_stale: Duration,
    pub report_dir: PathBuf,
    pub chat_rate_limit: u32,
    pub chat_rate_window: Duration,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub chat_mock_mode: bool,
    pub source_priority: Vec<SourceKind>,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let priority = load_priority_default().unwrap_or_else(|e| {
            tracing::warn!(error = ?e, "source priority config unreadable; using default order");
            SourceKind::DEFAULT_PRIORITY.to_vec()
        });

        Self {
            primary_feed_url: non_empty_env(ENV_PRIMARY_FEED_URL),
            community_feed_url: non_empty_env(ENV_COMMUNITY_FEED_URL),
            cache_ttl: Duration::from_secs(parse_env(ENV_CACHE_TTL_SECS, DEFAULT_CACHE_TTL_SECS)),
            cache_stale: Duration::from_secs(parse_env(
                ENV_CACHE_STALE_SECS,
                DEFAULT_CACHE_STALE_SECS,
            )),
            report_dir: non_empty_env(ENV_REPORT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_DIR)),
            chat_rate_limit: parse_env(ENV_CHAT_RATE_LIMIT, DEFAULT_CHAT_RATE_LIMIT),
            chat_rate_window: Duration::from_secs(parse_env(
                ENV_CHAT_RATE_WINDOW_SECS,
                DEFAULT_CHAT_RATE_WINDOW_SECS,
            )),
            openai_api_key: non_empty_env(ENV_OPENAI_API_KEY),
            openai_model: non_empty_env(ENV_OPENAI_MODEL)
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            chat_mock_mode: std::env::var(ENV_CHAT_TEST_MODE)
                .is_ok_and(|v| v.eq_ignore_ascii_case("mock")),
            source_priority: priority,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
