// src/ratelimit.rs
//! Fixed-window request counter over the shared [`KvStore`].
//!
//! Counting is plain read-modify-write; concurrent callers can race and
//! undercount slightly, which is tolerable for a chat quota. Caller keys are
//! hashed before storage so raw user ids and client addresses never sit in
//! the store.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::now_ms;
use crate::store::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64, reset_at_ms: u64 },
}

impl RateDecision {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateDecision::Limited { .. })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WindowCounter {
    window_start_ms: u64,
    count: u32,
}

pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub async fn check(&self, caller: &str) -> RateDecision {
        self.check_at(caller, now_ms()).await
    }

    /// Like [`check`](Self::check) with an explicit clock, for deterministic
    /// tests.
    pub async fn check_at(&self, caller: &str, now_ms: u64) -> RateDecision {
        let key = format!("ratelimit:chat:{}", anon_key(caller));
        let window_ms = self.window.as_millis() as u64;

        let mut counter = self
            .store
            .get(&key)
            .await
            .and_then(|v| serde_json::from_value::<WindowCounter>(v).ok())
            .unwrap_or(WindowCounter {
                window_start_ms: now_ms,
                count: 0,
            });

        // Window elapsed: the counter resets.
        if now_ms.saturating_sub(counter.window_start_ms) >= window_ms {
            counter = WindowCounter {
                window_start_ms: now_ms,
                count: 0,
            };
        }

        if counter.count >= self.limit {
            let reset_at_ms = counter.window_start_ms + window_ms;
            return RateDecision::Limited {
                retry_after_secs: reset_at_ms.saturating_sub(now_ms).div_ceil(1_000).max(1),
                reset_at_ms,
            };
        }

        counter.count += 1;
        let remaining = self.limit - counter.count;
        if let Ok(value) = serde_json::to_value(&counter) {
            self.store.set(&key, value, self.window).await;
        }
        RateDecision::Allowed { remaining }
    }
}

/// Short stable hash of the caller key (user id or client address).
fn anon_key(caller: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(caller.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}
