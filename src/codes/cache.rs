// src/codes/cache.rs
//! TTL + stale-while-revalidate cache over a pluggable [`KvStore`].
//!
//! The cache memoizes aggregation output so repeated callers inside the TTL
//! window get one snapshot without re-fetching upstreams. A stale entry
//! (past TTL but inside the stale window) may still be served while the
//! caller triggers a background refresh. With a no-op store every lookup is
//! a miss and the pipeline just recomputes.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::now_ms;
use crate::store::KvStore;

use super::types::{Scope, SourceKind};

/// Namespaced key derivation. Keys are deterministic per logical purpose so
/// one entry can be invalidated without clearing unrelated ones.
pub mod keys {
    use super::{Scope, SourceKind};

    pub fn aggregate(scope: Scope) -> String {
        format!("codes:aggregate:{}", scope.as_str())
    }

    pub fn source(kind: SourceKind) -> String {
        format!("codes:source:{}", kind.as_str())
    }

    pub fn health() -> String {
        "codes:health".to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    /// Entry younger than the TTL; serve as is.
    Fresh(T),
    /// Entry past the TTL but inside the stale window; serve while refreshing.
    Stale(T),
    Miss,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    stored_at_ms: u64,
    payload: T,
}

#[derive(Clone)]
pub struct CodesCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    stale: Duration,
}

impl CodesCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration, stale: Duration) -> Self {
        Self { store, ttl, stale }
    }

    /// Look up with stale-while-revalidate semantics.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        let Some(raw) = self.store.get(key).await else {
            return CacheLookup::Miss;
        };
        let Ok(env) = serde_json::from_value::<Envelope<T>>(raw) else {
            // Unreadable entries count as a miss; the store is advisory only.
            self.store.delete(key).await;
            return CacheLookup::Miss;
        };
        let age = Duration::from_millis(now_ms().saturating_sub(env.stored_at_ms));
        match self.classify(age) {
            Freshness::Fresh => CacheLookup::Fresh(env.payload),
            Freshness::Stale => CacheLookup::Stale(env.payload),
            Freshness::Expired => CacheLookup::Miss,
        }
    }

    /// Plain TTL lookup: fresh entries only, stale counts as a miss.
    pub async fn get_fresh<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.lookup(key).await {
            CacheLookup::Fresh(v) => Some(v),
            _ => None,
        }
    }

    /// Store a payload; the backing entry lives for TTL + stale window.
    pub async fn put<T: Serialize>(&self, key: &str, payload: &T) {
        let env = Envelope {
            stored_at_ms: now_ms(),
            payload,
        };
        if let Ok(value) = serde_json::to_value(&env) {
            self.store.set(key, value, self.ttl + self.stale).await;
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.store.delete(key).await;
    }

    fn classify(&self, age: Duration) -> Freshness {
        if age <= self.ttl {
            Freshness::Fresh
        } else if age <= self.ttl + self.stale {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

#[derive(Debug, PartialEq)]
enum Freshness {
    Fresh,
    Stale,
    Expired,
}
