// src/store.rs
//! Key-value backing store used by the codes cache and the chat rate
//! limiter. The store is a pure performance/bookkeeping aid: every
//! operation is infallible from the caller's point of view, and a missing
//! or disabled backend simply behaves as a permanent miss.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::now_ms;

#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value, or `None` on miss/expiry/backend failure.
    async fn get(&self, key: &str) -> Option<Value>;
    /// Store a value with an explicit time-to-live.
    async fn set(&self, key: &str, value: Value, ttl: Duration);
    async fn delete(&self, key: &str);
    async fn exists(&self, key: &str) -> bool;
}

struct Entry {
    expires_at_ms: u64,
    value: Value,
}

/// In-process store with lazy expiry. Single get/set operations only, so a
/// plain mutex is enough; last-write-wins races are acceptable here.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut map = self.inner.lock().expect("kv store mutex poisoned");
        match map.get(key) {
            Some(e) if e.expires_at_ms > now_ms() => Some(e.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = Entry {
            expires_at_ms: now_ms().saturating_add(ttl.as_millis() as u64),
            value,
        };
        let mut map = self.inner.lock().expect("kv store mutex poisoned");
        map.insert(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        let mut map = self.inner.lock().expect("kv store mutex poisoned");
        map.remove(key);
    }

    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
}

/// Disabled backend: every read is a miss, every write a no-op. Callers fall
/// back to recomputation, so correctness never depends on the store.
pub struct NoopStore;

#[async_trait::async_trait]
impl KvStore for NoopStore {
    async fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Duration) {}

    async fn delete(&self, _key: &str) {}

    async fn exists(&self, _key: &str) -> bool {
        false
    }
}
