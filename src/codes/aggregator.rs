// src/codes/aggregator.rs
//! Fan-out/fan-in over the configured code feeds, health bookkeeping, and
//! the cached entry points used by the API routes.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;

use super::cache::{keys, CacheLookup, CodesCache};
use super::sources::CodeFeed;
use super::types::{
    AggregationResult, Code, HealthReport, Scope, SourceHealth, SourceKind, SourceStatus,
};
use super::{apply_scope, merge_by_priority, sort_newest_first};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "codes_source_errors_total",
            "Code feed fetch/parse failures."
        );
        describe_counter!(
            "codes_dedup_total",
            "Candidates dropped by normalized-code deduplication."
        );
        describe_counter!("codes_cache_hits_total", "Fresh aggregate cache hits.");
        describe_counter!(
            "codes_cache_stale_total",
            "Stale aggregate hits served while revalidating."
        );
        describe_counter!("codes_cache_misses_total", "Aggregate cache misses.");
        describe_histogram!("codes_fetch_ms", "Per-source fetch time in milliseconds.");
        describe_gauge!(
            "codes_last_aggregation_ts",
            "Unix ts when aggregation last ran."
        );
    });
}

/// A configured source position. A slot without a feed stays in the health
/// map as `not_configured` instead of silently disappearing.
pub struct FeedSlot {
    pub kind: SourceKind,
    pub feed: Option<Box<dyn CodeFeed>>,
}

impl FeedSlot {
    pub fn configured(kind: SourceKind, feed: Box<dyn CodeFeed>) -> Self {
        Self {
            kind,
            feed: Some(feed),
        }
    }

    pub fn unconfigured(kind: SourceKind) -> Self {
        Self { kind, feed: None }
    }
}

pub struct Aggregator {
    slots: Vec<FeedSlot>,
    priority: Vec<SourceKind>,
    cache: CodesCache,
}

impl Aggregator {
    pub fn new(slots: Vec<FeedSlot>, priority: Vec<SourceKind>, cache: CodesCache) -> Self {
        Self {
            slots,
            priority,
            cache,
        }
    }

    /// Run the fetch+merge pipeline once, bypassing the aggregate cache.
    ///
    /// Never fails: fetch errors become per-source health entries, and the
    /// worst case is an empty code list with all-failed statuses.
    pub async fn aggregate(&self, scope: Scope) -> AggregationResult {
        ensure_metrics_described();

        let outcomes = join_all(self.slots.iter().map(|s| self.fetch_slot(s, scope))).await;

        let mut sources = std::collections::BTreeMap::new();
        let mut batches = Vec::with_capacity(outcomes.len());
        for (kind, health, items) in outcomes {
            sources.insert(kind.as_str().to_string(), health);
            batches.push((kind, items));
        }

        let (merged, dropped) = merge_by_priority(batches, &self.priority);
        counter!("codes_dedup_total").increment(dropped as u64);

        let now = Utc::now();
        let mut codes = apply_scope(merged, scope, now);
        sort_newest_first(&mut codes);
        gauge!("codes_last_aggregation_ts").set(now.timestamp() as f64);

        let result = AggregationResult {
            codes,
            sources,
            generated_at: now,
        };
        // Health totals are defined over the full code set, so only an
        // unfiltered run refreshes the snapshot.
        if scope == Scope::All {
            self.cache
                .put(&keys::health(), &HealthReport::from_result(&result))
                .await;
        }
        result
    }

    /// Cached aggregation with stale-while-revalidate: a fresh snapshot is
    /// served as is; a stale one is served while a background refresh runs;
    /// a miss recomputes inline. Concurrent refreshes are last-write-wins.
    pub async fn aggregate_cached(self: &Arc<Self>, scope: Scope) -> AggregationResult {
        let key = keys::aggregate(scope);
        match self.cache.lookup::<AggregationResult>(&key).await {
            CacheLookup::Fresh(result) => {
                counter!("codes_cache_hits_total").increment(1);
                result
            }
            CacheLookup::Stale(result) => {
                counter!("codes_cache_stale_total").increment(1);
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let fresh = this.aggregate(scope).await;
                    this.cache.put(&keys::aggregate(scope), &fresh).await;
                });
                result
            }
            CacheLookup::Miss => {
                counter!("codes_cache_misses_total").increment(1);
                let fresh = self.aggregate(scope).await;
                self.cache.put(&key, &fresh).await;
                fresh
            }
        }
    }

    /// Sanitized health view, cheap when a recent snapshot exists.
    pub async fn health_report(self: &Arc<Self>) -> Result<HealthReport> {
        if let Some(report) = self.cache.get_fresh::<HealthReport>(&keys::health()).await {
            return Ok(report);
        }
        let result = self.aggregate_cached(Scope::All).await;
        Ok(HealthReport::from_result(&result))
    }

    async fn fetch_slot(
        &self,
        slot: &FeedSlot,
        scope: Scope,
    ) -> (SourceKind, SourceHealth, Vec<Code>) {
        let Some(feed) = &slot.feed else {
            return (slot.kind, SourceHealth::not_configured(), Vec::new());
        };

        let t0 = std::time::Instant::now();
        match feed.fetch(scope).await {
            Ok(items) => {
                histogram!("codes_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
                // Feeds may forward the scope upstream, so a scoped batch can
                // be a subset. Only an unfiltered fetch is a usable fallback.
                if scope == Scope::All {
                    self.cache.put(&keys::source(slot.kind), &items).await;
                }
                let health = SourceHealth {
                    status: SourceStatus::Ok,
                    last_fetch: Some(Utc::now()),
                    item_count: items.len(),
                    error: None,
                };
                (slot.kind, health, items)
            }
            Err(e) => {
                tracing::warn!(error = ?e, source = slot.kind.as_str(), "code feed fetch failed");
                counter!("codes_source_errors_total").increment(1);
                // Serve the last good batch (if any survives in the cache)
                // and report the source as degraded instead of failed.
                let fallback = match self.cache.lookup::<Vec<Code>>(&keys::source(slot.kind)).await
                {
                    CacheLookup::Fresh(items) | CacheLookup::Stale(items) => Some(items),
                    CacheLookup::Miss => None,
                };
                let (status, items) = match fallback {
                    Some(items) => (SourceStatus::Degraded, items),
                    None => (SourceStatus::Failed, Vec::new()),
                };
                let health = SourceHealth {
                    status,
                    last_fetch: Some(Utc::now()),
                    item_count: items.len(),
                    error: Some(format!("{e:#}")),
                };
                (slot.kind, health, items)
            }
        }
    }
}
