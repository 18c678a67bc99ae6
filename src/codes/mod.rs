// src/codes/mod.rs
//! Secret-code aggregation pipeline: source fetchers, priority-ordered
//! merge/dedup, scope filtering, and the TTL/stale-while-revalidate cache.

pub mod aggregator;
pub mod cache;
pub mod report;
pub mod sources;
pub mod types;

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use types::{Code, Scope, SourceKind};

/// Canonical comparison form of a code: uppercase with hyphens and
/// whitespace stripped. Display form keeps the raw punctuation.
pub fn normalize_code(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

/// Merge per-source batches into one deduplicated list.
///
/// Batches are visited in the given priority order, so on a collision the
/// entry from the higher-trust source always wins regardless of which
/// fetcher happened to resolve first. Returns the kept codes plus the
/// number of duplicates dropped.
pub fn merge_by_priority(
    mut batches: Vec<(SourceKind, Vec<Code>)>,
    priority: &[SourceKind],
) -> (Vec<Code>, usize) {
    let rank = |kind: SourceKind| -> usize {
        priority
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(priority.len())
    };
    batches.sort_by_key(|(kind, _)| rank(*kind));

    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    for (_, batch) in batches {
        for code in batch {
            let norm = normalize_code(&code.code);
            if norm.is_empty() || !seen.insert(norm) {
                dropped += 1;
                continue;
            }
            kept.push(code);
        }
    }
    (kept, dropped)
}

/// Sort newest observation first. The sort is stable, so ties keep the
/// priority-merged insertion order.
pub fn sort_newest_first(codes: &mut [Code]) {
    codes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Apply the requested scope filter relative to `now`.
pub fn apply_scope(codes: Vec<Code>, scope: Scope, now: DateTime<Utc>) -> Vec<Code> {
    match scope {
        Scope::All => codes,
        Scope::Active => codes
            .into_iter()
            .filter(|c| c.expires.is_none_or(|exp| exp > now))
            .collect(),
        Scope::Past7 => {
            let cutoff = now - Duration::days(7);
            codes
                .into_iter()
                .filter(|c| c.timestamp >= cutoff)
                .collect()
        }
    }
}
