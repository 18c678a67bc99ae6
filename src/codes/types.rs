// src/codes/types.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which upstream a code was observed from. Priority on dedup collisions is
/// configured explicitly (see `sources::load_priority_default`); the default
/// ranking is the declaration order below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "aggregator-primary")]
    AggregatorPrimary,
    #[serde(rename = "community-secondary")]
    CommunitySecondary,
    #[serde(rename = "sample")]
    Sample,
}

impl SourceKind {
    pub const DEFAULT_PRIORITY: [SourceKind; 3] = [
        SourceKind::AggregatorPrimary,
        SourceKind::CommunitySecondary,
        SourceKind::Sample,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::AggregatorPrimary => "aggregator-primary",
            SourceKind::CommunitySecondary => "community-secondary",
            SourceKind::Sample => "sample",
        }
    }
}

/// Filter predicate over the aggregated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Active,
    Past7,
    #[default]
    All,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Active => "active",
            Scope::Past7 => "past7",
            Scope::All => "all",
        }
    }
}

/// A single redemption code observed from some source.
///
/// `code` keeps the raw extracted casing/hyphenation for display; equality
/// for dedup purposes goes through [`crate::codes::normalize_code`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Code {
    pub code: String,
    pub source: SourceKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Degraded,
    Failed,
    NotConfigured,
}

/// Per-upstream status snapshot.
///
/// `error` is internal diagnostic detail only; it is skipped on
/// serialization so it can never leak through a public response or a cached
/// payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub status: SourceStatus,
    pub last_fetch: Option<DateTime<Utc>>,
    pub item_count: usize,
    #[serde(skip_serializing, default)]
    pub error: Option<String>,
}

impl SourceHealth {
    pub fn not_configured() -> Self {
        Self {
            status: SourceStatus::NotConfigured,
            last_fetch: None,
            item_count: 0,
            error: None,
        }
    }
}

/// Top-level output of one aggregation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub codes: Vec<Code>,
    pub sources: BTreeMap<String, SourceHealth>,
    pub generated_at: DateTime<Utc>,
}

/// Sanitized health view served by `GET /api/codes/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub ok: bool,
    pub sources: BTreeMap<String, SourceHealth>,
    pub total_codes: usize,
    pub verified_codes: usize,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    /// Overall `ok` requires at least one healthy source and at least one
    /// source that is neither failed nor unconfigured.
    pub fn from_result(result: &AggregationResult) -> Self {
        let any_ok = result
            .sources
            .values()
            .any(|h| h.status == SourceStatus::Ok);
        let all_down = result.sources.values().all(|h| {
            matches!(
                h.status,
                SourceStatus::Failed | SourceStatus::NotConfigured
            )
        });
        let verified = result
            .codes
            .iter()
            .filter(|c| c.source == SourceKind::AggregatorPrimary)
            .count();
        Self {
            ok: any_ok && !all_down,
            sources: result.sources.clone(),
            total_codes: result.codes.len(),
            verified_codes: verified,
            generated_at: result.generated_at,
        }
    }
}
