// src/codes/sources/mod.rs
pub mod community;
pub mod primary;
pub mod sample;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::types::{Code, Scope, SourceKind};

const ENV_PRIORITY_PATH: &str = "CODES_SOURCES_CONFIG_PATH";
const DEFAULT_PRIORITY_PATH: &str = "config/sources.toml";

/// One upstream provider of candidate codes.
///
/// Implementations do their own failure handling to the extent of returning
/// an error value; the aggregator converts errors into health entries and
/// never lets one provider sink the whole run.
#[async_trait::async_trait]
pub trait CodeFeed: Send + Sync {
    /// Fetch candidates. `scope` is a hint only; the merge step re-applies
    /// the filter authoritatively.
    async fn fetch(&self, scope: Scope) -> Result<Vec<Code>>;
    fn kind(&self) -> SourceKind;
}

/// Load the source priority ranking from an explicit TOML file:
///
/// ```toml
/// priority = ["aggregator-primary", "community-secondary", "sample"]
/// ```
pub fn load_priority_from(path: &Path) -> Result<Vec<SourceKind>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading source config from {}", path.display()))?;
    parse_priority(&content)
}

/// Load the ranking using env var + fallback:
/// 1) $CODES_SOURCES_CONFIG_PATH
/// 2) config/sources.toml
/// 3) built-in default order
pub fn load_priority_default() -> Result<Vec<SourceKind>> {
    if let Ok(p) = std::env::var(ENV_PRIORITY_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!(
                "CODES_SOURCES_CONFIG_PATH points to non-existent path"
            ));
        }
        return load_priority_from(&pb);
    }
    let default = PathBuf::from(DEFAULT_PRIORITY_PATH);
    if default.exists() {
        return load_priority_from(&default);
    }
    Ok(SourceKind::DEFAULT_PRIORITY.to_vec())
}

fn parse_priority(s: &str) -> Result<Vec<SourceKind>> {
    #[derive(serde::Deserialize)]
    struct SourcesToml {
        priority: Vec<SourceKind>,
    }
    let parsed: SourcesToml = toml::from_str(s).context("parsing source config toml")?;
    let mut ranking = Vec::with_capacity(SourceKind::DEFAULT_PRIORITY.len());
    for kind in parsed.priority {
        if ranking.contains(&kind) {
            return Err(anyhow!("duplicate source in priority list: {}", kind.as_str()));
        }
        ranking.push(kind);
    }
    // Sources omitted from the file keep their default relative order at the tail.
    for kind in SourceKind::DEFAULT_PRIORITY {
        if !ranking.contains(&kind) {
            ranking.push(kind);
        }
    }
    Ok(ranking)
}
