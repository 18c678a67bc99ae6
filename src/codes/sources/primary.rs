// src/codes/sources/primary.rs
//! Structured JSON feed from the primary code aggregator.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::codes::types::{Code, Scope, SourceKind};

use super::CodeFeed;

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    codes: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedItem {
    code: String,
    #[serde(default)]
    added_at: Option<DateTime<Utc>>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct PrimaryFeed {
    base_url: String,
    client: reqwest::Client,
}

impl PrimaryFeed {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("slimy-codes-service/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn map_items(items: Vec<FeedItem>, fetched_at: DateTime<Utc>) -> Vec<Code> {
        items
            .into_iter()
            .filter(|it| !it.code.trim().is_empty())
            .map(|it| Code {
                code: it.code.trim().to_uppercase(),
                source: SourceKind::AggregatorPrimary,
                timestamp: it.added_at.unwrap_or(fetched_at),
                tags: it.tags,
                expires: it.expires_at,
                region: it.region,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl CodeFeed for PrimaryFeed {
    async fn fetch(&self, scope: Scope) -> Result<Vec<Code>> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("scope", scope.as_str())])
            .send()
            .await
            .context("primary feed http get")?;
        let resp = resp
            .error_for_status()
            .context("primary feed non-2xx status")?;
        let body: FeedResponse = resp.json().await.context("primary feed json body")?;
        Ok(Self::map_items(body.codes, Utc::now()))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::AggregatorPrimary
    }
}
