// src/codes/sources/community.rs
//! Community text feed: an unstructured page mined for code tokens.
//!
//! Extraction is precision-over-recall: a candidate only counts when an
//! explicit contextual keyword (code/redeem/gift/...) immediately precedes
//! a token of 2-3 hyphen-delimited segments with at least 4 alphanumerics
//! each. Missing a code is acceptable; manufacturing one from unrelated
//! text is not.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::codes::types::{Code, Scope, SourceKind};

use super::CodeFeed;

const MINED_TAG: &str = "community-mined";

fn candidate_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:codes?|redeem|gift)\b[\s:=]{1,3}([A-Za-z0-9]{4,}(?:-[A-Za-z0-9]{4,}){1,2})",
        )
        .expect("community code regex")
    })
}

/// Decode HTML entities, strip tags, collapse whitespace.
fn scrub_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Extract candidate code tokens from free-form text.
pub fn extract_codes(text: &str) -> Vec<String> {
    let clean = scrub_text(text);
    let mut out = Vec::new();
    for caps in candidate_regex().captures_iter(&clean) {
        let Some(m) = caps.get(1) else { continue };
        // Reject matches that are a prefix of a longer token (e.g. a fourth
        // hyphen segment, or letters glued to the end).
        let next = clean[m.end()..].chars().next();
        if matches!(next, Some(c) if c == '-' || c.is_ascii_alphanumeric()) {
            continue;
        }
        out.push(m.as_str().to_uppercase());
    }
    out
}

pub struct CommunityFeed {
    base_url: String,
    client: reqwest::Client,
}

impl CommunityFeed {
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
}

#[async_trait::async_trait]
impl CodeFeed for CommunityFeed {
    async fn fetch(&self, _scope: Scope) -> Result<Vec<Code>> {
        let resp = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .context("community feed http get")?;
        let resp = resp
            .error_for_status()
            .context("community feed non-2xx status")?;
        let body = resp.text().await.context("community feed body text")?;

        // The page carries no per-item time; observation time is fetch time.
        let fetched_at = Utc::now();
        Ok(extract_codes(&body)
            .into_iter()
            .map(|token| Code {
                code: token,
                source: SourceKind::CommunitySecondary,
                timestamp: fetched_at,
                tags: vec![MINED_TAG.to_string()],
                expires: None,
                region: None,
            })
            .collect())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::CommunitySecondary
    }
}
