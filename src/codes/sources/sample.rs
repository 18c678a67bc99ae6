// src/codes/sources/sample.rs
//! Built-in sample source. Keeps the service demoable (and the pipeline
//! exercisable in tests) when no real upstream is configured.

use anyhow::Result;
use chrono::{Duration, Utc};

use crate::codes::types::{Code, Scope, SourceKind};

use super::CodeFeed;

pub struct SampleFeed;

impl SampleFeed {
    fn items() -> Vec<Code> {
        let now = Utc::now();
        let sample = |raw: &str, age_hours: i64, expires_hours: Option<i64>| Code {
            code: raw.to_string(),
            source: SourceKind::Sample,
            timestamp: now - Duration::hours(age_hours),
            tags: vec!["sample".to_string()],
            expires: expires_hours.map(|h| now + Duration::hours(h)),
            region: None,
        };
        vec![
            sample("SLIMY-WELCOME-2024", 2, Some(72)),
            sample("SNAIL-SPEED-BOOST", 26, None),
            // Expired an hour ago; exercises the `active` scope filter.
            sample("SHELL-SHINE-EXPIRED", 50, Some(-1)),
            // Older than a week; exercises the `past7` scope filter.
            sample("TRAIL-OLDIE-2023", 8 * 24, None),
        ]
    }
}

#[async_trait::async_trait]
impl CodeFeed for SampleFeed {
    async fn fetch(&self, _scope: Scope) -> Result<Vec<Code>> {
        Ok(Self::items())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Sample
    }
}
