// src/codes/report.rs
//! Append-only log of user-submitted code reports ("this code is dead",
//! "this code is fake"). One JSON line per report, one file per day.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeReport {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub reported_at: DateTime<Utc>,
}

pub struct ReportLog {
    dir: PathBuf,
}

impl ReportLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Append one report as a JSON line to today's file.
    pub async fn append(&self, report: &CodeReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating report dir {}", self.dir.display()))?;

        let path = self
            .dir
            .join(format!("code-reports-{}.jsonl", Utc::now().format("%Y-%m-%d")));
        let mut line = serde_json::to_string(report).context("serializing code report")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening report log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("appending report line")?;
        file.flush().await.context("flushing report line")?;
        Ok(())
    }
}
