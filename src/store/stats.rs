// Append-only ND-JSON log of every ranked article, one line per article.
// A run's records are serialized up front and written with a single append,
// so they stay contiguous in the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::pipeline::article::SummaryOrigin;
use crate::pipeline::tiers::{Digest, Tier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub rank: u32,
    pub score: i32,
    pub matched_keywords: Vec<String>,
    pub feed_name: String,
    pub title: String,
    pub url: String,
    pub tier: Tier,
    #[serde(default)]
    pub summary_origin: Option<SummaryOrigin>,
}

impl StatsRecord {
    /// One record per ranked article, all sharing `timestamp`.
    #[must_use]
    pub fn from_digest(run_id: Uuid, timestamp: DateTime<Utc>, digest: &Digest) -> Vec<Self> {
        digest
            .ranked()
            .map(|(tier, article)| Self {
                run_id,
                timestamp,
                rank: article.rank().unwrap_or_default(),
                score: article.score(),
                matched_keywords: article.matched_keywords().iter().cloned().collect(),
                feed_name: article.feed_name().to_string(),
                title: article.title().to_string(),
                url: article.url().to_string(),
                tier,
                summary_origin: article.summary_origin(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct StatsLogger {
    path: PathBuf,
}

impl StatsLogger {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `records` and returns how many were written.
    ///
    /// # Errors
    /// Fails if a record cannot be serialized or the file cannot be written.
    pub async fn append(&self, records: &[StatsRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut buffer = String::new();
        for record in records {
            let line = serde_json::to_string(record).context("failed to serialize stats record")?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open stats log {}", self.path.display()))?;
        file.write_all(buffer.as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush().await?;
        file.sync_data().await?;

        Ok(records.len())
    }
}
