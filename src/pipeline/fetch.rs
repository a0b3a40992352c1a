use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::pipeline::RunContext;
use crate::pipeline::article::Article;

#[async_trait]
pub trait FetchStage: Send + Sync {
    async fn fetch(&self, run: &RunContext) -> anyhow::Result<Vec<Article>>;
}

/// One entry of the feed collaborator's JSON snapshot.
#[derive(Debug, Deserialize)]
struct FeedRecord {
    #[serde(default)]
    title: Option<String>,
    #[serde(alias = "link")]
    url: String,
    #[serde(default, alias = "raw_summary")]
    summary: Option<String>,
    #[serde(default, alias = "source")]
    feed_name: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

impl FeedRecord {
    /// Undated entries count as published at the start of the run.
    fn into_article(self, now: DateTime<Utc>) -> Article {
        Article::new(
            self.title.unwrap_or_default(),
            self.url,
            self.summary.unwrap_or_default(),
            self.feed_name.unwrap_or_default(),
            self.published_at.unwrap_or(now),
        )
    }
}

/// Reads the articles fetched by the feed collaborator from a JSON array on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFetchStage {
    path: PathBuf,
}

impl SnapshotFetchStage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FetchStage for SnapshotFetchStage {
    async fn fetch(&self, run: &RunContext) -> Result<Vec<Article>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read article snapshot {}", self.path.display()))?;
        let records: Vec<FeedRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse article snapshot {}", self.path.display()))?;

        let undated = records.iter().filter(|r| r.published_at.is_none()).count();
        if undated > 0 {
            debug!(undated, "undated articles treated as published now");
        }

        let articles: Vec<Article> = records
            .into_iter()
            .map(|record| record.into_article(run.now()))
            .collect();
        info!(
            run_id = %run.run_id(),
            path = %self.path.display(),
            count = articles.len(),
            "articles loaded from snapshot"
        );
        Ok(articles)
    }
}
