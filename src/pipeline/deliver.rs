use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::pipeline::RunContext;
use crate::pipeline::article::SummaryOrigin;
use crate::pipeline::tiers::{Digest, Tier};

#[async_trait]
pub trait DeliveryStage: Send + Sync {
    async fn deliver(&self, run: &RunContext, digest: &Digest) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct OutboxDocument<'a> {
    title: &'a str,
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    article_count: usize,
    tiers: Vec<OutboxTier<'a>>,
}

#[derive(Debug, Serialize)]
struct OutboxTier<'a> {
    tier: Tier,
    articles: Vec<OutboxArticle<'a>>,
    units: Vec<OutboxUnit>,
}

#[derive(Debug, Serialize)]
struct OutboxArticle<'a> {
    rank: Option<u32>,
    score: i32,
    title: &'a str,
    url: &'a str,
    feed_name: &'a str,
    published_at: DateTime<Utc>,
    summary: &'a str,
    summary_origin: Option<SummaryOrigin>,
    matched_keywords: &'a BTreeSet<String>,
}

#[derive(Debug, Serialize)]
struct OutboxUnit {
    first_rank: usize,
    last_rank: usize,
    rendered_chars: usize,
    oversized: bool,
}

impl<'a> OutboxDocument<'a> {
    fn new(title: &'a str, run: &RunContext, digest: &'a Digest) -> Self {
        let tiers = Tier::ALL
            .into_iter()
            .map(|tier| OutboxTier {
                tier,
                articles: digest
                    .tier(tier)
                    .iter()
                    .map(|article| OutboxArticle {
                        rank: article.rank(),
                        score: article.score(),
                        title: article.title(),
                        url: article.url(),
                        feed_name: article.feed_name(),
                        published_at: article.published_at(),
                        summary: article.display_summary(),
                        summary_origin: article.summary_origin(),
                        matched_keywords: article.matched_keywords(),
                    })
                    .collect(),
                units: digest
                    .units_for(tier)
                    .map(|unit| OutboxUnit {
                        first_rank: unit.first_rank(),
                        last_rank: unit.last_rank(),
                        rendered_chars: unit.rendered_chars,
                        oversized: unit.oversized,
                    })
                    .collect(),
            })
            .collect();

        Self {
            title,
            run_id: run.run_id(),
            generated_at: run.now(),
            article_count: digest.len(),
            tiers,
        }
    }
}

/// Writes the digest as one JSON document for the messaging collaborator to post.
#[derive(Debug, Clone)]
pub struct OutboxDelivery {
    path: PathBuf,
    title: String,
}

impl OutboxDelivery {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
        }
    }
}

#[async_trait]
impl DeliveryStage for OutboxDelivery {
    async fn deliver(&self, run: &RunContext, digest: &Digest) -> Result<()> {
        let document = OutboxDocument::new(&self.title, run, digest);
        let json = serde_json::to_vec_pretty(&document).context("failed to serialize digest")?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("failed to write outbox {}", self.path.display()))?;

        info!(
            run_id = %run.run_id(),
            path = %self.path.display(),
            articles = digest.len(),
            units = digest.units().len(),
            "digest written to outbox"
        );
        Ok(())
    }
}

/// Logs the ranked list instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct DryRunDelivery;

#[async_trait]
impl DeliveryStage for DryRunDelivery {
    async fn deliver(&self, run: &RunContext, digest: &Digest) -> Result<()> {
        for (tier, article) in digest.ranked() {
            info!(
                run_id = %run.run_id(),
                tier = %tier,
                rank = article.rank().unwrap_or_default(),
                score = article.score(),
                title = %article.title(),
                feed = %article.feed_name(),
                keywords = ?article.matched_keywords(),
                "dry run"
            );
        }
        info!(
            run_id = %run.run_id(),
            headline = digest.tier(Tier::Headline).len(),
            summary = digest.tier(Tier::Summary).len(),
            link = digest.tier(Tier::Link).len(),
            "dry run finished; nothing delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::article::Article;
    use crate::pipeline::tiers::{TierAssembler, TierPlan, TierSpec};
    use std::collections::BTreeSet;

    fn digest() -> Digest {
        let plan = TierPlan::new(
            TierSpec::unbounded(1),
            TierSpec::unbounded(1),
            TierSpec::new(2, Some(1), None),
        )
        .unwrap();
        let candidates = (0..4i32)
            .map(|i| {
                let mut article = Article::new(
                    format!("Article {i}"),
                    format!("https://example.com/{i}"),
                    "raw",
                    "feed",
                    Utc::now(),
                );
                article.set_score(10 - i, BTreeSet::from(["rust".to_string()]));
                article.set_generated_summary(format!("summary {i}"));
                article
            })
            .collect();
        TierAssembler::new(plan).assemble(candidates)
    }

    #[tokio::test]
    async fn outbox_contains_every_tier_and_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("digest.json");
        let run = RunContext::new(Utc::now());

        OutboxDelivery::new(&path, "Morning digest")
            .deliver(&run, &digest())
            .await
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["title"], "Morning digest");
        assert_eq!(value["run_id"], run.run_id().to_string());
        assert_eq!(value["article_count"], 4);
        let tiers = value["tiers"].as_array().unwrap();
        assert_eq!(tiers.len(), 3);
        assert_eq!(tiers[0]["tier"], "headline");
        assert_eq!(tiers[0]["articles"][0]["rank"], 1);
        assert_eq!(tiers[0]["articles"][0]["summary"], "summary 0");
        assert_eq!(tiers[2]["units"].as_array().unwrap().len(), 2);
        assert_eq!(tiers[2]["units"][1]["first_rank"], 4);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let run = RunContext::new(Utc::now());
        assert!(DryRunDelivery.deliver(&run, &digest()).await.is_ok());
    }
}
