use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    clients::Summarizer,
    config::{Config, ConfigError},
    observability::metrics::Metrics,
    store::{StatsLogger, StatsRecord},
};

pub mod article;
pub mod deliver;
pub mod fetch;
pub mod select;
pub mod summarize;
pub mod tiers;

use deliver::DeliveryStage;
use fetch::FetchStage;
use select::{CandidateSelector, SelectionStats};
use summarize::{SummarizeStage, SummaryStats};
use tiers::{Digest, Tier, TierAssembler};

/// Identity and reference time of one digest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    run_id: Uuid,
    now: DateTime<Utc>,
}

impl RunContext {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_run_id(Uuid::now_v7(), now)
    }

    #[must_use]
    pub fn with_run_id(run_id: Uuid, now: DateTime<Utc>) -> Self {
        Self { run_id, now }
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Reference time for the recency filter, undated articles and stats timestamps.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    /// Every fetched article was outside the recency window.
    NoFreshArticles,
    /// Every fresh article hit an exclusion keyword.
    AllExcluded,
    /// Fresh, non-excluded articles existed but all scored below `min_score`.
    NoKeywordMatches,
}

/// Outcome of a run that did not fail.
///
/// `Unmatched` and `Empty` are normal outcomes, reported separately so a
/// digest built without a single interest match is not mistaken for a
/// regular one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Articles were delivered, but none of them scored above zero.
    Unmatched,
    Empty(EmptyReason),
}

impl RunStatus {
    fn derive(stats: &SelectionStats, digest: &Digest) -> Self {
        if digest.is_empty() {
            let reason = if stats.fresh() == 0 {
                EmptyReason::NoFreshArticles
            } else if stats.excluded == stats.fresh() {
                EmptyReason::AllExcluded
            } else {
                EmptyReason::NoKeywordMatches
            };
            Self::Empty(reason)
        } else if digest.articles().iter().all(|article| article.score() <= 0) {
            Self::Unmatched
        } else {
            Self::Completed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsOutcome {
    Written(usize),
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierReport {
    pub tier: Tier,
    pub articles: usize,
    pub units: usize,
    pub splits: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub selection: SelectionStats,
    pub summaries: SummaryStats,
    pub tiers: Vec<TierReport>,
    pub discarded: usize,
    pub stats: StatsOutcome,
}

impl RunReport {
    #[must_use]
    pub fn tier(&self, tier: Tier) -> Option<&TierReport> {
        self.tiers.iter().find(|report| report.tier == tier)
    }
}

/// Fetch -> Select -> Summarize -> Assemble -> Log -> Deliver, once, in order.
pub struct DigestPipeline {
    fetch: Arc<dyn FetchStage>,
    selector: CandidateSelector,
    summarize: SummarizeStage,
    assembler: TierAssembler,
    stats: Option<StatsLogger>,
    delivery: Arc<dyn DeliveryStage>,
    metrics: Option<Arc<Metrics>>,
}

pub struct PipelineBuilder {
    selector: CandidateSelector,
    assembler: TierAssembler,
    max_concurrency: NonZeroUsize,
    fetch: Option<Arc<dyn FetchStage>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    delivery: Option<Arc<dyn DeliveryStage>>,
    stats: Option<StatsLogger>,
    metrics: Option<Arc<Metrics>>,
}

impl DigestPipeline {
    /// # Errors
    /// See [`PipelineBuilder::from_config`].
    pub fn builder(config: &Config) -> Result<PipelineBuilder, ConfigError> {
        PipelineBuilder::from_config(config)
    }

    /// Runs every stage once.
    ///
    /// # Errors
    /// Fetch and delivery failures abort the run. Summarization and stats
    /// failures are logged and do not.
    #[instrument(name = "digest_run", skip_all, fields(run_id = %run.run_id()))]
    pub async fn execute(&self, run: &RunContext) -> Result<RunReport> {
        let started = Instant::now();

        let articles = self.fetch.fetch(run).await.context("fetch stage failed")?;

        let selection = self.selector.select(articles, run.now());
        let stats = selection.stats;
        self.record_selection(&stats);
        info!(
            fetched = stats.input,
            stale = stats.stale,
            excluded = stats.excluded,
            below_min_score = stats.below_min_score,
            candidates = stats.candidates,
            "candidates selected"
        );

        let (summarized, summaries) = self
            .summarize
            .summarize_all(run, selection.candidates)
            .await;

        let digest = self.assembler.assemble(summarized);
        let tier_reports = tier_reports(&digest);
        for report in &tier_reports {
            info!(
                tier = %report.tier,
                articles = report.articles,
                units = report.units,
                splits = report.splits,
                "tier assembled"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.digest_articles.inc_by(as_f64(digest.len()));
            metrics.delivery_units.inc_by(as_f64(digest.units().len()));
        }

        let stats_outcome = self.write_stats(run, &digest).await;

        self.delivery
            .deliver(run, &digest)
            .await
            .context("delivery stage failed")?;

        let status = RunStatus::derive(&stats, &digest);
        match status {
            RunStatus::Empty(reason) => info!(reason = ?reason, "digest is empty"),
            RunStatus::Unmatched => info!(
                articles = digest.len(),
                "no interest keyword matched any delivered article"
            ),
            RunStatus::Completed => {}
        }

        if let Some(metrics) = &self.metrics {
            match status {
                RunStatus::Completed => metrics.runs_completed.inc(),
                RunStatus::Unmatched => metrics.runs_unmatched.inc(),
                RunStatus::Empty(_) => metrics.runs_empty.inc(),
            }
            metrics
                .run_duration
                .observe(started.elapsed().as_secs_f64());
        }

        info!(
            status = ?status,
            articles = digest.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "digest run finished"
        );

        Ok(RunReport {
            run_id: run.run_id(),
            status,
            selection: stats,
            summaries,
            tiers: tier_reports,
            discarded: digest.discarded(),
            stats: stats_outcome,
        })
    }

    async fn write_stats(&self, run: &RunContext, digest: &Digest) -> StatsOutcome {
        let Some(logger) = &self.stats else {
            return StatsOutcome::Skipped;
        };

        let records = StatsRecord::from_digest(run.run_id(), run.now(), digest);
        match logger.append(&records).await {
            Ok(written) => {
                if let Some(metrics) = &self.metrics {
                    metrics.stats_records_written.inc_by(as_f64(written));
                }
                StatsOutcome::Written(written)
            }
            Err(error) => {
                warn!(
                    path = %logger.path().display(),
                    error = %format!("{error:#}"),
                    "failed to write stats log; continuing with delivery"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.stats_write_failures.inc();
                }
                StatsOutcome::Failed(format!("{error:#}"))
            }
        }
    }

    fn record_selection(&self, stats: &SelectionStats) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.articles_fetched.inc_by(as_f64(stats.input));
        metrics.articles_stale.inc_by(as_f64(stats.stale));
        metrics.articles_excluded.inc_by(as_f64(stats.excluded));
        metrics
            .articles_below_min_score
            .inc_by(as_f64(stats.below_min_score));
        metrics.candidates_selected.inc_by(as_f64(stats.candidates));
    }
}

impl PipelineBuilder {
    #[must_use]
    pub fn new(selector: CandidateSelector, assembler: TierAssembler) -> Self {
        Self {
            selector,
            assembler,
            max_concurrency: NonZeroUsize::MIN,
            fetch: None,
            summarizer: None,
            delivery: None,
            stats: None,
            metrics: None,
        }
    }

    /// Builds the selector and assembler from configuration. Stats logging is
    /// enabled when the config names a stats path.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the keyword matchers cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let selector = CandidateSelector::new(
            config.max_age_hours(),
            config.profile(),
            config.exclusions(),
            config.min_score(),
            config.candidate_buffer_size(),
        )?;
        let assembler = TierAssembler::new(*config.tier_plan());
        let mut builder =
            Self::new(selector, assembler).with_max_concurrency(config.summarizer().max_concurrency);
        if let Some(path) = config.stats_path() {
            builder = builder.with_stats_logger(StatsLogger::new(path));
        }
        Ok(builder)
    }

    #[must_use]
    pub fn with_fetch_stage(mut self, stage: Arc<dyn FetchStage>) -> Self {
        self.fetch = Some(stage);
        self
    }

    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    #[must_use]
    pub fn with_delivery_stage(mut self, stage: Arc<dyn DeliveryStage>) -> Self {
        self.delivery = Some(stage);
        self
    }

    #[must_use]
    pub fn with_stats_logger(mut self, logger: StatsLogger) -> Self {
        self.stats = Some(logger);
        self
    }

    #[must_use]
    pub fn without_stats(mut self) -> Self {
        self.stats = None;
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: NonZeroUsize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// # Errors
    /// Fails when a required stage is missing or the candidate buffer cannot
    /// fill every tier.
    pub fn build(self) -> Result<DigestPipeline> {
        self.assembler
            .plan()
            .ensure_buffer(self.selector.buffer_size())?;

        let fetch = self
            .fetch
            .ok_or_else(|| anyhow!("fetch stage must be configured before build"))?;
        let summarizer = self
            .summarizer
            .ok_or_else(|| anyhow!("summarizer must be configured before build"))?;
        let delivery = self
            .delivery
            .ok_or_else(|| anyhow!("delivery stage must be configured before build"))?;

        let mut summarize = SummarizeStage::new(summarizer, self.max_concurrency);
        if let Some(metrics) = &self.metrics {
            summarize = summarize.with_metrics(Arc::clone(metrics));
        }

        Ok(DigestPipeline {
            fetch,
            selector: self.selector,
            summarize,
            assembler: self.assembler,
            stats: self.stats,
            delivery,
            metrics: self.metrics,
        })
    }
}

fn tier_reports(digest: &Digest) -> Vec<TierReport> {
    Tier::ALL
        .into_iter()
        .map(|tier| TierReport {
            tier,
            articles: digest.tier(tier).len(),
            units: digest.unit_count(tier),
            splits: digest.split_count(tier),
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(count: usize) -> f64 {
    count as f64
}
