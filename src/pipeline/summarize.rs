/// 要約ステージ。候補記事ごとにプロバイダを呼び、失敗時は元の要約にフォールバックする。
///
/// 記事はここで落とされない。全候補の結果が揃うまで戻らない。
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clients::{SummarizeError, Summarizer};
use crate::observability::metrics::Metrics;
use crate::pipeline::RunContext;
use crate::pipeline::article::{Article, SummaryOrigin};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummaryStats {
    pub generated: usize,
    pub fallback: usize,
}

#[derive(Clone)]
pub struct SummarizeStage {
    summarizer: Arc<dyn Summarizer>,
    max_concurrency: NonZeroUsize,
    metrics: Option<Arc<Metrics>>,
}

impl SummarizeStage {
    #[must_use]
    pub fn new(summarizer: Arc<dyn Summarizer>, max_concurrency: NonZeroUsize) -> Self {
        Self {
            summarizer,
            max_concurrency,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 候補を入力順のまま要約する。
    pub async fn summarize_all(
        &self,
        run: &RunContext,
        candidates: Vec<Article>,
    ) -> (Vec<Article>, SummaryStats) {
        let total = candidates.len();
        debug!(
            run_id = %run.run_id(),
            provider = self.summarizer.provider(),
            candidates = total,
            max_concurrency = self.max_concurrency.get(),
            "summarizing candidates"
        );

        let summarized: Vec<Article> = stream::iter(
            candidates
                .into_iter()
                .map(|article| self.summarize_one(article)),
        )
        .buffered(self.max_concurrency.get())
        .collect()
        .await;

        let generated = summarized
            .iter()
            .filter(|a| a.summary_origin() == Some(SummaryOrigin::Generated))
            .count();
        let stats = SummaryStats {
            generated,
            fallback: summarized.len() - generated,
        };

        info!(
            run_id = %run.run_id(),
            generated = stats.generated,
            fallback = stats.fallback,
            "summarization finished"
        );
        (summarized, stats)
    }

    async fn summarize_one(&self, mut article: Article) -> Article {
        let started = Instant::now();
        let result = self
            .summarizer
            .summarize(article.title(), article.raw_summary())
            .await
            .and_then(|text| {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    Err(SummarizeError::EmptyResponse)
                } else {
                    Ok(trimmed.to_string())
                }
            });

        if let Some(metrics) = &self.metrics {
            metrics
                .summarize_duration
                .observe(started.elapsed().as_secs_f64());
        }

        match result {
            Ok(summary) => {
                article.set_generated_summary(summary);
                if let Some(metrics) = &self.metrics {
                    metrics.summaries_generated.inc();
                }
            }
            Err(error) => {
                warn!(
                    provider = self.summarizer.provider(),
                    url = %article.url(),
                    error = %error,
                    "summarization failed; using feed summary"
                );
                article.set_fallback_summary();
                if let Some(metrics) = &self.metrics {
                    metrics.summaries_fallback.inc();
                }
            }
        }
        article
    }
}
