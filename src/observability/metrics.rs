/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Histogram, Registry, register_counter_with_registry,
    register_histogram_with_registry,
};
use std::sync::Arc;

/// ダイジェスト実行のメトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub articles_fetched: Counter,
    pub articles_stale: Counter,
    pub articles_excluded: Counter,
    pub articles_below_min_score: Counter,
    pub candidates_selected: Counter,
    pub summaries_generated: Counter,
    pub summaries_fallback: Counter,
    pub digest_articles: Counter,
    pub delivery_units: Counter,
    pub stats_records_written: Counter,
    pub stats_write_failures: Counter,
    pub runs_completed: Counter,
    pub runs_empty: Counter,
    pub runs_unmatched: Counter,

    // ヒストグラム
    pub summarize_duration: Histogram,
    pub run_duration: Histogram,
}

impl Metrics {
    /// 指定したレジストリにメトリクスを登録する。
    ///
    /// # Errors
    /// 同名のメトリクスが既に登録されている場合はエラーを返す。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            articles_fetched: register_counter_with_registry!(
                "digest_articles_fetched_total",
                "Total number of articles handed over by the feed collaborator",
                registry
            )?,
            articles_stale: register_counter_with_registry!(
                "digest_articles_stale_total",
                "Articles dropped by the recency filter",
                registry
            )?,
            articles_excluded: register_counter_with_registry!(
                "digest_articles_excluded_total",
                "Articles dropped by exclusion keywords",
                registry
            )?,
            articles_below_min_score: register_counter_with_registry!(
                "digest_articles_below_min_score_total",
                "Articles scoring below the configured minimum",
                registry
            )?,
            candidates_selected: register_counter_with_registry!(
                "digest_candidates_selected_total",
                "Articles kept in the candidate buffer",
                registry
            )?,
            summaries_generated: register_counter_with_registry!(
                "digest_summaries_generated_total",
                "Summaries produced by the summarization provider",
                registry
            )?,
            summaries_fallback: register_counter_with_registry!(
                "digest_summaries_fallback_total",
                "Summaries that fell back to the feed text",
                registry
            )?,
            digest_articles: register_counter_with_registry!(
                "digest_articles_ranked_total",
                "Articles placed into a digest tier",
                registry
            )?,
            delivery_units: register_counter_with_registry!(
                "digest_delivery_units_total",
                "Delivery units produced by tier packing",
                registry
            )?,
            stats_records_written: register_counter_with_registry!(
                "digest_stats_records_written_total",
                "Stats records appended to the stats log",
                registry
            )?,
            stats_write_failures: register_counter_with_registry!(
                "digest_stats_write_failures_total",
                "Failed attempts to append to the stats log",
                registry
            )?,
            runs_completed: register_counter_with_registry!(
                "digest_runs_completed_total",
                "Runs that delivered at least one article",
                registry
            )?,
            runs_empty: register_counter_with_registry!(
                "digest_runs_empty_total",
                "Runs that finished with nothing to deliver",
                registry
            )?,
            runs_unmatched: register_counter_with_registry!(
                "digest_runs_unmatched_total",
                "Runs that delivered articles none of which scored above zero",
                registry
            )?,
            summarize_duration: register_histogram_with_registry!(
                "digest_summarize_duration_seconds",
                "Duration of a single summarization call including retries",
                registry
            )?,
            run_duration: register_histogram_with_registry!(
                "digest_run_duration_seconds",
                "Duration of a full digest run",
                registry
            )?,
        })
    }
}
