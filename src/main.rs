use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};

use rss_digest::{
    clients::ProviderSummarizer,
    config::Config,
    observability::Telemetry,
    pipeline::{
        DigestPipeline, RunContext, RunReport,
        deliver::{DryRunDelivery, OutboxDelivery},
        fetch::SnapshotFetchStage,
    },
};

/// Ranks the day's feed articles, summarizes them and writes a tiered digest.
#[derive(Debug, Parser)]
#[command(name = "rss-digest", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(long, env = "DIGEST_CONFIG", default_value = "config.yml")]
    config: PathBuf,

    /// JSON snapshot of fetched articles
    #[arg(long, env = "DIGEST_ARTICLES_PATH")]
    articles: PathBuf,

    /// Where the assembled digest is written
    #[arg(long, env = "DIGEST_OUTBOX_PATH", default_value = "out/digest.json")]
    outbox: PathBuf,

    /// Log the ranked digest instead of delivering it; skips the stats log
    #[arg(long)]
    dry_run: bool,

    /// Debug-level logging
    #[arg(long)]
    debug: bool,

    /// Write Prometheus metrics in textfile format at the end of the run
    #[arg(long, env = "DIGEST_METRICS_FILE")]
    metrics_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = Telemetry::new(cli.debug).context("failed to initialize telemetry")?;

    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    let result = run(&cli, &telemetry).await;

    if let Some(path) = &cli.metrics_file {
        if let Err(error) = telemetry.write_metrics(path).await {
            warn!(error = %format!("{error:#}"), "failed to write metrics file");
        }
    }
    telemetry.shutdown();

    match result {
        Ok(report) => {
            info!(
                run_id = %report.run_id,
                status = ?report.status,
                discarded = report.discarded,
                "done"
            );
            Ok(())
        }
        Err(error) => {
            error!(error = %format!("{error:#}"), "digest run failed");
            Err(error)
        }
    }
}

async fn run(cli: &Cli, telemetry: &Telemetry) -> anyhow::Result<RunReport> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    info!(
        provider = %config.summarizer().provider,
        max_age_hours = config.max_age_hours(),
        digest_size = config.tier_plan().total(),
        candidate_buffer = config.candidate_buffer_size(),
        dry_run = cli.dry_run,
        "configuration loaded"
    );

    let summarizer = ProviderSummarizer::from_settings(config.summarizer())
        .context("failed to build summarization client")?;

    let mut builder = DigestPipeline::builder(&config)?
        .with_fetch_stage(Arc::new(SnapshotFetchStage::new(&cli.articles)))
        .with_summarizer(Arc::new(summarizer))
        .with_metrics(telemetry.metrics());
    builder = if cli.dry_run {
        builder
            .with_delivery_stage(Arc::new(DryRunDelivery))
            .without_stats()
    } else {
        builder.with_delivery_stage(Arc::new(OutboxDelivery::new(
            &cli.outbox,
            config.digest_title(),
        )))
    };
    let pipeline = builder.build()?;

    let run = RunContext::new(Utc::now());
    info!(run_id = %run.run_id(), "digest run started");
    pipeline.execute(&run).await
}
