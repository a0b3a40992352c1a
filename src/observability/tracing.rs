use anyhow::{Context, Error, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracer, SdkTracerProvider},
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "rss-digest";

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Tracing サブスクライバを一度だけ初期化する。
///
/// `debug` が真のときは RUST_LOG を無視して debug レベルで出力する。
/// OTEL_EXPORTER_OTLP_ENDPOINT が設定されている場合は OTLP へスパンを送る。
/// エクスポーターの構築に失敗した場合は通常のログ出力のみで続行する。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init(debug: bool) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let (tracer, export) = match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            Ok(endpoint) => match init_tracer(&endpoint) {
                Ok(tracer) => (Some(tracer), OtelExport::Enabled(endpoint)),
                Err(error) => (None, OtelExport::Failed(error)),
            },
            Err(_) => (None, OtelExport::Disabled),
        };

        tracing_subscriber::registry()
            .with(env_filter(debug))
            .with(tracing_subscriber::fmt::layer().with_target(false).json())
            .with(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)))
            .try_init()
            .map_err(|e| Error::msg(e.to_string()))?;

        match export {
            OtelExport::Enabled(endpoint) => {
                info!(otel_enabled = true, endpoint = %endpoint, "tracing initialized");
            }
            OtelExport::Failed(error) => info!(
                otel_enabled = false,
                error = %error,
                "tracing initialized without opentelemetry (exporter init failed)"
            ),
            OtelExport::Disabled => info!(otel_enabled = false, "tracing initialized"),
        }

        Ok::<(), Error>(())
    })?;
    Ok(())
}

enum OtelExport {
    Enabled(String),
    Failed(Error),
    Disabled,
}

fn env_filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// OTLPエクスポーター経由でOpenTelemetryトレーサーを初期化する。
///
/// サンプリング比率はOTEL_SAMPLING_RATIO環境変数で制御（デフォルト1.0 = 全トレース）。
fn init_tracer(endpoint: &str) -> Result<SdkTracer> {
    let sampling_ratio = std::env::var("OTEL_SAMPLING_RATIO")
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(1.0);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(SERVICE_NAME);

    global::set_tracer_provider(tracer_provider.clone());
    let _ = TRACER_PROVIDER.set(tracer_provider);

    Ok(tracer)
}

/// 保持しているトレーサープロバイダを停止し、未送信のスパンをフラッシュする。
pub fn shutdown() {
    let Some(provider) = TRACER_PROVIDER.get() else {
        return;
    };
    if let Err(error) = provider.shutdown() {
        warn!(error = %error, "failed to shut down tracer provider");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_overrides_rust_log() {
        let filter = temp_env::with_var("RUST_LOG", Some("warn"), || env_filter(true));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn rust_log_is_used_without_debug_flag() {
        let filter = temp_env::with_var("RUST_LOG", Some("rss_digest=trace"), || env_filter(false));
        assert_eq!(filter.to_string(), "rss_digest=trace");
    }

    #[test]
    fn info_is_the_default_level() {
        let filter = temp_env::with_var_unset("RUST_LOG", || env_filter(false));
        assert_eq!(filter.to_string(), "info");
    }
}
