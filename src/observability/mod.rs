pub mod metrics;
pub mod tracing;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};

use self::metrics::Metrics;

/// Telemetry（メトリクスとトレーシング）を管理する構造体。
#[derive(Debug, Clone)]
pub struct Telemetry {
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
}

impl Telemetry {
    /// トレーシングを初期化し、専用レジストリにメトリクスを登録する。
    ///
    /// # Errors
    /// サブスクライバの初期化またはメトリクス登録に失敗した場合はエラーを返す。
    pub fn new(debug: bool) -> Result<Self> {
        tracing::init(debug)?;
        Self::without_tracing()
    }

    /// トレーシングを初期化せずにメトリクスだけを用意する。テストで使う。
    ///
    /// # Errors
    /// メトリクス登録に失敗した場合はエラーを返す。
    pub fn without_tracing() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(
            Metrics::new(Arc::clone(&registry)).context("failed to register digest metrics")?,
        );
        Ok(Self { registry, metrics })
    }

    /// パイプラインの各ステージに渡すメトリクスハンドル。
    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Prometheusテキスト形式でメトリクスをレンダリングする。
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// node-exporter の textfile コレクタ向けにメトリクスを書き出す。
    ///
    /// # Errors
    /// ディレクトリ作成や書き込みに失敗した場合はエラーを返す。
    pub async fn write_metrics(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, self.render_prometheus())
            .await
            .with_context(|| format!("failed to write metrics to {}", path.display()))
    }

    /// 実行終了時に呼ぶ。未送信のスパンをフラッシュする。
    pub fn shutdown(&self) {
        tracing::shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_metrics_use_digest_prefix() {
        let telemetry = Telemetry::without_tracing().unwrap();
        telemetry.metrics().articles_fetched.inc_by(3.0);

        let rendered = telemetry.render_prometheus();
        assert!(rendered.contains("digest_articles_fetched_total 3"));
    }

    #[tokio::test]
    async fn write_metrics_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("textfile").join("digest.prom");
        let telemetry = Telemetry::without_tracing().unwrap();

        telemetry.write_metrics(&path).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("digest_runs_completed_total"));
    }
}
