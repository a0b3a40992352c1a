//! 要約プロバイダの共通インターフェース。
//!
//! プロバイダは設定で一つだけ選ばれ、実行中は切り替わらない。
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::config::{ConfigError, SummarizerSettings};
use crate::util::retry::{RetryConfig, is_retryable_error, is_retryable_status};
use crate::util::text::strip_html;

use super::{AnthropicClient, GeminiClient};

/// 要約の最大出力トークン数。
pub const MAX_SUMMARY_TOKENS: u32 = 200;

const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Gemini,
}

impl ProviderKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// 認証情報を読む環境変数名。
    #[must_use]
    pub const fn credential_env(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        }
    }

    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-sonnet-4-20250514",
            ProviderKind::Gemini => "gemini-2.0-flash",
        }
    }

    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "https://api.anthropic.com/",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "gemini" => Ok(ProviderKind::Gemini),
            _ => Err(ConfigError::UnsupportedProvider(value.trim().to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("summarization request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("summarization provider returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("summarization provider returned an empty summary")]
    EmptyResponse,
    #[error("malformed summarization response: {0}")]
    Malformed(String),
}

impl SummarizeError {
    /// タイムアウト・接続エラー・5xx・429 のみ再試行する。
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SummarizeError::Request(error) => is_retryable_error(error),
            SummarizeError::Status { status, .. } => is_retryable_status(*status),
            SummarizeError::EmptyResponse | SummarizeError::Malformed(_) => false,
        }
    }

    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        SummarizeError::Status {
            status,
            body: body.chars().take(ERROR_BODY_LIMIT).collect(),
        }
    }
}

/// 記事タイトルと元の要約から短い要約を生成する。
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// ログとメトリクスに使うプロバイダ名。
    fn provider(&self) -> &str;

    async fn summarize(&self, title: &str, raw_summary: &str) -> Result<String, SummarizeError>;
}

/// 設定で選ばれたプロバイダのクライアント。
#[derive(Debug, Clone)]
pub enum ProviderSummarizer {
    Anthropic(AnthropicClient),
    Gemini(GeminiClient),
}

impl ProviderSummarizer {
    /// # Errors
    /// HTTPクライアントの構築やベースURLの解析に失敗した場合はエラーを返す。
    pub fn from_settings(settings: &SummarizerSettings) -> Result<Self> {
        let provider = settings.provider;
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        let base_url = settings
            .base_url
            .as_deref()
            .unwrap_or(provider.default_base_url());

        Ok(match provider {
            ProviderKind::Anthropic => ProviderSummarizer::Anthropic(AnthropicClient::new(
                base_url,
                settings.api_key.clone(),
                model,
                settings.timeout,
                settings.retry,
            )?),
            ProviderKind::Gemini => ProviderSummarizer::Gemini(GeminiClient::new(
                base_url,
                settings.api_key.clone(),
                model,
                settings.timeout,
                settings.retry,
            )?),
        })
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    fn provider(&self) -> &str {
        match self {
            ProviderSummarizer::Anthropic(_) => ProviderKind::Anthropic.as_str(),
            ProviderSummarizer::Gemini(_) => ProviderKind::Gemini.as_str(),
        }
    }

    async fn summarize(&self, title: &str, raw_summary: &str) -> Result<String, SummarizeError> {
        match self {
            ProviderSummarizer::Anthropic(client) => client.summarize(title, raw_summary).await,
            ProviderSummarizer::Gemini(client) => client.summarize(title, raw_summary).await,
        }
    }
}

/// 要約依頼のプロンプトを組み立てる。元の要約のHTMLタグは除去する。
pub(crate) fn build_prompt(title: &str, raw_summary: &str) -> String {
    let description = strip_html(raw_summary);
    format!(
        "Here is an article from an RSS feed.\n\n\
         Title: {title}\n\n\
         Original description: {description}\n\n\
         Write a clear 2-3 sentence summary covering what the article is about \
         and why it might be interesting. Start directly with the content, \
         without any preamble such as \"This article discusses\"."
    )
}

/// ベースURLの末尾にスラッシュを補い、相対パスの結合で最後のセグメントが失われないようにする。
pub(crate) fn parse_base_url(raw: &str) -> Result<Url> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|error| anyhow::anyhow!("invalid base URL {raw:?}: {error}"))
}

pub(crate) fn non_blank(text: String) -> Result<String, SummarizeError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(SummarizeError::EmptyResponse)
    } else {
        Ok(trimmed.to_string())
    }
}

/// 再試行可能なエラーの間だけ `call` を繰り返す。
pub(crate) async fn with_retry<F, Fut>(
    retry: &RetryConfig,
    provider: ProviderKind,
    mut call: F,
) -> Result<String, SummarizeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, SummarizeError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(text) => return Ok(text),
            Err(error) => {
                attempt += 1;
                if !error.is_retryable() || !retry.can_retry(attempt) {
                    return Err(error);
                }
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    provider = %provider,
                    attempt,
                    ?delay,
                    error = %error,
                    "summarization call failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
