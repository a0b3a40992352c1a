use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::util::retry::RetryConfig;

use super::summarizer::{
    MAX_SUMMARY_TOKENS, ProviderKind, SummarizeError, build_prompt, non_blank, parse_base_url,
    with_retry,
};

/// Gemini `generateContent` API クライアント。
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    retry: RetryConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    /// # Errors
    /// ベースURLが不正、またはHTTPクライアントの構築に失敗した場合はエラーを返す。
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let model = model.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build gemini client")?;
        let endpoint = parse_base_url(base_url)?
            .join(&format!("v1beta/models/{model}:generateContent"))
            .context("failed to build gemini generateContent URL")?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            model,
            retry,
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    pub(crate) async fn summarize(
        &self,
        title: &str,
        raw_summary: &str,
    ) -> Result<String, SummarizeError> {
        let prompt = build_prompt(title, raw_summary);
        with_retry(&self.retry, ProviderKind::Gemini, || self.send(&prompt)).await
    }

    async fn send(&self, prompt: &str) -> Result<String, SummarizeError> {
        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: MAX_SUMMARY_TOKENS,
            },
        };

        debug!(model = %self.model, "sending gemini generateContent request");
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SummarizeError::from_response(response).await);
        }

        let body = response.text().await?;
        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|error| SummarizeError::Malformed(error.to_string()))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        non_blank(text)
    }
}
