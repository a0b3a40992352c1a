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

const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API クライアント。
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    retry: RetryConfig,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    /// # Errors
    /// ベースURLが不正、またはHTTPクライアントの構築に失敗した場合はエラーを返す。
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build anthropic client")?;
        let endpoint = parse_base_url(base_url)?
            .join("v1/messages")
            .context("failed to build anthropic messages URL")?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            model: model.into(),
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
        with_retry(&self.retry, ProviderKind::Anthropic, || self.send(&prompt)).await
    }

    async fn send(&self, prompt: &str) -> Result<String, SummarizeError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_SUMMARY_TOKENS,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.model, "sending anthropic messages request");
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SummarizeError::from_response(response).await);
        }

        let body = response.text().await?;
        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|error| SummarizeError::Malformed(error.to_string()))?;

        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");
        non_blank(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AnthropicClient {
        AnthropicClient::new(
            &server.uri(),
            "sk-test",
            "claude-test",
            Duration::from_secs(5),
            RetryConfig::new(3, 1, 5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn summarize_returns_text_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-test",
                "max_tokens": 200
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "  A short summary.  "}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let summary = client(&server).summarize("Title", "raw").await.unwrap();
        assert_eq!(summary, "A short summary.");
    }

    #[tokio::test]
    async fn summarize_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "Recovered."}]
            })))
            .mount(&server)
            .await;

        let summary = client(&server).summarize("Title", "raw").await.unwrap();
        assert_eq!(summary, "Recovered.");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .expect(1)
            .mount(&server)
            .await;

        let error = client(&server).summarize("Title", "raw").await.unwrap_err();
        assert!(matches!(
            error,
            SummarizeError::Status { status, ref body }
                if status == reqwest::StatusCode::UNAUTHORIZED && body == "invalid x-api-key"
        ));
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"content": []})),
            )
            .mount(&server)
            .await;

        let error = client(&server).summarize("Title", "raw").await.unwrap_err();
        assert!(matches!(error, SummarizeError::EmptyResponse));
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let error = client(&server).summarize("Title", "raw").await.unwrap_err();
        assert!(matches!(error, SummarizeError::Malformed(_)));
    }
}
