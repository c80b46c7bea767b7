//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field

use crate::http;
use async_trait::async_trait;
use meshbrain_core::error::ProviderError;
use meshbrain_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.7,
            client: http::build_client(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    fn build_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [AnthropicMessage {
                role: "user".into(),
                content: request.prompt.clone(),
            }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            body["system"] = serde_json::json!(system);
        }
        body
    }

    /// Join the text blocks of a Messages API response.
    fn to_generation(resp: AnthropicResponse) -> Generation {
        let text = resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        Generation {
            text,
            model: resp.model,
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
        }
    }
}

#[async_trait]
impl meshbrain_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(request);

        debug!(provider = %self.name, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(http::send_error)?;

        if !response.status().is_success() {
            return Err(http::status_error(&self.name, response).await);
        }

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;

        Ok(Self::to_generation(api_resp))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(!self.api_key.is_empty())
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::post};
    use meshbrain_core::{ErrorKind, Provider};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);

        let provider = provider
            .with_name("claude")
            .with_base_url("http://localhost:8080/");
        assert_eq!(provider.name(), "claude");
        assert_eq!(provider.base_url, "http://localhost:8080");
    }

    #[test]
    fn system_prompt_is_top_level() {
        let provider = AnthropicProvider::new("k");
        let body = provider.build_body(&GenerationRequest::new("hi").with_system_prompt("Be brief"));
        assert_eq!(body["system"], "Be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn parse_text_blocks() {
        let json = r#"{
            "id": "msg_1",
            "model": "claude-sonnet-4",
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Hello"},
                {"type": "text", "text": "there"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 4}
        }"#;
        let resp: AnthropicResponse = serde_json::from_str(json).unwrap();
        let generation = AnthropicProvider::to_generation(resp);
        assert_eq!(generation.text, "Hello\nthere");
        assert_eq!(generation.usage.unwrap().total_tokens, 14);
    }

    #[tokio::test]
    async fn generate_against_local_server() {
        let router = Router::new().route(
            "/v1/messages",
            post(|headers: HeaderMap| async move {
                assert_eq!(headers["x-api-key"], "sk-ant");
                assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
                Json(serde_json::json!({
                    "model": "claude-test",
                    "content": [{"type": "text", "text": "hi from claude"}],
                    "usage": {"input_tokens": 2, "output_tokens": 3}
                }))
            }),
        );
        let base = serve(router).await;
        let provider = AnthropicProvider::new("sk-ant").with_base_url(base);

        let generation = provider.generate(&GenerationRequest::new("hi")).await.unwrap();
        assert_eq!(generation.text, "hi from claude");
        assert_eq!(generation.model, "claude-test");
    }

    #[tokio::test]
    async fn auth_failure_is_classified() {
        let router = Router::new().route(
            "/v1/messages",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = serve(router).await;
        let provider = AnthropicProvider::new("wrong").with_base_url(base);

        let err = provider.generate(&GenerationRequest::new("hi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn health_requires_key() {
        assert!(AnthropicProvider::new("k").health_check().await.unwrap());
        assert!(!AnthropicProvider::new("").health_check().await.unwrap());
    }
}
