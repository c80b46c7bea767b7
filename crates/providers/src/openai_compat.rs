//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, any endpoint exposing
//! `/chat/completions`, and Azure OpenAI deployments (which speak the same
//! body format behind a different URL scheme and `api-key` header).

use crate::http;
use async_trait::async_trait;
use meshbrain_core::error::ProviderError;
use meshbrain_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";

/// How requests are addressed and authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    /// `{base_url}/chat/completions`, `Authorization: Bearer`
    Standard { base_url: String },
    /// `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=`, `api-key`
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

/// An OpenAI-compatible generation provider.
pub struct OpenAiCompatProvider {
    name: String,
    endpoint: Endpoint,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider for a standard `/chat/completions` endpoint.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: Endpoint::Standard {
                base_url: base_url.into().trim_end_matches('/').to_string(),
            },
            api_key: api_key.into(),
            model: "gpt-4o-mini".into(),
            max_tokens: 2000,
            temperature: 0.7,
            client: http::build_client(),
        }
    }

    /// Create an Azure OpenAI provider for one deployment.
    pub fn azure(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let deployment = deployment.into();
        Self {
            name: name.into(),
            endpoint: Endpoint::Azure {
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                deployment: deployment.clone(),
                api_version: DEFAULT_AZURE_API_VERSION.into(),
            },
            api_key: api_key.into(),
            model: deployment,
            max_tokens: 2000,
            temperature: 0.7,
            client: http::build_client(),
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
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

    /// Override the Azure API version. No effect on standard endpoints.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        if let Endpoint::Azure { api_version, .. } = &mut self.endpoint {
            *api_version = version.into();
        }
        self
    }

    fn url(&self, path: &str) -> String {
        match &self.endpoint {
            Endpoint::Standard { base_url } => format!("{base_url}/{path}"),
            Endpoint::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{endpoint}/openai/deployments/{deployment}/{path}?api-version={api_version}"
            ),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.endpoint {
            Endpoint::Standard { .. } => {
                builder.header("Authorization", format!("Bearer {}", self.api_key))
            }
            Endpoint::Azure { .. } => builder.header("api-key", &self.api_key),
        }
    }

    /// System instruction (if any) followed by the prompt as the user turn.
    fn to_api_messages(request: &GenerationRequest) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(ApiMessage {
                role: "system".into(),
                content: Some(system.to_string()),
            });
        }
        messages.push(ApiMessage {
            role: "user".into(),
            content: Some(request.prompt.clone()),
        });
        messages
    }

    fn build_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": Self::to_api_messages(request),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        });
        // Azure routes by deployment in the URL
        if matches!(self.endpoint, Endpoint::Standard { .. }) {
            body["model"] = serde_json::json!(self.model);
        }
        body
    }

    fn parse_response(api_response: ApiResponse) -> Result<Generation, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(Generation {
            text: choice.message.content.unwrap_or_default(),
            model: api_response.model,
            usage,
        })
    }
}

#[async_trait]
impl meshbrain_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, ProviderError> {
        let url = self.url("chat/completions");
        let body = self.build_body(request);

        debug!(provider = %self.name, model = %self.model, "Sending completion request");

        let response = self
            .authorize(self.client.post(&url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(http::send_error)?;

        if !response.status().is_success() {
            return Err(http::status_error(&self.name, response).await);
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {e}"))
        })?;

        Self::parse_response(api_response)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        if self.api_key.is_empty() {
            return Ok(false);
        }
        // Azure has no cheap deployment-scoped listing; configured means healthy
        if matches!(self.endpoint, Endpoint::Azure { .. }) {
            return Ok(true);
        }
        let response = self
            .authorize(self.client.get(self.url("models")))
            .send()
            .await
            .map_err(http::send_error)?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
