//! Provider trait: the abstraction over text-generation backends.
//!
//! A Provider takes a fully built prompt (history already rendered into it)
//! and returns generated text. The router tries providers in priority
//! order and records one [`ProviderResult`] per attempt.
//!
//! Implementations: OpenAI-compatible (incl. Azure OpenAI), Anthropic.

use crate::error::{ErrorKind, ProviderError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input to a single generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The prompt sent as the user message
    pub prompt: String,

    /// Optional system instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// The raw inbound message the prompt was built around
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The inbound message, or the prompt itself when none was attached.
    pub fn user_message(&self) -> &str {
        self.message.as_deref().unwrap_or(&self.prompt)
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A successful generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: String::new(),
            usage: None,
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failed { kind: ErrorKind },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }
}

/// The record of a single attempt against one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: String,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    /// Zero-based position in the priority order
    pub attempt_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProviderResult {
    pub fn success(provider: impl Into<String>, attempt_index: usize, latency_ms: u64) -> Self {
        Self {
            provider: provider.into(),
            outcome: AttemptOutcome::Success,
            latency_ms,
            attempt_index,
            detail: None,
        }
    }

    pub fn failure(
        provider: impl Into<String>,
        attempt_index: usize,
        latency_ms: u64,
        error: &ProviderError,
    ) -> Self {
        Self {
            provider: provider.into(),
            outcome: AttemptOutcome::Failed { kind: error.kind() },
            latency_ms,
            attempt_index,
            detail: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.outcome {
            AttemptOutcome::Success => None,
            AttemptOutcome::Failed { kind } => Some(kind),
        }
    }
}

/// Point-in-time view of a provider's rolling health counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHealthSnapshot {
    pub provider: String,
    pub consecutive_failures: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
}

/// The core Provider trait.
///
/// The router calls `generate()` under its own deadline; implementations
/// should not apply their own retries.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "azure", "claude").
    fn name(&self) -> &str;

    /// Generate a completion for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, ProviderError>;

    /// Health check: is the provider configured and reachable?
    ///
    /// Called on demand by deep health reports, never on the request path.
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder() {
        let req = GenerationRequest::new("What's the weather?")
            .with_system_prompt("You are a helpful assistant.");
        assert_eq!(req.prompt, "What's the weather?");
        assert_eq!(req.system_prompt.as_deref(), Some("You are a helpful assistant."));
        assert_eq!(req.user_message(), "What's the weather?");

        let req = req.with_message("weather?");
        assert_eq!(req.user_message(), "weather?");
    }

    #[test]
    fn failure_result_carries_kind_and_detail() {
        let err = ProviderError::Timeout("after 2s".into());
        let result = ProviderResult::failure("azure", 0, 2000, &err);
        assert!(!result.is_success());
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert!(result.detail.unwrap().contains("after 2s"));
    }

    #[test]
    fn outcome_serializes_tagged() {
        let ok = serde_json::to_value(AttemptOutcome::Success).unwrap();
        assert_eq!(ok["status"], "success");

        let failed = serde_json::to_value(AttemptOutcome::Failed {
            kind: ErrorKind::RateLimit,
        })
        .unwrap();
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["kind"], "rate_limit");
    }
}
