//! Provider router: ordered fallback chain with per-provider timeouts.
//!
//! Providers are tried strictly in priority order, each at most once per
//! request, under its own deadline. The first non-empty completion wins.
//! When every provider fails the router answers with the static fallback,
//! so `route` always produces text.
//!
//! `route_until` additionally honors a request-wide deadline: the provider
//! still running when it expires is recorded as a timeout and the rest of
//! the chain is skipped.

use crate::anthropic::AnthropicProvider;
use crate::fallback::{STATIC_PROVIDER, StaticFallback};
use crate::health::ProviderHealth;
use crate::openai_compat::OpenAiCompatProvider;
use chrono::Utc;
use meshbrain_config::{AppConfig, ProviderConfig, ProviderKind};
use meshbrain_core::error::{ProviderError, RequestError};
use meshbrain_core::provider::{
    GenerationRequest, Provider, ProviderHealthSnapshot, ProviderResult, Usage,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A single entry in the priority chain.
struct RouterEntry {
    provider: Arc<dyn Provider>,
    timeout: Duration,
    health: ProviderHealth,
}

/// The result of routing one request.
#[derive(Debug, Clone, Serialize)]
pub struct RouteOutcome {
    pub text: String,
    /// The provider that produced `text`, or `static`
    pub provider: String,
    /// One record per attempted provider, in order
    pub attempts: Vec<ProviderResult>,
    pub latency_ms: u64,
    /// Token usage reported by the provider that answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// The request deadline cut the chain short
    pub deadline_expired: bool,
}

impl RouteOutcome {
    pub fn used_fallback(&self) -> bool {
        self.provider == STATIC_PROVIDER
    }
}

/// Result of asking one provider whether it is configured and reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCheck {
    pub provider: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Routes generation requests across an ordered list of providers.
pub struct ProviderRouter {
    chain: Vec<RouterEntry>,
    fallback: StaticFallback,
}

/// Builder for [`ProviderRouter`]; rejects an empty chain.
pub struct ProviderRouterBuilder {
    chain: Vec<RouterEntry>,
    fallback: StaticFallback,
}

impl ProviderRouterBuilder {
    /// Append a provider with its per-attempt deadline.
    pub fn add(mut self, provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        self.chain.push(RouterEntry {
            provider,
            timeout,
            health: ProviderHealth::new(),
        });
        self
    }

    pub fn fallback(mut self, fallback: StaticFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn build(self) -> Result<ProviderRouter, ProviderError> {
        if self.chain.is_empty() {
            return Err(ProviderError::NotConfigured(
                "at least one provider is required".into(),
            ));
        }
        Ok(ProviderRouter {
            chain: self.chain,
            fallback: self.fallback,
        })
    }
}

impl ProviderRouter {
    pub fn builder() -> ProviderRouterBuilder {
        ProviderRouterBuilder {
            chain: Vec::new(),
            fallback: StaticFallback::default(),
        }
    }

    /// Number of providers in the chain.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Provider names in priority order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.chain.iter().map(|e| e.provider.name()).collect()
    }

    /// The canned reply that would be used for `message` if all providers failed.
    pub fn static_reply(&self, message: &str) -> &str {
        self.fallback.reply_for(message)
    }

    /// Current health counters, in priority order.
    pub fn health(&self) -> Vec<ProviderHealthSnapshot> {
        self.chain
            .iter()
            .map(|e| e.health.snapshot(e.provider.name()))
            .collect()
    }

    /// Run every provider's health check in priority order, each under
    /// that provider's timeout. Nothing here touches the health counters.
    pub async fn check_providers(&self) -> Vec<ProviderCheck> {
        let mut checks = Vec::with_capacity(self.chain.len());
        for entry in &self.chain {
            let provider = entry.provider.name();
            let (reachable, error) =
                match tokio::time::timeout(entry.timeout, entry.provider.health_check()).await {
                    Ok(Ok(true)) => (true, None),
                    Ok(Ok(false)) => (false, Some("health check failed".to_string())),
                    Ok(Err(e)) => (false, Some(e.to_string())),
                    Err(_) => (
                        false,
                        Some(format!("no answer within {}ms", entry.timeout.as_millis())),
                    ),
                };
            debug!(provider = %provider, reachable, "Provider health check");
            checks.push(ProviderCheck {
                provider: provider.to_string(),
                reachable,
                error,
            });
        }
        checks
    }

    /// Try each provider in order until one produces a non-empty completion.
    pub async fn route(&self, request: &GenerationRequest) -> Result<RouteOutcome, RequestError> {
        self.route_inner(request, None).await
    }

    /// Like [`route`](Self::route), but no attempt runs past `deadline`.
    pub async fn route_until(
        &self,
        request: &GenerationRequest,
        deadline: Instant,
    ) -> Result<RouteOutcome, RequestError> {
        self.route_inner(request, Some(deadline)).await
    }

    /// The outcome used when the deadline expires before any provider ran.
    pub fn deadline_outcome(&self, message: &str) -> RouteOutcome {
        RouteOutcome {
            text: self.fallback.reply_for(message).to_string(),
            provider: STATIC_PROVIDER.to_string(),
            attempts: Vec::new(),
            latency_ms: 0,
            usage: None,
            deadline_expired: true,
        }
    }

    async fn route_inner(
        &self,
        request: &GenerationRequest,
        deadline: Option<Instant>,
    ) -> Result<RouteOutcome, RequestError> {
        if request.prompt.trim().is_empty() {
            return Err(RequestError::EmptyMessage);
        }

        let started = Instant::now();
        let mut attempts = Vec::with_capacity(self.chain.len());
        let mut deadline_expired = false;

        for (i, entry) in self.chain.iter().enumerate() {
            let provider_name = entry.provider.name();

            // Cap the attempt at what is left of the request deadline
            let mut budget = entry.timeout;
            let mut capped = false;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    deadline_expired = true;
                    break;
                }
                if remaining < budget {
                    budget = remaining;
                    capped = true;
                }
            }

            info!(
                provider = %provider_name,
                attempt = i + 1,
                total = self.chain.len(),
                "Trying provider"
            );

            let attempt_started = Instant::now();
            let result = match tokio::time::timeout(budget, entry.provider.generate(request)).await {
                Ok(Ok(generation)) if generation.text.trim().is_empty() => Err(
                    ProviderError::InvalidResponse("empty completion".into()),
                ),
                Ok(Ok(generation)) => Ok(generation),
                Ok(Err(e)) => Err(e),
                Err(_) if capped => {
                    deadline_expired = true;
                    Err(ProviderError::Timeout(format!(
                        "Provider '{provider_name}' still running when the request deadline expired"
                    )))
                }
                Err(_) => Err(ProviderError::Timeout(format!(
                    "Provider '{}' timed out after {}ms",
                    provider_name,
                    entry.timeout.as_millis()
                ))),
            };
            let latency_ms = elapsed_ms(attempt_started);

            match result {
                Ok(generation) => {
                    entry.health.record_success();
                    attempts.push(ProviderResult::success(provider_name, i, latency_ms));
                    info!(
                        provider = %provider_name,
                        model = %generation.model,
                        latency_ms,
                        prompt_tokens = generation.usage.map(|u| u.prompt_tokens),
                        completion_tokens = generation.usage.map(|u| u.completion_tokens),
                        "Provider succeeded"
                    );
                    return Ok(RouteOutcome {
                        text: generation.text,
                        provider: provider_name.to_string(),
                        attempts,
                        latency_ms: elapsed_ms(started),
                        usage: generation.usage,
                        deadline_expired: false,
                    });
                }
                Err(e) => {
                    entry.health.record_failure(e.kind(), Utc::now());
                    warn!(
                        provider = %provider_name,
                        kind = %e.kind(),
                        error = %e,
                        latency_ms,
                        "Provider failed, trying next"
                    );
                    attempts.push(ProviderResult::failure(provider_name, i, latency_ms, &e));
                    if deadline_expired {
                        break;
                    }
                }
            }
        }

        if deadline_expired {
            warn!(
                attempts = attempts.len(),
                "Request deadline expired, using static response"
            );
        } else {
            warn!(
                attempts = attempts.len(),
                "All providers failed, using static response"
            );
        }
        Ok(RouteOutcome {
            text: self.fallback.reply_for(request.user_message()).to_string(),
            provider: STATIC_PROVIDER.to_string(),
            attempts,
            latency_ms: elapsed_ms(started),
            usage: None,
            deadline_expired,
        })
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Build the router from configuration.
///
/// Providers without a usable API key are skipped with a warning, except
/// OpenAI-compatible entries with an explicit URL (local servers such as
/// Ollama need no key). Fails when nothing usable remains.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ProviderError> {
    let orchestrator = &config.orchestrator;
    let mut builder = ProviderRouter::builder().fallback(
        StaticFallback::new(&orchestrator.static_response)
            .with_greeting(&orchestrator.greeting_response)
            .with_status(&orchestrator.status_response),
    );

    for provider_config in &config.providers {
        match build_provider(provider_config) {
            Ok(provider) => {
                info!(
                    provider = %provider_config.name,
                    timeout_secs = provider_config.timeout_secs,
                    "Registered provider"
                );
                builder = builder.add(provider, provider_config.timeout());
            }
            Err(e) => {
                warn!(provider = %provider_config.name, error = %e, "Skipping provider");
            }
        }
    }

    builder.build()
}

fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.resolved_api_key();
    let api_url = config.api_url.clone().filter(|u| !u.trim().is_empty());

    let provider: Arc<dyn Provider> = match config.kind {
        ProviderKind::OpenaiCompat => {
            if api_key.is_none() && api_url.is_none() {
                return Err(missing_key(config));
            }
            let mut p = OpenAiCompatProvider::new(
                &config.name,
                api_url.unwrap_or_else(|| "https://api.openai.com/v1".into()),
                api_key.unwrap_or_default(),
            )
            .with_sampling(config.max_tokens, config.temperature);
            if let Some(model) = &config.model {
                p = p.with_model(model);
            }
            Arc::new(p)
        }
        ProviderKind::AzureOpenai => {
            let api_key = api_key.ok_or_else(|| missing_key(config))?;
            let endpoint = api_url.ok_or_else(|| {
                ProviderError::NotConfigured(format!("{}: api_url (endpoint) is required", config.name))
            })?;
            let deployment = config.deployment.clone().ok_or_else(|| {
                ProviderError::NotConfigured(format!("{}: deployment is required", config.name))
            })?;
            let mut p = OpenAiCompatProvider::azure(&config.name, endpoint, deployment, api_key)
                .with_sampling(config.max_tokens, config.temperature);
            if let Some(version) = &config.api_version {
                p = p.with_api_version(version);
            }
            Arc::new(p)
        }
        ProviderKind::Anthropic => {
            let api_key = api_key.ok_or_else(|| missing_key(config))?;
            let mut p = AnthropicProvider::new(api_key)
                .with_name(&config.name)
                .with_sampling(config.max_tokens, config.temperature);
            if let Some(url) = api_url {
                p = p.with_base_url(url);
            }
            if let Some(model) = &config.model {
                p = p.with_model(model);
            }
            Arc::new(p)
        }
    };

    Ok(provider)
}

fn missing_key(config: &ProviderConfig) -> ProviderError {
    ProviderError::NotConfigured(format!(
        "{}: no api_key and {} is unset",
        config.name,
        config.api_key_env.as_deref().unwrap_or("no api_key_env")
    ))
}
