//! The orchestrator: one inbound message in, one reply out.
//!
//! 1. **Validate** the request (non-empty user id and message)
//! 2. **Assemble context** from the memory manager
//! 3. **Build the prompt** (history, preferences, message)
//! 4. **Route** it through the provider fallback chain
//! 5. **Record** the exchange before replying
//!
//! Steps 2–4 run under an outer deadline. When it expires the caller gets
//! the static reply, and the exchange is recorded in the background so
//! memory matches what the user was actually told. [`Orchestrator::flush`]
//! waits for those background records.

use crate::prompt::build_prompt;
use meshbrain_config::AppConfig;
use meshbrain_core::error::{Error, RequestError};
use meshbrain_core::memory::TimeRange;
use meshbrain_core::provider::{GenerationRequest, ProviderHealthSnapshot, ProviderResult, Usage};
use meshbrain_core::turn::{Turn, TurnMetadata};
use meshbrain_memory::{MemoryManager, TierHealth};
use meshbrain_providers::{ProviderCheck, ProviderRouter, RouteOutcome, build_from_config};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Channel recorded when the caller doesn't name one.
pub const DEFAULT_CHANNEL: &str = "http";

/// A message from a user, as received by any surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub user_id: String,
    pub message: String,
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

impl InboundMessage {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
            channel: default_channel(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

/// The answer to an [`InboundMessage`].
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub response_text: String,
    /// Provider name, or `static` when every provider failed
    pub provider_used: String,
    /// End-to-end time in milliseconds
    pub latency_ms: u64,
    pub context_turns_used: usize,
    pub attempts: Vec<ProviderResult>,
    pub had_error: bool,
    /// The outer deadline expired before routing finished
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Tier availability and provider counters.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `healthy` when every tier is available, else `degraded`
    pub status: &'static str,
    pub tiers: TierHealth,
    pub providers: Vec<ProviderHealthSnapshot>,
    /// Live provider health checks; only filled by [`Orchestrator::check_health`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_checks: Option<Vec<ProviderCheck>>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Outer deadline for context assembly plus routing
    pub request_timeout: Duration,
    pub context_token_budget: usize,
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            context_token_budget: 2000,
            system_prompt: Some("You are a helpful assistant.".into()),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let system_prompt = config.orchestrator.system_prompt.trim();
        Self {
            request_timeout: Duration::from_secs(config.orchestrator.request_timeout_secs),
            context_token_budget: config.memory.context_token_budget,
            system_prompt: (!system_prompt.is_empty()).then(|| system_prompt.to_string()),
        }
    }
}

/// Ties memory and routing together. Holds no conversational state itself.
pub struct Orchestrator {
    memory: Arc<MemoryManager>,
    router: Arc<ProviderRouter>,
    settings: OrchestratorSettings,
    /// Records spawned after a deadline expiry
    background: Mutex<JoinSet<()>>,
}

impl Orchestrator {
    pub fn new(
        memory: Arc<MemoryManager>,
        router: Arc<ProviderRouter>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            memory,
            router,
            settings,
            background: Mutex::new(JoinSet::new()),
        }
    }

    /// Build the router and memory tiers from configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let router = build_from_config(config)?;
        let memory = MemoryManager::from_config(&config.memory).await?;
        info!(
            providers = ?router.provider_names(),
            "Orchestrator ready"
        );
        Ok(Self::new(
            Arc::new(memory),
            Arc::new(router),
            OrchestratorSettings::from_config(config),
        ))
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    /// Answer one message. Only contract violations are errors; every other
    /// failure degrades to a static reply.
    pub async fn handle(&self, inbound: InboundMessage) -> Result<Reply, RequestError> {
        if inbound.user_id.trim().is_empty() {
            return Err(RequestError::EmptyUserId);
        }
        if inbound.message.trim().is_empty() {
            return Err(RequestError::EmptyMessage);
        }

        let started = Instant::now();
        let user_id = inbound.user_id.as_str();

        let (outcome, context_turns_used) = self
            .respond(user_id, &inbound.message, started + self.settings.request_timeout)
            .await?;
        let timed_out = outcome.deadline_expired;
        if timed_out {
            warn!(
                user_id,
                timeout_ms = self.settings.request_timeout.as_millis() as u64,
                "Request deadline expired, replying with static response"
            );
        }

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let had_error = outcome.used_fallback();
        let metadata = TurnMetadata {
            provider: Some(outcome.provider.clone()),
            latency_ms: Some(latency_ms),
            had_error,
            channel: Some(inbound.channel.clone()),
        };

        if timed_out {
            let memory = Arc::clone(&self.memory);
            let (user_id, message, text) = (
                inbound.user_id.clone(),
                inbound.message.clone(),
                outcome.text.clone(),
            );
            let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
            // Reap finished records so the set stays small
            while background.try_join_next().is_some() {}
            background.spawn(async move {
                if let Err(e) = memory
                    .record_interaction(&user_id, &message, &text, metadata)
                    .await
                {
                    error!(user_id, error = %e, "Background record failed");
                }
            });
        } else if let Err(e) = self
            .memory
            .record_interaction(user_id, &inbound.message, &outcome.text, metadata)
            .await
        {
            error!(user_id, error = %e, "Failed to record interaction");
        }

        info!(
            user_id,
            channel = %inbound.channel,
            provider = %outcome.provider,
            latency_ms,
            context_turns = context_turns_used,
            "Reply ready"
        );

        Ok(Reply {
            response_text: outcome.text,
            provider_used: outcome.provider,
            latency_ms,
            context_turns_used,
            attempts: outcome.attempts,
            had_error,
            timed_out,
            usage: outcome.usage,
        })
    }

    /// Assemble context and route, both bounded by `deadline`.
    async fn respond(
        &self,
        user_id: &str,
        message: &str,
        deadline: Instant,
    ) -> Result<(RouteOutcome, usize), RequestError> {
        let context = match tokio::time::timeout_at(
            deadline,
            self.memory
                .get_context(user_id, self.settings.context_token_budget),
        )
        .await
        {
            Ok(context) => context,
            Err(_) => return Ok((self.router.deadline_outcome(message), 0)),
        };
        let turns_used = context.turns.len();

        let mut request = GenerationRequest::new(build_prompt(&context, message)).with_message(message);
        if let Some(system_prompt) = &self.settings.system_prompt {
            request = request.with_system_prompt(system_prompt.clone());
        }

        let outcome = self.router.route_until(&request, deadline).await?;
        Ok((outcome, turns_used))
    }

    /// Wait for background records, then for queued WARM writes.
    pub async fn flush(&self) {
        let mut pending =
            std::mem::take(&mut *self.background.lock().unwrap_or_else(|e| e.into_inner()));
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Background record task failed");
            }
        }
        self.memory.flush_writes().await;
    }

    /// Tier availability and provider counters. Cheap: no provider calls.
    pub async fn health(&self) -> HealthReport {
        let tiers = self.memory.tier_health().await;
        HealthReport {
            status: tiers.status(),
            tiers,
            providers: self.router.health(),
            provider_checks: None,
        }
    }

    /// [`health`](Self::health) plus a live health check of every provider.
    pub async fn check_health(&self) -> HealthReport {
        let mut report = self.health().await;
        report.provider_checks = Some(self.router.check_providers().await);
        report
    }

    /// Out-of-band history read across WARM and COLD.
    pub async fn export_history(&self, user_id: &str, range: TimeRange) -> Result<Vec<Turn>, Error> {
        if user_id.trim().is_empty() {
            return Err(RequestError::EmptyUserId.into());
        }
        Ok(self.memory.export_history(user_id, range).await?)
    }

    pub async fn set_preference(&self, user_id: &str, key: &str, value: &str) -> Result<(), Error> {
        if user_id.trim().is_empty() {
            return Err(RequestError::EmptyUserId.into());
        }
        Ok(self.memory.set_preference(user_id, key, value).await?)
    }
}
