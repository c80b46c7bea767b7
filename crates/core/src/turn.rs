//! Turn and context domain types.
//!
//! These are the core value objects that flow through the entire system:
//! a user sends a message → the orchestrator assembles a `UserContext` from
//! the tiers → a provider answers → both sides are persisted as `Turn`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant (generated text or static fallback)
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Per-turn annotations recorded alongside the text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// Provider that produced the assistant text (`static` for fallback)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// End-to-end generation latency in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    /// Whether every provider failed for this exchange
    #[serde(default)]
    pub had_error: bool,

    /// Inbound channel (http, teams, cli, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// A single message in a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub user_id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: TurnMetadata,
}

impl Turn {
    /// Create a user turn.
    pub fn user(user_id: impl Into<String>, text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::User,
            text: text.into(),
            timestamp: at,
            metadata: TurnMetadata::default(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(
        user_id: impl Into<String>,
        text: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Assistant,
            text: text.into(),
            timestamp: at,
            metadata: TurnMetadata::default(),
        }
    }

    /// Identity of a turn across tiers.
    pub fn key(&self) -> (&str, DateTime<Utc>) {
        (&self.user_id, self.timestamp)
    }

    /// Tokens charged per turn on top of its text.
    pub const OVERHEAD_TOKENS: usize = 4;

    /// Rough token estimate (4 chars ≈ 1 token, plus per-turn overhead).
    pub fn estimated_tokens(&self) -> usize {
        Self::OVERHEAD_TOKENS + self.text.len().div_ceil(4)
    }
}

/// The storage tiers, in order of increasing durability and latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// In-process cache
    Hot,
    /// Durable store
    Warm,
    /// Archive
    Cold,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Hot => f.write_str("hot"),
            Tier::Warm => f.write_str("warm"),
            Tier::Cold => f.write_str("cold"),
        }
    }
}

/// A turn as held by one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRecord {
    pub turn: Turn,
    pub tier: Tier,
    pub expires_at: DateTime<Utc>,
}

impl TierRecord {
    pub fn new(turn: Turn, tier: Tier, expires_at: DateTime<Utc>) -> Self {
        Self {
            turn,
            tier,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Assembled history for one user, oldest turn first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
}

impl UserContext {
    /// An empty context (used when HOT is unavailable).
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            turns: Vec::new(),
            preferences: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.preferences.is_empty()
    }

    /// Total token estimate of the history.
    pub fn estimated_tokens(&self) -> usize {
        self.turns.iter().map(Turn::estimated_tokens).sum()
    }
}
