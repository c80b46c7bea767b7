//! Request orchestration for MeshBrain.
//!
//! The [`Orchestrator`] owns one memory manager and one provider router,
//! both injected at construction. For every inbound message it assembles
//! context, builds the prompt, routes it, and records the exchange.

pub mod orchestrator;
pub mod prompt;

pub use orchestrator::{
    DEFAULT_CHANNEL, HealthReport, InboundMessage, Orchestrator, OrchestratorSettings, Reply,
};
pub use prompt::build_prompt;
