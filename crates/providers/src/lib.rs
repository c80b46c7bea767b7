//! Generation provider implementations for MeshBrain.
//!
//! All providers implement the `meshbrain_core::Provider` trait.
//! The router tries them in configured priority order and degrades to a
//! static reply when every one of them fails.

pub mod anthropic;
pub mod fallback;
pub mod health;
mod http;
pub mod openai_compat;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use fallback::{STATIC_PROVIDER, StaticFallback};
pub use health::ProviderHealth;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{
    ProviderCheck, ProviderRouter, ProviderRouterBuilder, RouteOutcome, build_from_config,
};
