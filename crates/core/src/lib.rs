//! # MeshBrain Core
//!
//! Domain types, traits, and error definitions for the MeshBrain
//! conversational backend. This crate has **zero framework dependencies**;
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here: generation providers, tier stores,
//! preference stores and the clock. Implementations live in their respective
//! crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations (including fault injection)
//! - Clean dependency graph (all crates depend inward on core)

pub mod clock;
pub mod error;
pub mod memory;
pub mod provider;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, ErrorKind, MemoryError, ProviderError, RequestError, Result};
pub use memory::{PreferenceStore, RangeQuery, TierStore, TimeRange};
pub use provider::{
    AttemptOutcome, Generation, GenerationRequest, Provider, ProviderHealthSnapshot,
    ProviderResult, Usage,
};
pub use turn::{Role, Tier, TierRecord, Turn, TurnMetadata, UserContext};
