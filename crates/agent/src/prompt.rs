//! Prompt building: renders the assembled context ahead of the message.
//!
//! Layout (sections only when they have content):
//!
//! ```text
//! ### Conversation so far ###
//! User: ...
//! Assistant: ...
//!
//! ### About the user ###
//! - key: value
//!
//! ### Instructions ###
//! ...
//!
//! ### Current message ###
//! <message>
//! ```

use meshbrain_core::turn::{Role, UserContext};

/// Longest rendering of a single history turn, in characters.
pub const MAX_TURN_CHARS: usize = 200;

const CONTEXT_INSTRUCTION: &str = "Take the conversation and details above into account when \
answering, and stay consistent with what has already been discussed.";

/// Build the provider prompt for `message` given the user's context.
pub fn build_prompt(context: &UserContext, message: &str) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !context.turns.is_empty() {
        parts.push("### Conversation so far ###".into());
        for turn in &context.turns {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            parts.push(format!("{speaker}: {}", truncate(&turn.text, MAX_TURN_CHARS)));
        }
        parts.push(String::new());
    }

    let preferences: Vec<_> = context
        .preferences
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .collect();
    if !preferences.is_empty() {
        parts.push("### About the user ###".into());
        for (key, value) in &preferences {
            parts.push(format!("- {key}: {value}"));
        }
        parts.push(String::new());
    }

    if !context.turns.is_empty() || !preferences.is_empty() {
        parts.push("### Instructions ###".into());
        parts.push(CONTEXT_INSTRUCTION.into());
        parts.push(String::new());
    }

    parts.push("### Current message ###".into());
    parts.push(message.to_string());
    parts.join("\n")
}

/// Cut `text` to at most `max` characters, on a char boundary.
fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
