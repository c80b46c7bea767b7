//! Deterministic reply used when every provider has failed.
//!
//! Greetings and status checks get dedicated canned answers; anything else
//! gets the generic apology. Matching is on whole words, case-insensitive.

const GREETINGS: &[&str] = &[
    "hello", "hi", "hey", "olá", "ola", "oi", "bom dia", "boa tarde", "boa noite",
    "good morning", "good afternoon", "good evening",
];

const STATUS_WORDS: &[&str] = &["status", "working", "ok", "funcionando", "online", "alive"];

/// The provider name reported when the static reply is used.
pub const STATIC_PROVIDER: &str = "static";

#[derive(Debug, Clone)]
pub struct StaticFallback {
    generic: String,
    greeting: String,
    status: String,
}

impl Default for StaticFallback {
    fn default() -> Self {
        Self::new(
            "Sorry, I'm having trouble answering right now. Please try again in a moment.",
        )
    }
}

impl StaticFallback {
    /// A fallback that answers everything with the same text.
    pub fn new(generic: impl Into<String>) -> Self {
        let generic = generic.into();
        Self {
            greeting: generic.clone(),
            status: generic.clone(),
            generic,
        }
    }

    pub fn with_greeting(mut self, text: impl Into<String>) -> Self {
        self.greeting = text.into();
        self
    }

    pub fn with_status(mut self, text: impl Into<String>) -> Self {
        self.status = text.into();
        self
    }

    /// Pick the canned reply for an inbound message.
    pub fn reply_for(&self, message: &str) -> &str {
        let words = normalize(message);
        if contains_phrase(&words, GREETINGS) {
            &self.greeting
        } else if contains_phrase(&words, STATUS_WORDS) {
            &self.status
        } else {
            &self.generic
        }
    }
}

/// Lowercase words with surrounding punctuation stripped.
fn normalize(message: &str) -> Vec<String> {
    message
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn contains_phrase(words: &[String], phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| {
        let parts: Vec<&str> = phrase.split(' ').collect();
        words
            .windows(parts.len())
            .any(|window| window.iter().zip(&parts).all(|(w, p)| w == p))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback() -> StaticFallback {
        StaticFallback::new("generic")
            .with_greeting("greeting")
            .with_status("status")
    }

    #[test]
    fn greetings_get_greeting_reply() {
        let f = fallback();
        assert_eq!(f.reply_for("Hello!"), "greeting");
        assert_eq!(f.reply_for("oi, tudo bem?"), "greeting");
        assert_eq!(f.reply_for("Bom dia equipe"), "greeting");
    }

    #[test]
    fn status_checks_get_status_reply() {
        let f = fallback();
        assert_eq!(f.reply_for("are you working?"), "status");
        assert_eq!(f.reply_for("STATUS"), "status");
    }

    #[test]
    fn greeting_wins_over_status() {
        assert_eq!(fallback().reply_for("hi, status?"), "greeting");
    }

    #[test]
    fn substrings_do_not_match() {
        let f = fallback();
        // "hi" inside "this", "ok" inside "book"
        assert_eq!(f.reply_for("this book is long"), "generic");
    }

    #[test]
    fn everything_else_is_generic() {
        assert_eq!(fallback().reply_for("what's my balance?"), "generic");
        assert_eq!(fallback().reply_for(""), "generic");
    }

    #[test]
    fn single_text_fallback() {
        let f = StaticFallback::new("down");
        assert_eq!(f.reply_for("hello"), "down");
        assert_eq!(f.reply_for("status"), "down");
    }
}
