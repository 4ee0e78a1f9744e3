//! ============================================================================
//! Core Types for the Companion Memory Engine
//! ============================================================================
//! Conversation identity, persona records, and the chat request/reply surface.
//! These types are serialized to JSON for the embedding application.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Composite identity for one conversation thread.
/// A (companion, model, user) triple scopes all history and recall; once a
/// turn is recorded under a key, the key is never reinterpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub companion_name: String,
    pub model_name: String,
    pub user_id: String,
}

impl ConversationKey {
    pub fn new(
        companion_name: impl Into<String>,
        model_name: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            companion_name: companion_name.into(),
            model_name: model_name.into(),
            user_id: user_id.into(),
        }
    }

    /// Key under which this conversation's history is stored.
    pub fn storage_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.companion_name, self.model_name, self.user_id
        )
    }

    /// Tag under which this conversation's archive chunks are filed.
    /// Scoped per companion so every user talking to the same companion
    /// shares its long-term past.
    pub fn source_tag(&self) -> String {
        self.companion_name.clone()
    }

    /// A key is usable only when the subject is known. An empty user id
    /// means the caller's auth layer handed us a bad identity.
    pub fn is_well_formed(&self) -> bool {
        !self.user_id.is_empty() && !self.companion_name.is_empty()
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

/// The slice of a companion record the memory engine consumes.
/// Companion CRUD itself lives in the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Display name, used as the speaker label and archive tag.
    pub name: String,
    /// System-prompt body describing how the companion speaks.
    pub instructions: String,
    /// Canonical seed dialogue for a fresh conversation.
    pub seed: String,
    /// Delimiter splitting `seed` into individual turns.
    pub seed_delimiter: String,
}

impl Persona {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        seed: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            seed: seed.into(),
            seed_delimiter: "\n\n".to_string(),
        }
    }

    pub fn with_seed_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.seed_delimiter = delimiter.into();
        self
    }
}

/// Inbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
}

/// Outbound chat reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Error surface of the engine. Everything that can be skipped without
/// corrupting the conversation log is recovered internally and logged;
/// these are the failures the caller must act on.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum ChatError {
    #[error("Missing subject identity")]
    Unauthorized,

    #[error("Too many requests, retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: i64 },

    #[error("Companion not found: {0}")]
    NotFound(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_format() {
        let key = ConversationKey::new("doctor", "gemini-2.5-flash", "user-42");
        assert_eq!(key.storage_key(), "doctor-gemini-2.5-flash-user-42");
        assert_eq!(key.source_tag(), "doctor");
    }

    #[test]
    fn test_well_formed_requires_subject() {
        let key = ConversationKey::new("doctor", "gemini-2.5-flash", "");
        assert!(!key.is_well_formed());

        let key = ConversationKey::new("doctor", "gemini-2.5-flash", "user-42");
        assert!(key.is_well_formed());
    }

    #[test]
    fn test_persona_defaults_blank_line_delimiter() {
        let persona = Persona::new("Doctor", "You are a doctor.", "Human: hi\n\nDoctor: hello");
        assert_eq!(persona.seed_delimiter, "\n\n");

        let persona = persona.with_seed_delimiter("\n");
        assert_eq!(persona.seed_delimiter, "\n");
    }
}
