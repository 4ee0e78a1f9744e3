//! ============================================================================
//! Context Assembler - Prompt construction from persona + memory
//! ============================================================================
//! Produces the exact text fed to a generation call: persona instructions,
//! relevant archived history, the recent conversation window, and the
//! trailing speaker cue. Records the finished exchange back into both stores.
//! ============================================================================

use anyhow::Result;
use tracing::{debug, warn};

use super::archive::{SemanticArchive, DEFAULT_RECALL_K};
use super::history::{AppendOutcome, HistoryLog, DEFAULT_RECENT_LIMIT};
use super::types::AssembledPrompt;
use crate::types::{ConversationKey, Persona};

/// Orchestrates history and archive into generation-ready prompt text
pub struct ContextAssembler {
    history: HistoryLog,
    archive: SemanticArchive,
    recent_limit: usize,
    recall_k: u64,
}

impl ContextAssembler {
    pub fn new(history: HistoryLog, archive: SemanticArchive) -> Self {
        Self {
            history,
            archive,
            recent_limit: DEFAULT_RECENT_LIMIT,
            recall_k: DEFAULT_RECALL_K,
        }
    }

    pub fn with_recent_limit(mut self, recent_limit: usize) -> Self {
        self.recent_limit = recent_limit;
        self
    }

    pub fn with_recall_k(mut self, recall_k: u64) -> Self {
        self.recall_k = recall_k;
        self
    }

    /// Build the prompt for one inbound user turn.
    ///
    /// Seeds a fresh conversation from the persona dialogue, commits the user
    /// turn, then composes instructions + archived recall + recent window +
    /// speaker cue. Archive failures degrade to a prompt without the recall
    /// section; a failed user-turn append is logged and tolerated.
    pub async fn build(
        &self,
        persona: &Persona,
        key: &ConversationKey,
        user_turn: &str,
    ) -> Result<AssembledPrompt> {
        self.history
            .ensure_seeded(key, &persona.seed, &persona.seed_delimiter)?;

        match self.history.append(key, &format!("User: {}", user_turn)) {
            Ok(AppendOutcome::Recorded { .. }) | Ok(AppendOutcome::SkippedMalformedKey) => {}
            Err(e) => warn!("User turn not committed to history: {}", e),
        }

        let recent = self.history.read_recent(key, self.recent_limit)?;

        let recall = self
            .archive
            .search(&recent, &key.source_tag(), self.recall_k)
            .await;

        let mut prompt = String::new();
        prompt.push_str(persona.instructions.trim());
        prompt.push_str("\n\n");
        if let Some(relevant) = recall.joined() {
            prompt.push_str(&format!(
                "Below are relevant details about {}'s past and the conversation you are in.\n",
                persona.name
            ));
            prompt.push_str(&relevant);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&recent);
        prompt.push_str(&format!("\n{}:", persona.name));

        debug!(
            "Assembled prompt for {} ({} chars, recall degraded: {})",
            key,
            prompt.len(),
            recall.is_degraded()
        );

        Ok(AssembledPrompt {
            prompt,
            recall_degraded: recall.is_degraded(),
        })
    }

    /// Record a finished exchange: append the reply to the history log and
    /// archive the turn pair for future recall. Both writes are tolerated
    /// failures; the reply has already been delivered.
    pub async fn record_exchange(
        &self,
        persona: &Persona,
        key: &ConversationKey,
        user_turn: &str,
        reply: &str,
    ) {
        match self
            .history
            .append(key, &format!("{}: {}", persona.name, reply))
        {
            Ok(_) => {}
            Err(e) => warn!("Reply not committed to history for {}: {}", key, e),
        }

        let pair = format!("User: {}\n{}: {}", user_turn, persona.name, reply);
        if !self.archive.store(&pair, &key.source_tag()).await {
            warn!("Exchange not archived for {}", key);
        }
    }
}
