//! ============================================================================
//! History Log - Short-term conversation memory
//! ============================================================================
//! Chronological per-conversation turn log over the embedded scored store,
//! with idempotent persona seeding.
//! ============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::db::CompanionDb;
use crate::types::ConversationKey;

/// How many trailing turns a recent-history read returns by default.
pub const DEFAULT_RECENT_LIMIT: usize = 30;

/// Outcome of an append attempt.
/// A malformed conversation key signals an upstream auth bug; the write is
/// skipped and logged instead of failing the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Recorded { score: i64 },
    SkippedMalformedKey,
}

/// Ordered, per-conversation short-term log
pub struct HistoryLog {
    db: Arc<CompanionDb>,
}

impl HistoryLog {
    pub fn new(db: Arc<CompanionDb>) -> Self {
        Self { db }
    }

    /// True if the conversation has any recorded turns.
    pub fn exists(&self, key: &ConversationKey) -> Result<bool> {
        self.db.history_exists(&key.storage_key())
    }

    /// Seed a fresh conversation from the persona's canonical dialogue.
    ///
    /// `seed` is split by `delimiter` and each piece is appended with scores
    /// 0,1,2,… preserving seed order. A conversation that already has entries
    /// is left untouched; the check and the writes run in one store
    /// transaction, so repeated or racing calls seed at most once.
    ///
    /// Returns true when this call performed the seeding.
    pub fn ensure_seeded(
        &self,
        key: &ConversationKey,
        seed: &str,
        delimiter: &str,
    ) -> Result<bool> {
        if !key.is_well_formed() {
            warn!("Conversation key set incorrectly, cannot seed history");
            return Ok(false);
        }

        let lines: Vec<String> = seed.split(delimiter).map(str::to_string).collect();
        let seeded = self.db.history_seed_if_absent(&key.storage_key(), &lines)?;
        if seeded {
            debug!("Seeded {} turns for {}", lines.len(), key);
        } else {
            debug!("Conversation {} already has history", key);
        }
        Ok(seeded)
    }

    /// Append one turn, scored by the current wall clock in milliseconds.
    pub fn append(&self, key: &ConversationKey, text: &str) -> Result<AppendOutcome> {
        if !key.is_well_formed() {
            warn!("Conversation key set incorrectly, cannot write history");
            return Ok(AppendOutcome::SkippedMalformedKey);
        }

        let score = chrono::Utc::now().timestamp_millis();
        self.db.history_append(&key.storage_key(), score, text)?;
        Ok(AppendOutcome::Recorded { score })
    }

    /// The most recent turns, oldest first, newline-joined.
    ///
    /// Reads the full scored range and keeps the tail: the bound applies to
    /// the newest entries, but their relative order stays chronological.
    pub fn read_recent(&self, key: &ConversationKey, limit: usize) -> Result<String> {
        if !key.is_well_formed() {
            warn!("Conversation key set incorrectly, cannot read history");
            return Ok(String::new());
        }

        let entries = self.db.history_range(&key.storage_key())?;
        let skip = entries.len().saturating_sub(limit);
        let recent: Vec<&str> = entries[skip..].iter().map(|e| e.text.as_str()).collect();
        Ok(recent.join("\n"))
    }
}
