//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};

/// One stored conversation turn.
/// `score` orders entries chronologically (epoch milliseconds for live turns,
/// small integers for seeded turns); `seq` breaks score ties in insertion
/// order so reads are deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub score: i64,
    pub seq: u64,
    pub text: String,
}

/// Sliding-window counter state for one subject.
/// `window_id` is the fixed window index (now / window length); the previous
/// window's count is kept so admission can weight it against the elapsed
/// fraction of the current window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateWindowRecord {
    pub window_id: i64,
    pub current: u32,
    pub previous: u32,
}

/// Outcome of one transactional admission attempt.
#[derive(Debug, Clone)]
pub struct RateOutcome {
    pub allowed: bool,
    /// Requests counted against the trailing window at decision time,
    /// including this one when admitted.
    pub used: u32,
    /// Milliseconds until the current fixed window rolls over.
    pub window_remaining_ms: i64,
}

/// Database-wide statistics for the inspection CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub total_conversations: usize,
    pub total_entries: usize,
    pub rate_subjects: usize,
}
