//! ============================================================================
//! COMPANION-CORE: Conversational Memory Engine
//! ============================================================================
//! This crate gives a stateless generation call the illusion of continuity:
//! - Per-conversation chronological history with idempotent persona seeding
//! - Chunked long-term archive with embedding-based similarity recall
//! - Sliding-window per-user admission control
//! - Prompt assembly from persona + recall + recent history
//! ============================================================================

pub mod config;
pub mod db;
pub mod engine;
pub mod memory;
pub mod rate_guard;
pub mod types;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use db::{CompanionDb, DbStats, HistoryEntry, RateWindowRecord};
pub use engine::{CompanionEngine, ReplyGenerator};
pub use memory::{
    ArchiveChunk, AssembledPrompt, ContextAssembler, EmbeddingService, HistoryLog, QdrantIndex,
    Recall, SemanticArchive, TextEmbedder, VectorIndex,
};
pub use rate_guard::{RateDecision, RateGuard};
pub use types::{ChatError, ChatReply, ChatRequest, ConversationKey, Persona};
