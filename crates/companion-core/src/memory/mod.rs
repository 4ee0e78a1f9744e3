//! ============================================================================
//! Memory Module - Conversation memory for companions
//! ============================================================================
//! Short-term history, long-term semantic recall, and prompt assembly.
//!
//! ## Architecture
//! ```text
//! User Message → HistoryLog (recent turns) ─┐
//!                                           ├→ ContextAssembler → Prompt
//!        SemanticArchive (nearest chunks) ──┘
//!                       ↓↑
//!            Embeddings + Vector Index
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use companion_core::memory::{ContextAssembler, HistoryLog, SemanticArchive};
//!
//! let assembler = ContextAssembler::new(history, archive);
//! let assembled = assembler.build(&persona, &key, "how are you?").await?;
//! // ... external generation ...
//! assembler.record_exchange(&persona, &key, "how are you?", &reply).await;
//! ```
//! ============================================================================

pub mod archive;
pub mod context;
pub mod embeddings;
pub mod history;
pub mod index;
pub mod types;

// Re-export public types
pub use archive::{chunk_text, SemanticArchive, DEFAULT_CHUNK_CHARS, DEFAULT_RECALL_K};
pub use context::ContextAssembler;
pub use embeddings::{EmbeddingService, TextEmbedder, DEFAULT_EMBEDDING_MODEL, EMBEDDING_DIM};
pub use history::{AppendOutcome, HistoryLog, DEFAULT_RECENT_LIMIT};
pub use index::{QdrantIndex, VectorIndex, COLLECTION_NAME};
pub use types::{ArchiveChunk, AssembledPrompt, IndexPoint, Recall, ScoredChunk};
