//! ============================================================================
//! Memory Types - Data structures for the long-term archive
//! ============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bounded slice of archived conversation text.
/// Chunks from one stored text share a source tag and reassemble in
/// `chunk_index` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveChunk {
    pub content: String,
    /// Retrieval filter, derived from the companion identity.
    pub source_tag: String,
    /// Position of this chunk within the original text.
    pub chunk_index: u32,
    /// Unix timestamp (milliseconds) when the chunk was stored.
    pub stored_at: i64,
}

impl ArchiveChunk {
    pub fn new(content: String, source_tag: String, chunk_index: u32) -> Self {
        Self {
            content,
            source_tag,
            chunk_index,
            stored_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// One chunk plus its embedding, ready for the vector index.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub chunk: ArchiveChunk,
}

/// A chunk returned from a similarity query with its match score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: ArchiveChunk,
    pub score: f32,
}

/// Outcome of a semantic recall attempt.
///
/// `Empty` means the index answered and had nothing relevant; `Unavailable`
/// means embedding or the index failed and recall was skipped. Callers treat
/// both as "no relevant history" but log them differently.
#[derive(Debug, Clone)]
pub enum Recall {
    Hits(Vec<ArchiveChunk>),
    Empty,
    Unavailable,
}

impl Recall {
    /// Match contents joined by newlines, or None when there is nothing to
    /// inject into the prompt.
    pub fn joined(&self) -> Option<String> {
        match self {
            Recall::Hits(chunks) if !chunks.is_empty() => Some(
                chunks
                    .iter()
                    .map(|c| c.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            _ => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Recall::Unavailable)
    }
}

/// Prompt text assembled for one generation call.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub prompt: String,
    /// True when semantic recall was skipped due to a collaborator failure.
    pub recall_degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_joined() {
        let hits = Recall::Hits(vec![
            ArchiveChunk::new("first".to_string(), "doc".to_string(), 0),
            ArchiveChunk::new("second".to_string(), "doc".to_string(), 1),
        ]);
        assert_eq!(hits.joined().unwrap(), "first\nsecond");

        assert!(Recall::Empty.joined().is_none());
        assert!(Recall::Unavailable.joined().is_none());
        assert!(Recall::Unavailable.is_degraded());
    }
}
