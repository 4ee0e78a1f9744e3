//! ============================================================================
//! Semantic Archive - Long-term conversation recall
//! ============================================================================
//! Splits stored exchanges into fixed-size chunks, embeds them, and retrieves
//! the nearest past chunks for a query. Recall is an enhancement: every
//! failure degrades to an explicit empty outcome instead of breaking the
//! conversation.
//! ============================================================================

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::embeddings::TextEmbedder;
use super::index::VectorIndex;
use super::types::{ArchiveChunk, IndexPoint, Recall};

/// Maximum characters per archive chunk.
pub const DEFAULT_CHUNK_CHARS: usize = 1000;

/// How many nearest chunks a recall query returns by default.
pub const DEFAULT_RECALL_K: u64 = 4;

/// Split text into chunks of at most `max_chars` characters, boundary-blind.
/// Concatenating the chunks in order reproduces the input exactly.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Chunked long-term storage with similarity retrieval
pub struct SemanticArchive {
    embedder: Arc<dyn TextEmbedder>,
    index: Arc<dyn VectorIndex>,
    chunk_chars: usize,
}

impl SemanticArchive {
    pub fn new(embedder: Arc<dyn TextEmbedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            chunk_chars: DEFAULT_CHUNK_CHARS,
        }
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars;
        self
    }

    /// Store text under a source tag, best-effort.
    ///
    /// The text is chunked, each chunk embedded and upserted with its
    /// position. Returns false on any embedding or index failure; the
    /// conversation continues either way.
    pub async fn store(&self, text: &str, source_tag: &str) -> bool {
        let chunks = chunk_text(text, self.chunk_chars);
        if chunks.is_empty() {
            debug!("Nothing to archive for tag {}", source_tag);
            return true;
        }

        let vectors = match self.embedder.embed(chunks.clone()).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!("Archive store skipped, embedding failed: {}", e);
                return false;
            }
        };

        if vectors.len() != chunks.len() {
            warn!(
                "Archive store skipped, embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
            return false;
        }

        let points: Vec<IndexPoint> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (content, vector))| IndexPoint {
                id: Uuid::new_v4(),
                vector,
                chunk: ArchiveChunk::new(content, source_tag.to_string(), i as u32),
            })
            .collect();

        match self.index.upsert(points).await {
            Ok(()) => {
                debug!("Archived text under tag {}", source_tag);
                true
            }
            Err(e) => {
                warn!("Archive store failed: {}", e);
                false
            }
        }
    }

    /// Nearest archived chunks for a query, scoped to a source tag.
    ///
    /// Embedding or index failures degrade to `Recall::Unavailable` with a
    /// warning; they are never propagated.
    pub async fn search(&self, query: &str, source_tag: &str, k: u64) -> Recall {
        let vector = match self.embedder.embed(vec![query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => {
                warn!("Recall skipped, embedder returned no vector");
                return Recall::Unavailable;
            }
            Err(e) => {
                warn!("Recall skipped, embedding failed: {}", e);
                return Recall::Unavailable;
            }
        };

        match self.index.query(vector, k, source_tag).await {
            Ok(matches) if matches.is_empty() => Recall::Empty,
            Ok(matches) => Recall::Hits(matches.into_iter().map(|m| m.chunk).collect()),
            Err(e) => {
                warn!("Recall skipped, index query failed: {}", e);
                Recall::Unavailable
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::memory::types::ScoredChunk;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Deterministic local embedder: vector from character statistics.
    /// Identical input always yields an identical vector.
    pub struct StubEmbedder;

    #[async_trait]
    impl TextEmbedder for StubEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let sum: u32 = t.chars().map(|c| c as u32 % 97).sum();
                    let len = t.chars().count() as f32;
                    vec![len, (sum % 1000) as f32, (sum % 31) as f32]
                })
                .collect())
        }
    }

    /// Embedder that always fails.
    pub struct FailingEmbedder;

    #[async_trait]
    impl TextEmbedder for FailingEmbedder {
        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Err(anyhow!("embedding endpoint unreachable"))
        }
    }

    /// In-memory vector index with cosine scoring.
    #[derive(Default)]
    pub struct InMemoryIndex {
        points: Mutex<Vec<IndexPoint>>,
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            dot / (na * nb)
        }
    }

    #[async_trait]
    impl VectorIndex for InMemoryIndex {
        async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
            self.points.lock().unwrap().extend(points);
            Ok(())
        }

        async fn query(
            &self,
            vector: Vec<f32>,
            k: u64,
            source_tag: &str,
        ) -> Result<Vec<ScoredChunk>> {
            let points = self.points.lock().unwrap();
            let mut matches: Vec<ScoredChunk> = points
                .iter()
                .filter(|p| p.chunk.source_tag == source_tag)
                .map(|p| ScoredChunk {
                    chunk: p.chunk.clone(),
                    score: cosine(&p.vector, &vector),
                })
                .collect();
            matches.sort_by(|a, b| b.score.total_cmp(&a.score));
            matches.truncate(k as usize);
            Ok(matches)
        }
    }

    /// Index that always fails.
    #[derive(Default)]
    pub struct UnreachableIndex;

    #[async_trait]
    impl VectorIndex for UnreachableIndex {
        async fn upsert(&self, _points: Vec<IndexPoint>) -> Result<()> {
            Err(anyhow!("index unreachable"))
        }

        async fn query(
            &self,
            _vector: Vec<f32>,
            _k: u64,
            _source_tag: &str,
        ) -> Result<Vec<ScoredChunk>> {
            Err(anyhow!("index unreachable"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn test_chunks_reassemble_exactly() {
        let text = "abcdefghij".repeat(123);
        let chunks = chunk_text(&text, DEFAULT_CHUNK_CHARS);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 1000);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunking_respects_multibyte_boundaries() {
        let text = "héllo wörld ünïcödé ".repeat(10);
        let chunks = chunk_text(&text, 7);
        assert!(chunks.iter().all(|c| c.chars().count() <= 7));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", 1000).is_empty());
    }

    #[tokio::test]
    async fn test_store_then_search_finds_nearest() {
        let archive = SemanticArchive::new(
            Arc::new(StubEmbedder),
            Arc::new(InMemoryIndex::default()),
        );

        assert!(archive.store("the patient reported headaches", "doctor").await);
        assert!(archive.store("the weather was sunny today", "doctor").await);
        assert!(archive.store("unrelated tag content", "pirate").await);

        let recall = archive
            .search("the patient reported headaches", "doctor", DEFAULT_RECALL_K)
            .await;
        match recall {
            Recall::Hits(chunks) => {
                assert_eq!(chunks[0].content, "the patient reported headaches");
                assert!(chunks.iter().all(|c| c.source_tag == "doctor"));
            }
            other => panic!("expected hits, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_unknown_tag_is_empty_not_degraded() {
        let archive = SemanticArchive::new(
            Arc::new(StubEmbedder),
            Arc::new(InMemoryIndex::default()),
        );

        let recall = archive.search("anything", "nobody", DEFAULT_RECALL_K).await;
        assert!(matches!(recall, Recall::Empty));
    }

    #[tokio::test]
    async fn test_unreachable_index_degrades() {
        let archive = SemanticArchive::new(
            Arc::new(StubEmbedder),
            Arc::new(UnreachableIndex),
        );

        assert!(!archive.store("some exchange", "doctor").await);

        let recall = archive.search("some exchange", "doctor", DEFAULT_RECALL_K).await;
        assert!(recall.is_degraded());
    }

    #[tokio::test]
    async fn test_failing_embedder_degrades() {
        let archive = SemanticArchive::new(
            Arc::new(FailingEmbedder),
            Arc::new(InMemoryIndex::default()),
        );

        assert!(!archive.store("some exchange", "doctor").await);
        assert!(archive
            .search("some exchange", "doctor", DEFAULT_RECALL_K)
            .await
            .is_degraded());
    }
}
