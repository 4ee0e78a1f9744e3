//! ============================================================================
//! Archive Index - Qdrant vector database operations
//! ============================================================================
//! Stores and retrieves archive chunks using vector similarity search.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use tracing::{debug, info};

use super::embeddings::EMBEDDING_DIM;
use super::types::{ArchiveChunk, IndexPoint, ScoredChunk};

/// Collection name for archived conversation chunks
pub const COLLECTION_NAME: &str = "companion_archive";

/// Similarity-index collaborator: upsert embedded chunks, query the nearest
/// neighbors scoped to one source tag.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()>;

    async fn query(&self, vector: Vec<f32>, k: u64, source_tag: &str) -> Result<Vec<ScoredChunk>>;
}

/// Vector index backed by a Qdrant collection
pub struct QdrantIndex {
    client: Qdrant,
}

impl QdrantIndex {
    /// Create a new index client, connecting to Qdrant
    pub async fn new(url: &str) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| anyhow!("Failed to create Qdrant client: {}", e))?;

        let index = Self { client };
        index.ensure_collection().await?;

        Ok(index)
    }

    /// Ensure the archive collection exists
    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(COLLECTION_NAME)
            .await
            .map_err(|e| anyhow!("Failed to check collection existence: {}", e))?;

        if !exists {
            info!("Creating collection: {}", COLLECTION_NAME);

            self.client
                .create_collection(
                    CreateCollectionBuilder::new(COLLECTION_NAME).vectors_config(
                        VectorParamsBuilder::new(EMBEDDING_DIM as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| anyhow!("Failed to create collection: {}", e))?;

            info!("Collection {} created successfully", COLLECTION_NAME);
        } else {
            debug!("Collection {} already exists", COLLECTION_NAME);
        }

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        debug!("Upserting {} chunks", points.len());

        let points: Vec<PointStruct> = points
            .into_iter()
            .map(|p| {
                let payload: HashMap<String, Value> = [
                    (
                        "source_tag".to_string(),
                        Value::from(p.chunk.source_tag.clone()),
                    ),
                    (
                        "chunk_index".to_string(),
                        Value::from(p.chunk.chunk_index as i64),
                    ),
                    ("content".to_string(), Value::from(p.chunk.content.clone())),
                    ("stored_at".to_string(), Value::from(p.chunk.stored_at)),
                ]
                .into_iter()
                .collect();

                PointStruct::new(p.id.to_string(), p.vector, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(COLLECTION_NAME, points))
            .await
            .map_err(|e| anyhow!("Failed to upsert chunks: {}", e))?;

        Ok(())
    }

    async fn query(&self, vector: Vec<f32>, k: u64, source_tag: &str) -> Result<Vec<ScoredChunk>> {
        debug!("Querying {} for tag {} (k: {})", COLLECTION_NAME, source_tag, k);

        let filter = Filter::must([Condition::matches("source_tag", source_tag.to_string())]);

        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(COLLECTION_NAME, vector, k)
                    .filter(filter)
                    .with_payload(true),
            )
            .await
            .map_err(|e| anyhow!("Failed to query chunks: {}", e))?;

        let matches: Vec<ScoredChunk> = search_result
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload;
                Some(ScoredChunk {
                    chunk: ArchiveChunk {
                        content: get_string(&payload, "content")?,
                        source_tag: get_string(&payload, "source_tag")?,
                        chunk_index: get_i64(&payload, "chunk_index").unwrap_or(0) as u32,
                        stored_at: get_i64(&payload, "stored_at").unwrap_or(0),
                    },
                    score: point.score,
                })
            })
            .collect();

        debug!("Found {} matching chunks", matches.len());
        Ok(matches)
    }
}

// Helper functions to extract values from payload
fn get_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str().map(|s| s.to_string()))
}

fn get_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    payload.get(key).and_then(|v| v.as_integer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    // Integration tests require a running Qdrant instance
    // These are marked as ignored by default

    #[tokio::test]
    #[ignore]
    async fn test_upsert_and_query() {
        let index = QdrantIndex::new("http://localhost:6333").await.unwrap();

        let chunk = ArchiveChunk::new("Test chunk content".to_string(), "test_tag".to_string(), 0);
        let point = IndexPoint {
            id: Uuid::new_v4(),
            vector: vec![0.1; EMBEDDING_DIM],
            chunk,
        };

        index.upsert(vec![point]).await.unwrap();

        let results = index
            .query(vec![0.1; EMBEDDING_DIM], 10, "test_tag")
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.content, "Test chunk content");
    }
}
