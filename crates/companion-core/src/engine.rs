//! ============================================================================
//! Companion Engine - Per-message orchestration
//! ============================================================================
//! One explicitly constructed instance owns the rate guard and the context
//! assembler and drives the full flow for an inbound message: admit, build
//! the prompt, hand it to the external generator, record the exchange.
//! ============================================================================

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::db::CompanionDb;
use crate::memory::archive::SemanticArchive;
use crate::memory::context::ContextAssembler;
use crate::memory::embeddings::TextEmbedder;
use crate::memory::history::HistoryLog;
use crate::memory::index::{QdrantIndex, VectorIndex};
use crate::rate_guard::RateGuard;
use crate::types::{ChatError, ChatReply, ChatRequest, ConversationKey, Persona};

/// External generation collaborator. The engine assembles the prompt and
/// records the outcome; producing the reply text is someone else's job.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// The memory engine: admission control, context assembly, and exchange
/// recording behind one handle, shared across request tasks via Arc.
pub struct CompanionEngine {
    rate_guard: RateGuard,
    assembler: Arc<ContextAssembler>,
    model_name: String,
}

impl CompanionEngine {
    /// Connect to the configured stores and build a ready engine.
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let db = Arc::new(CompanionDb::open(config.db_path.as_deref())?);
        let embedder: Arc<dyn TextEmbedder> = Arc::new(config.embedding_service()?);
        let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(&config.qdrant_url).await?);

        Ok(Self::from_parts(db, embedder, index, config))
    }

    /// Wire an engine from already-constructed collaborators.
    pub fn from_parts(
        db: Arc<CompanionDb>,
        embedder: Arc<dyn TextEmbedder>,
        index: Arc<dyn VectorIndex>,
        config: &EngineConfig,
    ) -> Self {
        let history = HistoryLog::new(db.clone());
        let archive = SemanticArchive::new(embedder, index).with_chunk_chars(config.chunk_chars);
        let assembler = ContextAssembler::new(history, archive)
            .with_recent_limit(config.recent_limit)
            .with_recall_k(config.recall_k);
        let rate_guard =
            RateGuard::new(db).with_limits(config.rate_quota, config.rate_window);

        Self {
            rate_guard,
            assembler: Arc::new(assembler),
            model_name: config.model_name.clone(),
        }
    }

    /// Handle one inbound chat message end to end.
    ///
    /// `subject` is the authenticated user id; `persona` is the companion
    /// record resolved by the caller, None when no such companion exists.
    /// The user turn is committed before generation and is not rolled back
    /// if generation fails.
    pub async fn respond(
        &self,
        subject: Option<&str>,
        persona: Option<&Persona>,
        request: &ChatRequest,
        generator: &dyn ReplyGenerator,
    ) -> Result<ChatReply, ChatError> {
        let subject = match subject {
            Some(s) if !s.is_empty() => s,
            _ => return Err(ChatError::Unauthorized),
        };

        let decision = self
            .rate_guard
            .admit(subject)
            .map_err(|e| ChatError::Internal(e.to_string()))?;
        if !decision.allowed {
            return Err(ChatError::RateLimited {
                retry_after_ms: decision.retry_after_ms.unwrap_or(0),
            });
        }

        let persona = persona.ok_or_else(|| {
            ChatError::NotFound("no companion record for this conversation".to_string())
        })?;

        let key = ConversationKey::new(&persona.name, &self.model_name, subject);

        let assembled = self
            .assembler
            .build(persona, &key, &request.prompt)
            .await
            .map_err(|e| ChatError::Internal(e.to_string()))?;

        let reply = generator
            .generate(&assembled.prompt)
            .await
            .map_err(|e| ChatError::Generation(e.to_string()))?;

        // Recording runs on its own task so caller cancellation cannot drop
        // it mid-write; the handle is awaited for callers that stay.
        let assembler = Arc::clone(&self.assembler);
        let record_persona = persona.clone();
        let record_key = key.clone();
        let user_turn = request.prompt.clone();
        let reply_text = reply.clone();
        let record = tokio::spawn(async move {
            assembler
                .record_exchange(&record_persona, &record_key, &user_turn, &reply_text)
                .await;
        });
        if let Err(e) = record.await {
            warn!("Exchange recording task failed for {}: {}", key, e);
        }

        info!("Replied for {} ({} chars)", key, reply.len());
        Ok(ChatReply { reply })
    }
}
