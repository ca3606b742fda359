use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document_chunk::DocumentChunk},
    utils::embedding::EmbeddingProvider,
};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, info, instrument, warn};

const EMBED_BATCH_SIZE: usize = 32;

/// Embeds chunks and backfills the vectors onto their stored records.
///
/// Embedding never changes a chunk's identity. A chunk already carrying a
/// vector under the active model id is skipped, so re-runs only pay for new
/// or stale content.
pub struct EmbeddingIndexer {
    db: Arc<SurrealDbClient>,
    provider: EmbeddingProvider,
    attempts: usize,
    base_delay_ms: u64,
}

#[derive(Debug, Default)]
pub struct EmbeddingReport {
    pub embedded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl EmbeddingIndexer {
    pub fn new(db: Arc<SurrealDbClient>, provider: EmbeddingProvider) -> Self {
        Self {
            db,
            provider,
            attempts: 3,
            base_delay_ms: 250,
        }
    }

    pub fn with_retry(mut self, attempts: usize, base_delay_ms: u64) -> Self {
        self.attempts = attempts.max(1);
        self.base_delay_ms = base_delay_ms;
        self
    }

    pub fn model_code(&self) -> String {
        self.provider.model_code()
    }

    /// Embeds the given chunks, skipping those already current under the
    /// active model. A batch that keeps failing after retries is logged and
    /// skipped; it stays unembedded and is picked up by a later backfill.
    #[instrument(skip(self, chunks), fields(total = chunks.len(), model = %self.provider.model_code()))]
    pub async fn index(&self, chunks: &[DocumentChunk]) -> Result<EmbeddingReport, AppError> {
        let model_code = self.provider.model_code();

        let pending: Vec<&DocumentChunk> = chunks
            .iter()
            .filter(|chunk| {
                chunk.embedding.is_none()
                    || chunk.embedding_model_id.as_deref() != Some(model_code.as_str())
            })
            .collect();

        let mut report = EmbeddingReport {
            skipped: chunks.len() - pending.len(),
            ..EmbeddingReport::default()
        };

        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            match self.embed_batch_with_retry(batch).await {
                Ok(vectors) => {
                    for (chunk, vector) in batch.iter().zip(vectors) {
                        DocumentChunk::set_embedding(&chunk.id, vector, &model_code, &self.db)
                            .await?;
                        report.embedded += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        batch_size = batch.len(),
                        "Embedding batch failed after retries, leaving chunks unembedded"
                    );
                    report.failed += batch.len();
                }
            }
        }

        debug!(
            embedded = report.embedded,
            skipped = report.skipped,
            failed = report.failed,
            "Embedding pass finished"
        );
        Ok(report)
    }

    /// Finds every stored chunk lacking a vector under the active model and
    /// embeds it. This is the recovery path after a model change or a failed
    /// batch.
    #[instrument(skip(self))]
    pub async fn backfill(&self) -> Result<EmbeddingReport, AppError> {
        let stale = DocumentChunk::find_unembedded(&self.provider.model_code(), &self.db).await?;
        if stale.is_empty() {
            return Ok(EmbeddingReport::default());
        }
        info!(count = stale.len(), "Backfilling embeddings for stale chunks");
        self.index(&stale).await
    }

    async fn embed_batch_with_retry(
        &self,
        batch: &[&DocumentChunk],
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let strategy = ExponentialBackoff::from_millis(self.base_delay_ms)
            .map(jitter)
            .take(self.attempts.saturating_sub(1));

        let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();

        RetryIf::spawn(
            strategy,
            || async {
                self.provider
                    .embed_batch(texts.clone())
                    .await
                    .map_err(AppError::from)
            },
            AppError::is_transient,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::document_chunk::ChunkKind;
    use uuid::Uuid;

    async fn memory_db() -> Arc<SurrealDbClient> {
        let database = Uuid::new_v4().to_string();
        Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        )
    }

    fn chunk(content: &str, ordinal: u32) -> DocumentChunk {
        DocumentChunk::new(
            "doc-1".into(),
            1,
            ChunkKind::Text,
            ordinal,
            content.into(),
            (0, content.len() as u32),
            None,
        )
    }

    #[tokio::test]
    async fn test_index_embeds_and_backfills() {
        let db = memory_db().await;
        let indexer = EmbeddingIndexer::new(db.clone(), EmbeddingProvider::new_hashed(8));

        let chunks = vec![chunk("Revenue grew in Q2.", 0), chunk("Margins held.", 1)];
        for c in &chunks {
            c.upsert_checked(&db).await.expect("Store failed");
        }

        let report = indexer.index(&chunks).await.expect("Index failed");
        assert_eq!(report.embedded, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.failed, 0);

        let stale = DocumentChunk::find_unembedded("hashed@8", &db)
            .await
            .expect("Query failed");
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn test_already_embedded_chunks_are_skipped() {
        let db = memory_db().await;
        let indexer = EmbeddingIndexer::new(db.clone(), EmbeddingProvider::new_hashed(8));

        let chunks = vec![chunk("Revenue grew in Q2.", 0)];
        for c in &chunks {
            c.upsert_checked(&db).await.expect("Store failed");
        }
        indexer.index(&chunks).await.expect("First index failed");

        // Re-fetch so the in-memory copies carry the backfilled vectors.
        let stored = DocumentChunk::find_by_document_id("doc-1", &db)
            .await
            .expect("Fetch failed");
        let report = indexer.index(&stored).await.expect("Second index failed");
        assert_eq!(report.embedded, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_backfill_picks_up_model_change() {
        let db = memory_db().await;

        let chunks = vec![chunk("Revenue grew in Q2.", 0)];
        for c in &chunks {
            c.upsert_checked(&db).await.expect("Store failed");
        }

        let old_model = EmbeddingIndexer::new(db.clone(), EmbeddingProvider::new_hashed(8));
        old_model.index(&chunks).await.expect("Index failed");

        // Switching model dimensions makes every vector stale.
        let new_model = EmbeddingIndexer::new(db.clone(), EmbeddingProvider::new_hashed(16));
        let report = new_model.backfill().await.expect("Backfill failed");
        assert_eq!(report.embedded, 1);

        let stored = DocumentChunk::find_by_document_id("doc-1", &db)
            .await
            .expect("Fetch failed");
        assert_eq!(stored[0].embedding_model_id.as_deref(), Some("hashed@16"));
        assert_eq!(stored[0].embedding.as_ref().map(Vec::len), Some(16));
    }
}
