use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document_chunk::DocumentChunk},
    utils::embedding::EmbeddingProvider,
};
use tracing::{instrument, trace};

use crate::{candidate::RetrievalCandidate, scoring::clamp_unit};

/// Nearest-neighbour retrieval over the chunk HNSW index.
///
/// Only chunks embedded under the active model id participate; vectors from
/// different models are never compared. An empty result is a valid outcome.
pub struct VectorRetriever {
    db: Arc<SurrealDbClient>,
    provider: EmbeddingProvider,
    top_k: usize,
    similarity_threshold: f32,
}

impl VectorRetriever {
    pub fn new(
        db: Arc<SurrealDbClient>,
        provider: EmbeddingProvider,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            db,
            provider,
            top_k,
            similarity_threshold,
        }
    }

    #[instrument(skip(self, query), fields(top_k = self.top_k))]
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievalCandidate>, AppError> {
        let query_embedding = self.provider.embed(query).await?;
        let model_code = self.provider.model_code();

        let rows = DocumentChunk::knn(query_embedding, &model_code, self.top_k, &self.db).await?;

        trace!(returned = rows.len(), "knn query finished");

        let candidates = rows
            .into_iter()
            .filter_map(|(chunk, distance)| {
                // Cosine distance, so similarity is its complement.
                let similarity = clamp_unit(1.0 - distance);
                if similarity < self.similarity_threshold {
                    return None;
                }
                Some(RetrievalCandidate::new(chunk).with_vector_score(similarity))
            })
            .collect();

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::document_chunk::ChunkKind;
    use uuid::Uuid;

    async fn memory_db() -> Arc<SurrealDbClient> {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.build_indexes(8).await.expect("Failed to build indexes");
        Arc::new(db)
    }

    async fn store_embedded(db: &SurrealDbClient, provider: &EmbeddingProvider, content: &str, ordinal: u32) {
        let chunk = DocumentChunk::new(
            "doc-1".into(),
            1,
            ChunkKind::Text,
            ordinal,
            content.into(),
            (0, content.len() as u32),
            None,
        );
        chunk.upsert_checked(db).await.expect("Store failed");
        let vector = provider.embed(content).await.expect("Embed failed");
        DocumentChunk::set_embedding(&chunk.id, vector, &provider.model_code(), db)
            .await
            .expect("Backfill failed");
    }

    #[tokio::test]
    async fn test_retrieves_similar_chunks_in_order() {
        let db = memory_db().await;
        let provider = EmbeddingProvider::new_hashed(8);

        store_embedded(&db, &provider, "quarterly revenue grew strongly", 0).await;
        store_embedded(&db, &provider, "the cafeteria menu changed", 1).await;

        let retriever = VectorRetriever::new(db, provider, 8, 0.1);
        let candidates = retriever
            .retrieve("revenue growth by quarter")
            .await
            .expect("Retrieve failed");

        assert!(!candidates.is_empty());
        assert!(candidates[0].chunk.content.contains("revenue"));
        let scores: Vec<f32> = candidates
            .iter()
            .map(|c| c.scores.vector.unwrap())
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]), "descending order");
    }

    #[tokio::test]
    async fn test_similarity_threshold_filters_distant_chunks() {
        let db = memory_db().await;
        let provider = EmbeddingProvider::new_hashed(8);

        let query = "revenue growth by quarter";
        let query_vec = provider.embed(query).await.expect("Embed failed");

        let near = DocumentChunk::new(
            "doc-1".into(),
            1,
            ChunkKind::Text,
            0,
            "revenue summary".into(),
            (0, 15),
            None,
        );
        near.upsert_checked(&db).await.expect("Store failed");
        DocumentChunk::set_embedding(&near.id, query_vec.clone(), &provider.model_code(), &db)
            .await
            .expect("Backfill failed");

        // Swap-and-negate around the largest component gives a nonzero vector
        // orthogonal to the query, so its similarity is exactly zero.
        let i = query_vec
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let j = (i + 1) % query_vec.len();
        let mut far_vec = vec![0.0; query_vec.len()];
        far_vec[i] = query_vec[j];
        far_vec[j] = -query_vec[i];
        let far = DocumentChunk::new(
            "doc-1".into(),
            1,
            ChunkKind::Text,
            1,
            "cafeteria menu".into(),
            (0, 14),
            None,
        );
        far.upsert_checked(&db).await.expect("Store failed");
        DocumentChunk::set_embedding(&far.id, far_vec, &provider.model_code(), &db)
            .await
            .expect("Backfill failed");

        let retriever = VectorRetriever::new(db, provider, 8, 0.5);
        let candidates = retriever.retrieve(query).await.expect("Retrieve failed");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].chunk.id, near.id);
        assert!((candidates[0].scores.vector.unwrap() - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_stale_model_vectors_are_excluded() {
        let db = memory_db().await;
        let provider = EmbeddingProvider::new_hashed(8);

        let content = "quarterly revenue grew strongly";
        let chunk = DocumentChunk::new(
            "doc-1".into(),
            1,
            ChunkKind::Text,
            0,
            content.into(),
            (0, content.len() as u32),
            None,
        );
        chunk.upsert_checked(&db).await.expect("Store failed");
        let vector = provider.embed(content).await.expect("Embed failed");
        // Vector stored under a retired model id must not match.
        DocumentChunk::set_embedding(&chunk.id, vector, "retired-model", &db)
            .await
            .expect("Backfill failed");

        let retriever = VectorRetriever::new(db, provider, 8, 0.0);
        let candidates = retriever
            .retrieve("revenue growth")
            .await
            .expect("Retrieve failed");
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty() {
        let db = memory_db().await;
        let retriever = VectorRetriever::new(db, EmbeddingProvider::new_hashed(8), 8, 0.35);
        let candidates = retriever.retrieve("anything").await.expect("Retrieve failed");
        assert!(candidates.is_empty());
    }
}
