use crate::{error::AppError, storage::db::SurrealDbClient, stored_object, utils::identity};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Text,
    TableRow,
    ChartSummary,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::TableRow => "table_row",
            ChunkKind::ChartSummary => "chart_summary",
        }
    }
}

/// Structured metadata carried by table-row chunks so the table retriever can
/// match against titles, notes, and column names without re-parsing content.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Default)]
pub struct TableMeta {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub column_names: Vec<String>,
}

stored_object!(DocumentChunk, "document_chunk", {
    kind: ChunkKind,
    content: String,
    document_id: String,
    page_number: u32,
    ordinal: u32,
    span_start: u32,
    span_end: u32,
    table: Option<TableMeta>,
    embedding: Option<Vec<f32>>,
    embedding_model_id: Option<String>
});

// Projection row for the knn query. Flattening `DocumentChunk` here would
// route its enum field through serde's buffered deserializer, which the
// database backend rejects, so the fields are spelled out.
#[derive(Debug, Deserialize)]
struct KnnRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    #[serde(deserialize_with = "deserialize_datetime", default)]
    created_at: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_datetime", default)]
    updated_at: DateTime<Utc>,
    kind: ChunkKind,
    content: String,
    document_id: String,
    page_number: u32,
    ordinal: u32,
    span_start: u32,
    span_end: u32,
    #[serde(default)]
    table: Option<TableMeta>,
    #[serde(default)]
    embedding_model_id: Option<String>,
    distance: f32,
}

impl DocumentChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        page_number: u32,
        kind: ChunkKind,
        ordinal: u32,
        content: String,
        span: (u32, u32),
        table: Option<TableMeta>,
    ) -> Self {
        let now = Utc::now();
        let id = identity::chunk_id(&document_id, page_number, kind.as_str(), ordinal, &content);
        Self {
            id,
            created_at: now,
            updated_at: now,
            kind,
            content,
            document_id,
            page_number,
            ordinal,
            span_start: span.0,
            span_end: span.1,
            table,
            embedding: None,
            embedding_model_id: None,
        }
    }

    /// Idempotent insert guarded by the content-addressing invariant.
    ///
    /// Returns `true` when a new record was written. An existing record with
    /// identical content is left untouched (preserving any backfilled
    /// embedding); an existing record whose content differs under the same id
    /// is a data-integrity violation and is surfaced, never overwritten.
    pub async fn upsert_checked(&self, db_client: &SurrealDbClient) -> Result<bool, AppError> {
        let existing: Option<DocumentChunk> = db_client.get_item(&self.id).await?;

        match existing {
            Some(found) if found.content == self.content => Ok(false),
            Some(_) => Err(AppError::IdentityConflict(self.id.clone())),
            None => {
                db_client.store_item(self.clone()).await?;
                Ok(true)
            }
        }
    }

    /// Backfills an embedding without changing the chunk's identity.
    pub async fn set_embedding(
        id: &str,
        embedding: Vec<f32>,
        model_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db_client
            .client
            .query(
                "UPDATE type::thing($table, $id)
                SET embedding = $embedding,
                    embedding_model_id = $model_id,
                    updated_at = $updated_at",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("embedding", embedding))
            .bind(("model_id", model_id.to_string()))
            .bind(("updated_at", surrealdb::sql::Datetime::from(Utc::now())))
            .await?;

        Ok(())
    }

    /// Chunks that still need an embedding under the given model id. Chunks
    /// embedded with a different model count as unembedded: vectors from
    /// different models are never compared.
    pub async fn find_unembedded(
        model_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<DocumentChunk>, AppError> {
        let mut response = db_client
            .client
            .query(
                "SELECT * FROM document_chunk
                WHERE embedding = NONE OR embedding_model_id != $model_id
                ORDER BY id",
            )
            .bind(("model_id", model_id.to_string()))
            .await?;

        Ok(response.take(0)?)
    }

    /// The k nearest chunks under the given model id, with their cosine
    /// distance. Ties at the same distance break on chunk id so result order
    /// is stable. The embedding itself is not hauled back.
    pub async fn knn(
        query_embedding: Vec<f32>,
        model_id: &str,
        top_k: usize,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<(DocumentChunk, f32)>, AppError> {
        let knn_query = format!(
            "SELECT id, created_at, updated_at, kind, content, document_id,
                page_number, ordinal, span_start, span_end, `table`,
                embedding_model_id, vector::distance::knn() AS distance
            FROM document_chunk
            WHERE embedding_model_id = $model_id AND embedding != NONE
            AND embedding <|{top_k},40|> $query_embedding
            ORDER BY distance, id"
        );

        let mut response = db_client
            .client
            .query(knn_query)
            .bind(("model_id", model_id.to_string()))
            .bind(("query_embedding", query_embedding))
            .await?;
        let rows: Vec<KnnRow> = response.take(0)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let distance = row.distance;
                (
                    DocumentChunk {
                        id: row.id,
                        created_at: row.created_at,
                        updated_at: row.updated_at,
                        kind: row.kind,
                        content: row.content,
                        document_id: row.document_id,
                        page_number: row.page_number,
                        ordinal: row.ordinal,
                        span_start: row.span_start,
                        span_end: row.span_end,
                        table: row.table,
                        embedding: None,
                        embedding_model_id: row.embedding_model_id,
                    },
                    distance,
                )
            })
            .collect())
    }

    pub async fn find_by_document_id(
        document_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<DocumentChunk>, AppError> {
        let mut response = db_client
            .client
            .query(
                "SELECT * FROM document_chunk WHERE document_id = $document_id
                ORDER BY page_number, ordinal",
            )
            .bind(("document_id", document_id.to_string()))
            .await?;

        Ok(response.take(0)?)
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db_client
            .client
            .query("DELETE document_chunk WHERE document_id = $document_id")
            .bind(("document_id", document_id.to_string()))
            .await?;

        Ok(())
    }
}
