use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Per-unit ingestion status. A unit (document or page) moves
/// `Pending -> Processing -> {Complete | Failed}` and never abandons the
/// batch on failure.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    #[default]
    Pending,
    Processing,
    Complete,
    Failed,
}

stored_object!(Document, "document", {
    source_path: String,
    page_count: u32,
    status: IngestionStatus
});

impl Document {
    /// `id` is the content hash of the source bytes, so re-ingesting the same
    /// file resolves to the same record.
    pub fn new(id: String, source_path: String, page_count: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            source_path,
            page_count,
            status: IngestionStatus::Pending,
        }
    }

    pub async fn set_status(
        id: &str,
        status: IngestionStatus,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db_client
            .client
            .query(
                "UPDATE type::thing($table, $id)
                SET status = $status,
                    updated_at = $updated_at",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("status", status))
            .bind(("updated_at", surrealdb::sql::Datetime::from(Utc::now())))
            .await?;

        Ok(())
    }

    /// True when this document id already finished a previous ingestion run
    /// and can be skipped entirely.
    pub async fn is_complete(id: &str, db_client: &SurrealDbClient) -> Result<bool, AppError> {
        let existing: Option<Document> = db_client.get_item(id).await?;
        Ok(matches!(
            existing,
            Some(Document {
                status: IngestionStatus::Complete,
                ..
            })
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_status_transitions_persist() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let document = Document::new("doc-hash-1".into(), "reports/q2.pdf".into(), 12);
        assert_eq!(document.status, IngestionStatus::Pending);

        db.store_item(document.clone())
            .await
            .expect("Failed to store document");

        Document::set_status(&document.id, IngestionStatus::Complete, &db)
            .await
            .expect("Failed to update status");

        assert!(Document::is_complete(&document.id, &db)
            .await
            .expect("Failed to check completion"));
        assert!(!Document::is_complete("unknown-doc", &db)
            .await
            .expect("Failed to check unknown document"));
    }
}
