use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{document::IngestionStatus, manifest::PageExtraction},
    },
    stored_object,
    utils::identity,
};

stored_object!(Page, "page", {
    document_id: String,
    page_number: u32,
    status: IngestionStatus,
    error: Option<String>,
    extraction: Option<PageExtraction>
});

impl Page {
    pub fn new(document_id: String, page_number: u32) -> Self {
        let now = Utc::now();
        Self {
            id: identity::page_id(&document_id, page_number),
            created_at: now,
            updated_at: now,
            document_id,
            page_number,
            status: IngestionStatus::Pending,
            error: None,
            extraction: None,
        }
    }

    pub fn with_extraction(mut self, extraction: PageExtraction) -> Self {
        self.status = IngestionStatus::Complete;
        self.extraction = Some(extraction);
        self
    }

    pub fn with_failure(mut self, error: String) -> Self {
        self.status = IngestionStatus::Failed;
        self.error = Some(error);
        self
    }

    pub async fn find_by_document_id(
        document_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<Page>, AppError> {
        let mut response = db_client
            .client
            .query("SELECT * FROM page WHERE document_id = $document_id ORDER BY page_number")
            .bind(("document_id", document_id.to_string()))
            .await?;

        Ok(response.take(0)?)
    }
}
