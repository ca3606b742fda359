use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::{Document, IngestionStatus},
            document_chunk::DocumentChunk,
            graph_entity::GraphEntity,
            manifest::{PageExtraction, PageOutcome, TableColumn, TableData},
            page::Page,
        },
    },
    utils::embedding::EmbeddingProvider,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    embedding_indexer::EmbeddingIndexer,
    extraction::PageExtractor,
    graph_indexer::{ChunkGraphFragment, EntityExtractor, GraphIndexer, RuleBasedEntityExtractor},
    reader::{DocumentReader, RawDocument, RawPage},
};

use super::{IngestionPipeline, IngestionTuning};

const CORRUPT_MARKER: &str = "[corrupt]";

struct FixtureReader {
    documents: HashMap<PathBuf, RawDocument>,
}

#[async_trait]
impl DocumentReader for FixtureReader {
    async fn read(&self, path: &Path) -> Result<RawDocument, AppError> {
        self.documents
            .get(path)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no document at {}", path.display())))
    }
}

/// Extraction stand-in: the page text is the extraction. A page whose text
/// carries the corrupt marker fails permanently, and a page mentioning
/// "Revenue table" grows a small revenue table.
struct TextExtractor;

#[async_trait]
impl PageExtractor for TextExtractor {
    async fn extract(
        &self,
        _page_image_png: &[u8],
        page_text: &str,
    ) -> Result<PageExtraction, AppError> {
        if page_text.contains(CORRUPT_MARKER) {
            return Err(AppError::LLMParsing("unreadable page".to_string()));
        }

        let tables = if page_text.contains("Revenue table") {
            vec![TableData {
                title: Some("Revenue".into()),
                notes: None,
                columns: vec![
                    TableColumn {
                        name: "Quarter".into(),
                        values: vec![json!("Q1"), json!("Q2")],
                    },
                    TableColumn {
                        name: "Amount".into(),
                        values: vec![json!(100), json!(120)],
                    },
                ],
            }]
        } else {
            Vec::new()
        };

        Ok(PageExtraction {
            tables,
            charts: Vec::new(),
            narrative_text: page_text.to_owned(),
        })
    }
}

fn page(page_number: u32, text: &str) -> RawPage {
    RawPage {
        page_number,
        image_png: vec![0x89, 0x50, 0x4e, 0x47],
        text: text.to_owned(),
    }
}

fn report_document() -> RawDocument {
    RawDocument {
        source_path: "reports/q2.pdf".into(),
        bytes: b"q2 report source bytes".to_vec(),
        pages: vec![
            page(1, "Acme Corp summarises a strong quarter. Revenue table follows."),
            page(2, "Margins held steady across Product Lines."),
            page(3, "Outlook by Jane Doe remains positive."),
        ],
    }
}

async fn pipeline_with_entities(
    documents: Vec<(&str, RawDocument)>,
    entity_extractor: Arc<dyn EntityExtractor>,
    tuning: IngestionTuning,
) -> (IngestionPipeline, Arc<SurrealDbClient>) {
    let database = Uuid::new_v4().to_string();
    let db = Arc::new(
        SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb"),
    );

    let documents = documents
        .into_iter()
        .map(|(path, doc)| (PathBuf::from(path), doc))
        .collect();

    let pipeline = IngestionPipeline::new(
        db.clone(),
        Arc::new(FixtureReader { documents }),
        Arc::new(TextExtractor),
        EmbeddingIndexer::new(db.clone(), EmbeddingProvider::new_hashed(8)),
        GraphIndexer::new(db.clone(), entity_extractor).with_retry(3, 1),
        tuning,
    );

    (pipeline, db)
}

async fn pipeline_with(
    documents: Vec<(&str, RawDocument)>,
) -> (IngestionPipeline, Arc<SurrealDbClient>) {
    pipeline_with_entities(
        documents,
        Arc::new(RuleBasedEntityExtractor),
        IngestionTuning {
            extraction_attempts: 1,
            extraction_base_delay_ms: 1,
            ..IngestionTuning::default()
        },
    )
    .await
}

#[tokio::test]
async fn test_full_ingestion_produces_chunks_embeddings_and_graph() {
    let (pipeline, db) = pipeline_with(vec![("reports/q2.pdf", report_document())]).await;

    let report = pipeline.ingest(&["reports/q2.pdf"]).await;

    assert_eq!(report.succeeded.len(), 1);
    assert!(report.failed.is_empty());
    assert!(!report.has_failures());

    let summary = &report.succeeded[0];
    assert_eq!(summary.pages_total, 3);
    assert!(summary.chunks_new > 0);

    let chunks = DocumentChunk::find_by_document_id(&summary.document_id, &db)
        .await
        .expect("Failed to fetch chunks");
    assert_eq!(chunks.len(), summary.chunks_new);
    assert!(
        chunks
            .iter()
            .all(|c| c.embedding_model_id.as_deref() == Some("hashed@8")),
        "Every chunk carries an embedding under the active model"
    );
    assert!(chunks.iter().any(|c| c.content.contains("Quarter: Q2")));

    let entities = db
        .get_all_stored_items::<GraphEntity>()
        .await
        .expect("Failed to fetch entities");
    assert!(entities.iter().any(|e| e.name == "Acme Corp"));

    assert!(Document::is_complete(&summary.document_id, &db)
        .await
        .expect("Failed to check status"));
}

#[tokio::test]
async fn test_failed_page_does_not_abort_the_document() {
    let mut document = report_document();
    document.pages[1].text = format!("{CORRUPT_MARKER} scanner noise");
    let (pipeline, db) = pipeline_with(vec![("reports/q2.pdf", document)]).await;

    let report = pipeline.ingest(&["reports/q2.pdf"]).await;

    assert_eq!(report.succeeded.len(), 1);
    let summary = &report.succeeded[0];
    assert_eq!(summary.pages_failed.len(), 1);
    assert_eq!(summary.pages_failed[0].0, 2);

    // Pages 1 and 3 were still indexed.
    let chunks = DocumentChunk::find_by_document_id(&summary.document_id, &db)
        .await
        .expect("Failed to fetch chunks");
    let pages_with_chunks: std::collections::HashSet<u32> =
        chunks.iter().map(|c| c.page_number).collect();
    assert!(pages_with_chunks.contains(&1));
    assert!(pages_with_chunks.contains(&3));
    assert!(!pages_with_chunks.contains(&2));

    // The document completes with the failure carried on the page record.
    assert!(Document::is_complete(&summary.document_id, &db)
        .await
        .expect("Failed to check status"));
    let pages = Page::find_by_document_id(&summary.document_id, &db)
        .await
        .expect("Failed to fetch pages");
    let failed_page = pages.iter().find(|p| p.page_number == 2).expect("page 2");
    assert_eq!(failed_page.status, IngestionStatus::Failed);
    assert!(failed_page.error.is_some());

    // The manifest records both outcomes.
    assert_eq!(
        report
            .manifest
            .pages
            .iter()
            .filter(|p| p.outcome == PageOutcome::Failed)
            .count(),
        1
    );
    assert_eq!(
        report
            .manifest
            .pages
            .iter()
            .filter(|p| p.outcome == PageOutcome::Complete)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_reingesting_unchanged_document_is_a_no_op() {
    let (pipeline, db) = pipeline_with(vec![("reports/q2.pdf", report_document())]).await;

    let first = pipeline.ingest(&["reports/q2.pdf"]).await;
    assert_eq!(first.succeeded.len(), 1);
    let document_id = first.succeeded[0].document_id.clone();

    let chunks_before = DocumentChunk::find_by_document_id(&document_id, &db)
        .await
        .expect("Failed to fetch chunks");
    let entities_before = db
        .get_all_stored_items::<GraphEntity>()
        .await
        .expect("Failed to fetch entities");

    let second = pipeline.ingest(&["reports/q2.pdf"]).await;
    assert!(second.succeeded.is_empty());
    assert_eq!(second.skipped, vec!["reports/q2.pdf".to_string()]);

    let chunks_after = DocumentChunk::find_by_document_id(&document_id, &db)
        .await
        .expect("Failed to fetch chunks");
    let entities_after = db
        .get_all_stored_items::<GraphEntity>()
        .await
        .expect("Failed to fetch entities");
    assert_eq!(chunks_before.len(), chunks_after.len());
    assert_eq!(entities_before.len(), entities_after.len());
}

#[tokio::test]
async fn test_transient_entity_extraction_does_not_fail_the_document() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyEntityExtractor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntityExtractor for FlakyEntityExtractor {
        async fn extract(&self, content: &str) -> Result<ChunkGraphFragment, AppError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "transient timeout",
                )));
            }
            RuleBasedEntityExtractor.extract(content).await
        }
    }

    let (pipeline, db) = pipeline_with_entities(
        vec![("reports/q2.pdf", report_document())],
        Arc::new(FlakyEntityExtractor {
            calls: AtomicUsize::new(0),
        }),
        IngestionTuning {
            extraction_attempts: 1,
            extraction_base_delay_ms: 1,
            ..IngestionTuning::default()
        },
    )
    .await;

    let report = pipeline.ingest(&["reports/q2.pdf"]).await;

    assert!(report.failed.is_empty(), "failed: {:?}", report.failed);
    assert_eq!(report.succeeded.len(), 1);
    assert!(report.graph_entities > 0);
    assert!(Document::is_complete(&report.succeeded[0].document_id, &db)
        .await
        .expect("Failed to check status"));
}

#[tokio::test]
async fn test_failed_document_is_marked_failed() {
    // An overlap equal to the chunk capacity is rejected at chunking time,
    // which fails the document after its record was created.
    let (pipeline, db) = pipeline_with_entities(
        vec![("reports/q2.pdf", report_document())],
        Arc::new(RuleBasedEntityExtractor),
        IngestionTuning {
            extraction_attempts: 1,
            extraction_base_delay_ms: 1,
            chunk_max_chars: 100,
            chunk_overlap_chars: 100,
        },
    )
    .await;

    let report = pipeline.ingest(&["reports/q2.pdf"]).await;

    assert!(report.succeeded.is_empty());
    assert_eq!(report.failed.len(), 1);

    let document_id = common::utils::identity::document_id(b"q2 report source bytes");
    let stored: Option<Document> = db.get_item(&document_id).await.expect("Fetch failed");
    let stored = stored.expect("document record");
    assert_eq!(stored.status, IngestionStatus::Failed);
}

#[tokio::test]
async fn test_unreadable_document_is_isolated_from_the_batch() {
    let (pipeline, _db) = pipeline_with(vec![("reports/q2.pdf", report_document())]).await;

    let report = pipeline.ingest(&["reports/missing.pdf", "reports/q2.pdf"]).await;

    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "reports/missing.pdf");
}

#[tokio::test]
async fn test_manifest_replay_rebuilds_the_same_chunks() {
    let (pipeline, db) = pipeline_with(vec![("reports/q2.pdf", report_document())]).await;
    let report = pipeline.ingest(&["reports/q2.pdf"]).await;
    let document_id = report.succeeded[0].document_id.clone();

    let original: Vec<String> = DocumentChunk::find_by_document_id(&document_id, &db)
        .await
        .expect("Failed to fetch chunks")
        .into_iter()
        .map(|c| c.id)
        .collect();

    // Replay the manifest into a fresh database.
    let (replayer, fresh_db) = pipeline_with(vec![]).await;
    let replay = replayer.ingest_manifest(&report.manifest).await;

    assert_eq!(replay.succeeded.len(), 1);
    let replayed: Vec<String> = DocumentChunk::find_by_document_id(&document_id, &fresh_db)
        .await
        .expect("Failed to fetch chunks")
        .into_iter()
        .map(|c| c.id)
        .collect();

    assert_eq!(original, replayed, "Replay is content-addressed");
    assert!(Document::is_complete(&document_id, &fresh_db)
        .await
        .expect("Failed to check status"));
}
