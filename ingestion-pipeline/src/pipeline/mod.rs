mod state;
#[cfg(test)]
mod tests;

use std::{collections::BTreeMap, path::Path, sync::Arc};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::{Document, IngestionStatus},
            document_chunk::DocumentChunk,
            manifest::{IngestionManifest, PageExtraction, PageOutcome},
            page::Page,
        },
    },
    utils::identity,
};
use state_machines::core::GuardError;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{info, instrument, warn};

use crate::{
    chunking::{chunk_page, ChunkingConfig},
    embedding_indexer::EmbeddingIndexer,
    extraction::PageExtractor,
    graph_indexer::GraphIndexer,
    reader::{DocumentReader, RawDocument},
};

use self::state::{ready, DocumentMachine, Loaded, Ready};

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub extraction_attempts: usize,
    pub extraction_base_delay_ms: u64,
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            extraction_attempts: 3,
            extraction_base_delay_ms: 500,
            chunk_max_chars: 2_000,
            chunk_overlap_chars: 200,
        }
    }
}

impl IngestionTuning {
    fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            max_chars: self.chunk_max_chars,
            overlap_chars: self.chunk_overlap_chars,
        }
    }
}

#[derive(Debug)]
pub struct DocumentSummary {
    pub document_id: String,
    pub source_path: String,
    pub pages_total: usize,
    pub pages_failed: Vec<(u32, String)>,
    pub chunks_new: usize,
    pub chunks_existing: usize,
}

/// Outcome of one ingestion run. A document failing a page (or a whole
/// document failing to load) lands here instead of aborting the batch.
#[derive(Debug, Default)]
pub struct IngestionReport {
    pub succeeded: Vec<DocumentSummary>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub chunks_embedded: usize,
    pub graph_entities: usize,
    pub graph_relationships: usize,
    pub manifest: IngestionManifest,
}

impl IngestionReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || self.succeeded.iter().any(|d| !d.pages_failed.is_empty())
    }
}

pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    reader: Arc<dyn DocumentReader>,
    extractor: Arc<dyn PageExtractor>,
    embedding_indexer: EmbeddingIndexer,
    graph_indexer: GraphIndexer,
    tuning: IngestionTuning,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        reader: Arc<dyn DocumentReader>,
        extractor: Arc<dyn PageExtractor>,
        embedding_indexer: EmbeddingIndexer,
        graph_indexer: GraphIndexer,
        tuning: IngestionTuning,
    ) -> Self {
        Self {
            db,
            reader,
            extractor,
            embedding_indexer,
            graph_indexer,
            tuning,
        }
    }

    /// Ingests a batch of documents. Each document is isolated: a read or
    /// extraction failure marks that document (or page) failed and the batch
    /// carries on.
    #[instrument(skip_all, fields(documents = paths.len()))]
    pub async fn ingest<P: AsRef<Path>>(&self, paths: &[P]) -> IngestionReport {
        let mut report = IngestionReport::default();

        for path in paths {
            let path = path.as_ref();
            let label = path.display().to_string();

            match self.ingest_document(path, &mut report).await {
                Ok(Some(summary)) => {
                    info!(
                        document_id = %summary.document_id,
                        pages = summary.pages_total,
                        pages_failed = summary.pages_failed.len(),
                        chunks_new = summary.chunks_new,
                        "document ingested"
                    );
                    report.succeeded.push(summary);
                }
                Ok(None) => {
                    info!(path = %label, "document already complete, skipping");
                    report.skipped.push(label);
                }
                Err(err) => {
                    warn!(path = %label, error = %err, "document ingestion failed");
                    report.failed.push((label, err.to_string()));
                }
            }
        }

        report
    }

    /// Re-runs chunking and indexing from a saved manifest without touching
    /// the extraction backend. Content addressing makes the replay a no-op
    /// for anything already stored.
    #[instrument(skip_all, fields(pages = manifest.pages.len()))]
    pub async fn ingest_manifest(&self, manifest: &IngestionManifest) -> IngestionReport {
        let mut report = IngestionReport::default();

        let mut by_document: BTreeMap<&str, Vec<&common::storage::types::manifest::ManifestPage>> =
            BTreeMap::new();
        for page in &manifest.pages {
            by_document
                .entry(page.document_id.as_str())
                .or_default()
                .push(page);
        }

        for (document_id, pages) in by_document {
            match self.replay_document(document_id, &pages, &mut report).await {
                Ok(summary) => report.succeeded.push(summary),
                Err(err) => {
                    warn!(%document_id, error = %err, "manifest replay failed for document");
                    self.mark_failed(document_id).await;
                    report.failed.push((document_id.to_owned(), err.to_string()));
                }
            }
        }

        report
    }

    async fn ingest_document(
        &self,
        path: &Path,
        report: &mut IngestionReport,
    ) -> Result<Option<DocumentSummary>, AppError> {
        let machine = ready();

        let raw = self.reader.read(path).await?;
        let document_id = identity::document_id(&raw.bytes);
        let machine = Self::advance_loaded(machine)?;

        if Document::is_complete(&document_id, &self.db).await? {
            return Ok(None);
        }

        let document = Document::new(
            document_id.clone(),
            raw.source_path.clone(),
            raw.pages.len() as u32,
        );
        self.db.upsert_item(document).await?;
        Document::set_status(&document_id, IngestionStatus::Processing, &self.db).await?;

        let (chunks, summary) = match self.extract_pages(&raw, &document_id, report).await {
            Ok(extracted) => extracted,
            Err(err) => {
                machine
                    .abort()
                    .map_err(|(_, guard)| map_guard_error("abort", &guard))?;
                self.mark_failed(&document_id).await;
                return Err(err);
            }
        };
        let machine = machine
            .extract()
            .map_err(|(_, guard)| map_guard_error("extract", &guard))?;

        if let Err(err) = self.index_chunks(&chunks, report).await {
            machine
                .abort()
                .map_err(|(_, guard)| map_guard_error("abort", &guard))?;
            self.mark_failed(&document_id).await;
            return Err(err);
        }
        machine
            .index()
            .map_err(|(_, guard)| map_guard_error("index", &guard))?;

        // Partial success still completes the document; the failed pages are
        // recorded on their page records and in the manifest.
        Document::set_status(&document_id, IngestionStatus::Complete, &self.db).await?;

        Ok(Some(summary))
    }

    /// Marks the document record failed so monitoring and replay never see a
    /// dead document stuck in `Processing`. A status write error on this path
    /// is logged, not propagated.
    async fn mark_failed(&self, document_id: &str) {
        if let Err(status_err) =
            Document::set_status(document_id, IngestionStatus::Failed, &self.db).await
        {
            warn!(%document_id, error = %status_err, "failed to mark document failed");
        }
    }

    async fn extract_pages(
        &self,
        raw: &RawDocument,
        document_id: &str,
        report: &mut IngestionReport,
    ) -> Result<(Vec<DocumentChunk>, DocumentSummary), AppError> {
        let mut summary = DocumentSummary {
            document_id: document_id.to_owned(),
            source_path: raw.source_path.clone(),
            pages_total: raw.pages.len(),
            pages_failed: Vec::new(),
            chunks_new: 0,
            chunks_existing: 0,
        };
        let mut chunks = Vec::new();

        for page in &raw.pages {
            match self.extract_with_retry(&page.image_png, &page.text).await {
                Ok(extraction) => {
                    let record = Page::new(document_id.to_owned(), page.page_number)
                        .with_extraction(extraction.clone());
                    self.db.upsert_item(record).await?;
                    report.manifest.record_success(
                        &raw.source_path,
                        document_id,
                        page.page_number,
                        extraction.clone(),
                    );

                    let page_chunks = chunk_page(
                        document_id,
                        page.page_number,
                        &extraction,
                        &self.tuning.chunking(),
                    )?;
                    for chunk in page_chunks {
                        if chunk.upsert_checked(&self.db).await? {
                            summary.chunks_new += 1;
                        } else {
                            summary.chunks_existing += 1;
                        }
                        chunks.push(chunk);
                    }
                }
                Err(err) => {
                    let reason = err.to_string();
                    warn!(
                        %document_id,
                        page = page.page_number,
                        error = %reason,
                        "page extraction failed, continuing with remaining pages"
                    );
                    let record = Page::new(document_id.to_owned(), page.page_number)
                        .with_failure(reason.clone());
                    self.db.upsert_item(record).await?;
                    report.manifest.record_failure(
                        &raw.source_path,
                        document_id,
                        page.page_number,
                        &reason,
                    );
                    summary.pages_failed.push((page.page_number, reason));
                }
            }
        }

        Ok((chunks, summary))
    }

    async fn index_chunks(
        &self,
        chunks: &[DocumentChunk],
        report: &mut IngestionReport,
    ) -> Result<(), AppError> {
        let embedding = self.embedding_indexer.index(chunks).await?;
        report.chunks_embedded += embedding.embedded;

        let graph = self.graph_indexer.index(chunks).await?;
        report.graph_entities += graph.entities;
        report.graph_relationships += graph.relationships;

        Ok(())
    }

    async fn replay_document(
        &self,
        document_id: &str,
        pages: &[&common::storage::types::manifest::ManifestPage],
        report: &mut IngestionReport,
    ) -> Result<DocumentSummary, AppError> {
        let source_path = pages
            .first()
            .map(|p| p.document_path.clone())
            .unwrap_or_default();
        let page_count = pages.iter().map(|p| p.page_number).max().unwrap_or(0);

        let document = Document::new(document_id.to_owned(), source_path.clone(), page_count);
        self.db.upsert_item(document).await?;
        Document::set_status(document_id, IngestionStatus::Processing, &self.db).await?;

        let mut summary = DocumentSummary {
            document_id: document_id.to_owned(),
            source_path,
            pages_total: pages.len(),
            pages_failed: Vec::new(),
            chunks_new: 0,
            chunks_existing: 0,
        };
        let mut chunks = Vec::new();

        for page in pages {
            match (page.outcome, &page.extraction) {
                (PageOutcome::Complete, Some(extraction)) => {
                    let record = Page::new(document_id.to_owned(), page.page_number)
                        .with_extraction(extraction.clone());
                    self.db.upsert_item(record).await?;

                    let page_chunks = chunk_page(
                        document_id,
                        page.page_number,
                        extraction,
                        &self.tuning.chunking(),
                    )?;
                    for chunk in page_chunks {
                        if chunk.upsert_checked(&self.db).await? {
                            summary.chunks_new += 1;
                        } else {
                            summary.chunks_existing += 1;
                        }
                        chunks.push(chunk);
                    }
                }
                _ => {
                    let reason = page
                        .error
                        .clone()
                        .unwrap_or_else(|| "extraction missing from manifest".to_owned());
                    let record = Page::new(document_id.to_owned(), page.page_number)
                        .with_failure(reason.clone());
                    self.db.upsert_item(record).await?;
                    summary.pages_failed.push((page.page_number, reason));
                }
            }
        }

        let embedding = self.embedding_indexer.index(&chunks).await?;
        report.chunks_embedded += embedding.embedded;
        let graph = self.graph_indexer.index(&chunks).await?;
        report.graph_entities += graph.entities;
        report.graph_relationships += graph.relationships;

        Document::set_status(document_id, IngestionStatus::Complete, &self.db).await?;
        Ok(summary)
    }

    async fn extract_with_retry(
        &self,
        image_png: &[u8],
        page_text: &str,
    ) -> Result<PageExtraction, AppError> {
        let strategy = ExponentialBackoff::from_millis(self.tuning.extraction_base_delay_ms)
            .map(jitter)
            .take(self.tuning.extraction_attempts.saturating_sub(1));

        RetryIf::spawn(
            strategy,
            || self.extractor.extract(image_png, page_text),
            AppError::is_transient,
        )
        .await
    }

    fn advance_loaded(
        machine: DocumentMachine<(), Ready>,
    ) -> Result<DocumentMachine<(), Loaded>, AppError> {
        machine
            .load()
            .map_err(|(_, guard)| map_guard_error("load", &guard))
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid document pipeline transition during {event}: {guard:?}"
    ))
}
