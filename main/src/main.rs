use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use common::{
    storage::db::SurrealDbClient,
    utils::{
        config::{get_config, AppConfig},
        embedding::{EmbeddingBackend, EmbeddingProvider},
    },
};
use ingestion_pipeline::{
    embedding_indexer::EmbeddingIndexer,
    extraction::VlmExtractor,
    graph_indexer::{GraphIndexer, LlmEntityExtractor},
    reader::PageDirectoryReader,
    IngestionPipeline, IngestionReport, IngestionTuning,
};
use retrieval_pipeline::{
    answer::{AnswerGenerator, OpenAiAnswerGenerator},
    RetrievalPipeline, RetrievalTuning,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "arkiv", about = "Document ingestion and hybrid retrieval")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest documents: extract pages, chunk, embed, and index them.
    Ingest {
        /// Document paths, each with a pre-rendered `<name>.pages/` directory.
        paths: Vec<PathBuf>,
        /// Where to write the extraction manifest.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Re-index from a saved extraction manifest without calling the
    /// extraction backend.
    Replay { manifest: PathBuf },
    /// Embed stored chunks that lack a vector under the active model.
    Backfill,
    /// Ask a question against the ingested corpus.
    Query {
        question: String,
        /// Print the assembled context instead of generating an answer.
        #[arg(long)]
        context_only: bool,
    },
}

struct Runtime {
    config: AppConfig,
    db: Arc<SurrealDbClient>,
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    provider: EmbeddingProvider,
}

impl Runtime {
    async fn bootstrap() -> anyhow::Result<Self> {
        let config = get_config().context("loading configuration")?;

        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await
            .context("connecting to SurrealDB")?,
        );

        let openai_client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));

        let backend: EmbeddingBackend = config.embedding_backend.parse()?;
        let provider = match backend {
            EmbeddingBackend::OpenAI => EmbeddingProvider::new_openai(
                openai_client.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
            ),
            EmbeddingBackend::FastEmbed => EmbeddingProvider::new_fastembed(None).await?,
            EmbeddingBackend::Hashed => {
                EmbeddingProvider::new_hashed(config.embedding_dimensions as usize)
            }
        };

        db.build_indexes(provider.dimension() as u32)
            .await
            .context("building database indexes")?;

        info!(
            backend = provider.backend_label(),
            model = %provider.model_code(),
            dimension = provider.dimension(),
            "embedding provider initialized"
        );

        Ok(Self {
            config,
            db,
            openai_client,
            provider,
        })
    }

    fn ingestion_pipeline(&self) -> IngestionPipeline {
        IngestionPipeline::new(
            self.db.clone(),
            Arc::new(PageDirectoryReader),
            Arc::new(VlmExtractor::new(
                self.openai_client.clone(),
                self.config.vlm_model.clone(),
            )),
            self.embedding_indexer(),
            GraphIndexer::new(
                self.db.clone(),
                Arc::new(LlmEntityExtractor::new(
                    self.openai_client.clone(),
                    self.config.vlm_model.clone(),
                )),
            ),
            IngestionTuning {
                chunk_max_chars: self.config.chunk_max_chars,
                chunk_overlap_chars: self.config.chunk_overlap_chars,
                ..IngestionTuning::default()
            },
        )
    }

    fn embedding_indexer(&self) -> EmbeddingIndexer {
        EmbeddingIndexer::new(self.db.clone(), self.provider.clone())
    }

    fn retrieval_pipeline(&self) -> RetrievalPipeline {
        RetrievalPipeline::new(
            self.db.clone(),
            self.provider.clone(),
            RetrievalTuning::from_config(&self.config),
        )
    }

    async fn manifest_path(&self, explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path);
        }
        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .context("creating data directory")?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        Ok(PathBuf::from(&self.config.data_dir).join(format!("manifest-{stamp}.json")))
    }
}

fn log_report(report: &IngestionReport) {
    for summary in &report.succeeded {
        info!(
            document_id = %summary.document_id,
            source = %summary.source_path,
            pages = summary.pages_total,
            pages_failed = summary.pages_failed.len(),
            chunks_new = summary.chunks_new,
            chunks_existing = summary.chunks_existing,
            "document done"
        );
        for (page, error) in &summary.pages_failed {
            warn!(document_id = %summary.document_id, page, %error, "page failed");
        }
    }
    for path in &report.skipped {
        info!(%path, "already ingested, skipped");
    }
    for (path, error) in &report.failed {
        warn!(%path, %error, "document failed");
    }
    info!(
        embedded = report.chunks_embedded,
        entities = report.graph_entities,
        relationships = report.graph_relationships,
        "ingestion finished"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let runtime = Runtime::bootstrap().await?;

    match cli.command {
        Command::Ingest { paths, manifest } => {
            if paths.is_empty() {
                anyhow::bail!("no documents given");
            }
            let report = runtime.ingestion_pipeline().ingest(&paths).await;

            let manifest_path = runtime.manifest_path(manifest).await?;
            report
                .manifest
                .save(&manifest_path)
                .await
                .context("writing extraction manifest")?;
            info!(path = %manifest_path.display(), "manifest written");

            log_report(&report);
            if !report.failed.is_empty() {
                anyhow::bail!("{} document(s) failed", report.failed.len());
            }
        }
        Command::Replay { manifest } => {
            let manifest = common::storage::types::manifest::IngestionManifest::load(&manifest)
                .await
                .context("loading extraction manifest")?;
            let report = runtime.ingestion_pipeline().ingest_manifest(&manifest).await;
            log_report(&report);
            if !report.failed.is_empty() {
                anyhow::bail!("{} document(s) failed to replay", report.failed.len());
            }
        }
        Command::Backfill => {
            let report = runtime.embedding_indexer().backfill().await?;
            info!(
                embedded = report.embedded,
                skipped = report.skipped,
                failed = report.failed,
                "backfill finished"
            );
        }
        Command::Query {
            question,
            context_only,
        } => {
            let cancel = CancellationToken::new();
            let signal_guard = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal_guard.cancel();
                }
            });

            let outcome = runtime
                .retrieval_pipeline()
                .retrieve(&question, &cancel)
                .await?;

            for source in &outcome.degraded_sources {
                warn!(source = source.as_str(), "retriever unavailable for this query");
            }

            if context_only {
                println!("{}", outcome.context.rendered);
                if outcome.context.truncated {
                    warn!("context truncated to fit the token budget");
                }
            } else {
                let generator = OpenAiAnswerGenerator::new(
                    runtime.openai_client.clone(),
                    runtime.config.vlm_model.clone(),
                );
                let answer = generator.generate(&question, &outcome.context).await?;
                println!("{answer}");
            }
        }
    }

    Ok(())
}
