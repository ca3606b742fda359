#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod answer;
pub mod candidate;
pub mod context;
pub mod graph;
pub mod scoring;
pub mod table;
pub mod vector;

use std::{collections::HashMap, sync::Arc};

use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{
        config::{AppConfig, FusionWeightsConfig},
        embedding::EmbeddingProvider,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::{
    candidate::{RetrievalCandidate, SourceTag},
    context::{Context, ContextAssembler},
    graph::GraphRetriever,
    scoring::{fuse_scores, merge_candidates, min_max_normalize, sort_candidates},
    table::TableRetriever,
    vector::VectorRetriever,
};

#[derive(Debug, Clone)]
pub struct RetrievalTuning {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub graph_max_hops: u32,
    pub context_budget_tokens: usize,
    pub weights: FusionWeightsConfig,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            top_k: 8,
            similarity_threshold: 0.35,
            graph_max_hops: 2,
            context_budget_tokens: 2_800,
            weights: FusionWeightsConfig::default(),
        }
    }
}

impl RetrievalTuning {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.retrieval_top_k,
            similarity_threshold: config.similarity_threshold,
            graph_max_hops: config.graph_max_hops,
            context_budget_tokens: config.context_budget_tokens,
            weights: config.fusion_weights,
        }
    }
}

/// The full query-side result: ranked fused candidates, the budgeted context,
/// and any sources that failed and were dropped from fusion.
#[derive(Debug)]
pub struct RetrievalOutcome {
    pub candidates: Vec<RetrievalCandidate>,
    pub context: Context,
    pub degraded_sources: Vec<SourceTag>,
}

/// Fans a query out to the vector, graph, and table retrievers in parallel,
/// fuses their candidates into one ranking, and assembles the answer context.
///
/// A failing retriever degrades the outcome instead of failing the query: the
/// surviving sources are fused and the dropped source is reported.
pub struct RetrievalPipeline {
    vector: VectorRetriever,
    graph: GraphRetriever,
    table: TableRetriever,
    assembler: ContextAssembler,
    tuning: RetrievalTuning,
}

impl RetrievalPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        provider: EmbeddingProvider,
        tuning: RetrievalTuning,
    ) -> Self {
        Self {
            vector: VectorRetriever::new(
                db.clone(),
                provider,
                tuning.top_k,
                tuning.similarity_threshold,
            ),
            graph: GraphRetriever::new(db.clone(), tuning.graph_max_hops),
            table: TableRetriever::new(db.clone()),
            assembler: ContextAssembler::new(db, tuning.context_budget_tokens),
            tuning,
        }
    }

    #[instrument(skip(self, cancel), fields(query_len = query.len()))]
    pub async fn retrieve(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<RetrievalOutcome, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let terms = query_terms(query);

        let (vector_result, graph_result, table_result) = tokio::select! {
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            results = async {
                tokio::join!(
                    self.vector.retrieve(query),
                    self.graph.retrieve(&terms),
                    self.table.retrieve(&terms),
                )
            } => results,
        };

        let mut degraded_sources = Vec::new();
        let vector = collect_source(vector_result, SourceTag::Vector, &mut degraded_sources);
        let graph = collect_source(graph_result, SourceTag::Graph, &mut degraded_sources);
        let table = collect_source(table_result, SourceTag::Table, &mut degraded_sources);

        debug!(
            vector = vector.len(),
            graph = graph.len(),
            table = table.len(),
            degraded = degraded_sources.len(),
            "retriever fan-out finished"
        );

        let mut accumulator: HashMap<String, RetrievalCandidate> = HashMap::new();
        merge_candidates(&mut accumulator, normalize_source(vector, SourceTag::Vector));
        merge_candidates(&mut accumulator, normalize_source(graph, SourceTag::Graph));
        merge_candidates(&mut accumulator, normalize_source(table, SourceTag::Table));

        let mut candidates: Vec<RetrievalCandidate> = accumulator.into_values().collect();
        for candidate in &mut candidates {
            candidate.fused = fuse_scores(&candidate.scores, &self.tuning.weights);
        }
        sort_candidates(&mut candidates);
        candidates.truncate(self.tuning.top_k);

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let context = self.assembler.assemble(candidates.clone()).await?;

        Ok(RetrievalOutcome {
            candidates,
            context,
            degraded_sources,
        })
    }
}

fn collect_source(
    result: Result<Vec<RetrievalCandidate>, AppError>,
    tag: SourceTag,
    degraded: &mut Vec<SourceTag>,
) -> Vec<RetrievalCandidate> {
    match result {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(source = tag.as_str(), error = %err, "retriever failed, degrading");
            degraded.push(tag);
            Vec::new()
        }
    }
}

/// Rescales one source's raw scores into [0, 1] before fusion, so the fused
/// ranking compares signal strength within each source rather than raw
/// magnitudes across sources.
fn normalize_source(
    mut candidates: Vec<RetrievalCandidate>,
    tag: SourceTag,
) -> Vec<RetrievalCandidate> {
    let raw: Vec<f32> = candidates
        .iter()
        .map(|c| match tag {
            SourceTag::Vector => c.scores.vector.unwrap_or(0.0),
            SourceTag::Graph => c.scores.graph.unwrap_or(0.0),
            SourceTag::Table => c.scores.table.unwrap_or(0.0),
        })
        .collect();
    let normalized = min_max_normalize(&raw);

    for (candidate, score) in candidates.iter_mut().zip(normalized) {
        match tag {
            SourceTag::Vector => candidate.scores.vector = Some(score),
            SourceTag::Graph => candidate.scores.graph = Some(score),
            SourceTag::Table => candidate.scores.table = Some(score),
        }
    }
    candidates
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from", "how",
    "in", "is", "it", "of", "on", "or", "the", "to", "was", "were", "what", "when", "where",
    "which", "who", "why", "with",
];

/// Lowercased unigrams (minus stopwords) plus bigrams and trigrams, so
/// multi-word entity names like "acme corp" seed the graph walk.
pub fn query_terms(query: &str) -> Vec<String> {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    let mut terms: Vec<String> = Vec::new();
    let mut push = |term: String| {
        if !terms.contains(&term) {
            terms.push(term);
        }
    };

    for word in &words {
        if !STOPWORDS.contains(&word.as_str()) {
            push(word.clone());
        }
    }
    for pair in words.windows(2) {
        push(pair.join(" "));
    }
    for triple in words.windows(3) {
        push(triple.join(" "));
    }

    terms
}
