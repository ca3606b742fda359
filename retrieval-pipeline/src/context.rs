use std::{collections::HashMap, sync::Arc};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::Document},
};
use tracing::{instrument, trace};

use crate::candidate::RetrievalCandidate;

pub const AVG_CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub candidate: RetrievalCandidate,
    pub header: String,
}

/// The assembled answer context: ranked chunks rendered with provenance
/// headers, kept under the token budget.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub entries: Vec<ContextEntry>,
    pub rendered: String,
    pub token_estimate: usize,
    pub truncated: bool,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }
}

/// Greedy budgeted selection over ranked candidates. A chunk is taken whole
/// or not at all; assembly stops at the first chunk that does not fit and
/// marks the context truncated. Same ranked input, same context.
pub struct ContextAssembler {
    db: Arc<SurrealDbClient>,
    budget_tokens: usize,
}

impl ContextAssembler {
    pub fn new(db: Arc<SurrealDbClient>, budget_tokens: usize) -> Self {
        Self { db, budget_tokens }
    }

    #[instrument(skip(self, ranked), fields(candidates = ranked.len(), budget = self.budget_tokens))]
    pub async fn assemble(&self, ranked: Vec<RetrievalCandidate>) -> Result<Context, AppError> {
        let mut context = Context::default();
        let mut titles: HashMap<String, String> = HashMap::new();

        for candidate in ranked {
            let title = match titles.get(&candidate.chunk.document_id) {
                Some(title) => title.clone(),
                None => {
                    let title = self.document_title(&candidate.chunk.document_id).await?;
                    titles.insert(candidate.chunk.document_id.clone(), title.clone());
                    title
                }
            };

            let header = format!("[Source: {title}, page {}]", candidate.chunk.page_number);
            let entry_text = format!("{header}\n{}\n\n", candidate.chunk.content);
            let entry_tokens = estimate_tokens(&entry_text);

            if context.token_estimate + entry_tokens > self.budget_tokens {
                context.truncated = true;
                break;
            }

            context.rendered.push_str(&entry_text);
            context.token_estimate += entry_tokens;
            context.entries.push(ContextEntry { candidate, header });
        }

        trace!(
            entries = context.entries.len(),
            tokens = context.token_estimate,
            truncated = context.truncated,
            "context assembled"
        );
        Ok(context)
    }

    async fn document_title(&self, document_id: &str) -> Result<String, AppError> {
        let document: Option<Document> = self.db.get_item(document_id).await?;
        Ok(document
            .map(|d| d.source_path)
            .unwrap_or_else(|| document_id.to_owned()))
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(AVG_CHARS_PER_TOKEN)
}
