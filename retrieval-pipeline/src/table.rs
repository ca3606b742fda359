use std::{collections::HashSet, sync::Arc};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document_chunk::DocumentChunk},
};
use tracing::{instrument, trace};

use crate::candidate::RetrievalCandidate;

const EXACT_MATCH_SCORE: f32 = 1.0;
const FUZZY_MATCH_SCORE: f32 = 0.6;
const VALUE_TERM_BONUS: f32 = 0.25;

/// Structure-aware retrieval over table-row chunks.
///
/// Query terms are matched against each row's table metadata (title, notes,
/// column names); an exact metadata match scores a fixed high value so a
/// queried figure beats prose paraphrases of it. Terms found among the row's
/// own cell values break ties between rows of the same table.
pub struct TableRetriever {
    db: Arc<SurrealDbClient>,
}

impl TableRetriever {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, query_terms), fields(terms = query_terms.len()))]
    pub async fn retrieve(
        &self,
        query_terms: &[String],
    ) -> Result<Vec<RetrievalCandidate>, AppError> {
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = self
            .db
            .query("SELECT * FROM document_chunk WHERE kind = 'table_row' ORDER BY id")
            .await?;
        let rows: Vec<DocumentChunk> = response.take(0)?;
        trace!(rows = rows.len(), "table rows considered");

        let terms: Vec<String> = query_terms.iter().map(|t| t.to_lowercase()).collect();

        let mut candidates = Vec::new();
        for row in rows {
            if let Some(score) = Self::score_row(&row, &terms) {
                candidates.push(RetrievalCandidate::new(row).with_table_score(score));
            }
        }

        Ok(candidates)
    }

    fn score_row(row: &DocumentChunk, terms: &[String]) -> Option<f32> {
        let meta = row.table.as_ref()?;

        let mut exact_fields: Vec<String> = Vec::new();
        if let Some(title) = &meta.title {
            exact_fields.push(title.to_lowercase());
        }
        exact_fields.extend(meta.column_names.iter().map(|c| c.to_lowercase()));

        let fuzzy_haystack = {
            let mut text = exact_fields.join(" ");
            if let Some(notes) = &meta.notes {
                text.push(' ');
                text.push_str(&notes.to_lowercase());
            }
            text
        };

        let exact = terms.iter().any(|term| exact_fields.contains(term));
        let fuzzy = terms.iter().any(|term| fuzzy_haystack.contains(term.as_str()));

        let base = if exact {
            EXACT_MATCH_SCORE
        } else if fuzzy {
            FUZZY_MATCH_SCORE
        } else {
            return None;
        };

        let content_tokens: HashSet<String> = row
            .content
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        let value_hits = terms
            .iter()
            .filter(|term| content_tokens.contains(*term))
            .count() as f32;

        Some(base + value_hits * VALUE_TERM_BONUS)
    }
}
