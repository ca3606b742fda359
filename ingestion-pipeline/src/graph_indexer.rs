use std::{collections::HashMap, sync::Arc};

use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document_chunk::DocumentChunk,
            graph_entity::{GraphEntity, GraphEntityType},
            graph_relationship::GraphRelationship,
        },
    },
};
use serde::Deserialize;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExtractedRelationship {
    pub source: String,
    pub target: String,
    pub relationship_type: String,
}

/// Entities and relationships detected in a single chunk, still keyed by
/// surface name. The indexer resolves names to canonical node identities.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ChunkGraphFragment {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
}

#[async_trait::async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, content: &str) -> Result<ChunkGraphFragment, AppError>;
}

static GRAPH_INSTRUCTIONS: &str = r#"You extract a knowledge graph fragment from one passage of a business or technical document.

Identify the named entities the passage is actually about: organizations, people, metrics, dates or periods, products, and key concepts. Then identify the relationships the passage states between those entities.

Rules:
- Only extract entities and relationships supported by the passage text.
- Use short canonical names ("Acme Corp", not "the company Acme Corp mentioned above").
- entity_type is one of: Organization, Person, Metric, Date, Product, Concept.
- relationship_type is a short lowercase verb phrase like "reports", "owns", "measured_in".
- Both endpoints of a relationship must appear in the entities list."#;

pub struct LlmEntityExtractor {
    client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    model: String,
}

impl LlmEntityExtractor {
    pub fn new(
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: String,
    ) -> Self {
        Self { client, model }
    }

    fn graph_fragment_schema() -> serde_json::Value {
        serde_json::json!({
          "type": "object",
          "properties": {
            "entities": {
              "type": "array",
              "items": {
                "type": "object",
                "properties": {
                  "name": {"type": "string"},
                  "entity_type": {
                    "type": "string",
                    "enum": GraphEntityType::variants()
                  },
                  "description": {"type": "string"}
                },
                "required": ["name", "entity_type", "description"],
                "additionalProperties": false
              }
            },
            "relationships": {
              "type": "array",
              "items": {
                "type": "object",
                "properties": {
                  "source": {"type": "string"},
                  "target": {"type": "string"},
                  "relationship_type": {"type": "string"}
                },
                "required": ["source", "target", "relationship_type"],
                "additionalProperties": false
              }
            }
          },
          "required": ["entities", "relationships"],
          "additionalProperties": false
        })
    }
}

#[async_trait::async_trait]
impl EntityExtractor for LlmEntityExtractor {
    async fn extract(&self, content: &str) -> Result<ChunkGraphFragment, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Knowledge graph fragment for one passage".into()),
                name: "graph_fragment".into(),
                schema: Some(Self::graph_fragment_schema()),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(GRAPH_INSTRUCTIONS)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(content.to_owned())
                    .build()?
                    .into(),
            ])
            .response_format(response_format)
            .build()?;

        let response = self.client.chat().create(request).await?;

        let payload = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                AppError::LLMParsing("Graph extraction returned no content".to_string())
            })?;

        serde_json::from_str(&payload).map_err(|e| {
            AppError::LLMParsing(format!("Failed to parse graph fragment response: {e}"))
        })
    }
}

/// Deterministic, network-free extractor: proper-noun runs become entities,
/// consecutive mentions become `mentioned_with` edges. Used for offline runs
/// and as the test extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedEntityExtractor;

impl RuleBasedEntityExtractor {
    fn classify(name: &str) -> &'static str {
        let is_quarter = name.len() == 2
            && name.starts_with('Q')
            && name[1..].chars().all(|c| ('1'..='4').contains(&c));
        let is_year = name.len() == 4 && name.chars().all(|c| c.is_ascii_digit());
        if is_quarter || is_year {
            "Date"
        } else {
            "Concept"
        }
    }

    fn capitalized_runs(content: &str) -> Vec<String> {
        let mut runs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut sentence_start = true;

        for raw in content.split_whitespace() {
            let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
            let ends_sentence = raw.ends_with(['.', '!', '?', ':']);

            let capitalized = word
                .chars()
                .next()
                .is_some_and(|c| c.is_uppercase() || c.is_ascii_digit())
                && word.chars().any(|c| c.is_alphanumeric());

            if capitalized {
                current.push(word);
            } else if !current.is_empty() {
                Self::flush_run(&mut runs, &current, sentence_start);
                current.clear();
            }

            if !capitalized {
                sentence_start = ends_sentence;
            } else if ends_sentence {
                Self::flush_run(&mut runs, &current, sentence_start);
                current.clear();
                sentence_start = true;
            }
        }
        if !current.is_empty() {
            Self::flush_run(&mut runs, &current, sentence_start);
        }
        runs
    }

    // A lone sentence-initial capital is ordinary prose, not a name.
    fn flush_run(runs: &mut Vec<String>, current: &[&str], sentence_start: bool) {
        if current.len() == 1 && sentence_start {
            return;
        }
        let name = current.join(" ");
        if !name.is_empty() {
            runs.push(name);
        }
    }
}

#[async_trait::async_trait]
impl EntityExtractor for RuleBasedEntityExtractor {
    async fn extract(&self, content: &str) -> Result<ChunkGraphFragment, AppError> {
        let mut seen = Vec::new();
        for name in Self::capitalized_runs(content) {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }

        let entities: Vec<ExtractedEntity> = seen
            .iter()
            .map(|name| ExtractedEntity {
                name: name.clone(),
                entity_type: Self::classify(name).to_string(),
                description: String::new(),
            })
            .collect();

        let relationships = seen
            .windows(2)
            .map(|pair| ExtractedRelationship {
                source: pair[0].clone(),
                target: pair[1].clone(),
                relationship_type: "mentioned_with".to_string(),
            })
            .collect();

        Ok(ChunkGraphFragment {
            entities,
            relationships,
        })
    }
}

/// Builds the entity graph from chunks. Each fragment's entities are upserted
/// by canonical identity with the chunk id merged into their provenance, then
/// relationships are resolved from surface names to node ids.
///
/// Extraction failures are scoped to the chunk: transient ones are retried
/// with backoff, permanent ones skip that chunk's graph contribution while
/// the rest of the document keeps indexing.
pub struct GraphIndexer {
    db: Arc<SurrealDbClient>,
    extractor: Arc<dyn EntityExtractor>,
    extraction_attempts: usize,
    extraction_base_delay_ms: u64,
}

#[derive(Debug, Default)]
pub struct GraphReport {
    pub entities: usize,
    pub relationships: usize,
    pub chunks_failed: usize,
}

impl GraphIndexer {
    pub fn new(db: Arc<SurrealDbClient>, extractor: Arc<dyn EntityExtractor>) -> Self {
        Self {
            db,
            extractor,
            extraction_attempts: 3,
            extraction_base_delay_ms: 500,
        }
    }

    pub fn with_retry(mut self, attempts: usize, base_delay_ms: u64) -> Self {
        self.extraction_attempts = attempts;
        self.extraction_base_delay_ms = base_delay_ms;
        self
    }

    #[instrument(skip(self, chunks), fields(total = chunks.len()))]
    pub async fn index(&self, chunks: &[DocumentChunk]) -> Result<GraphReport, AppError> {
        let mut report = GraphReport::default();

        for chunk in chunks {
            if chunk.content.trim().is_empty() {
                continue;
            }
            let fragment = match self.extract_with_retry(&chunk.content).await {
                Ok(fragment) => fragment,
                Err(err) => {
                    warn!(
                        chunk_id = %chunk.id,
                        error = %err,
                        "entity extraction failed, skipping chunk"
                    );
                    report.chunks_failed += 1;
                    continue;
                }
            };
            let counts = self.apply_fragment(&fragment, &chunk.id).await?;
            report.entities += counts.entities;
            report.relationships += counts.relationships;
        }

        debug!(
            entities = report.entities,
            relationships = report.relationships,
            chunks_failed = report.chunks_failed,
            "Graph pass finished"
        );
        Ok(report)
    }

    async fn extract_with_retry(&self, content: &str) -> Result<ChunkGraphFragment, AppError> {
        let strategy = ExponentialBackoff::from_millis(self.extraction_base_delay_ms)
            .map(jitter)
            .take(self.extraction_attempts.saturating_sub(1));

        RetryIf::spawn(
            strategy,
            || self.extractor.extract(content),
            AppError::is_transient,
        )
        .await
    }

    async fn apply_fragment(
        &self,
        fragment: &ChunkGraphFragment,
        chunk_id: &str,
    ) -> Result<GraphReport, AppError> {
        let mut report = GraphReport::default();
        let mut name_to_id: HashMap<String, String> = HashMap::new();

        for extracted in &fragment.entities {
            let entity = GraphEntity::new(
                extracted.name.clone(),
                GraphEntityType::from(extracted.entity_type.clone()),
                extracted.description.clone(),
                vec![chunk_id.to_owned()],
            );
            name_to_id.insert(extracted.name.to_lowercase(), entity.id.clone());
            entity.upsert_merging_provenance(&self.db).await?;
            report.entities += 1;
        }

        for extracted in &fragment.relationships {
            let source = name_to_id.get(&extracted.source.to_lowercase());
            let target = name_to_id.get(&extracted.target.to_lowercase());
            let (Some(source), Some(target)) = (source, target) else {
                warn!(
                    source = %extracted.source,
                    target = %extracted.target,
                    "Dropping relationship with unresolved endpoint"
                );
                continue;
            };
            if source == target {
                continue;
            }

            GraphRelationship::new(
                source.clone(),
                target.clone(),
                extracted.relationship_type.clone(),
                vec![chunk_id.to_owned()],
            )
            .upsert_merging_provenance(&self.db)
            .await?;
            report.relationships += 1;
        }

        Ok(report)
    }
}
