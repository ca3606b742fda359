use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document_chunk::DocumentChunk, graph_entity::GraphEntity,
            graph_relationship::GraphRelationship,
        },
    },
};
use tracing::{instrument, trace};

use crate::{candidate::RetrievalCandidate, scoring::clamp_unit};

const PATH_CORROBORATION_BONUS: f32 = 0.05;
const MAX_EXTRA_PATHS: f32 = 3.0;

#[derive(Debug, Clone, Copy)]
struct Reach {
    hops: u32,
    paths: u32,
}

/// Entity-graph retrieval: seed entities named in the query, walk the
/// relationship graph outwards up to `max_hops`, and surface the chunks each
/// reached entity cites as provenance.
///
/// Closer entities score higher; an entity reachable over several distinct
/// paths gets a small corroboration bump. The visited set makes traversal
/// terminate on cyclic graphs.
pub struct GraphRetriever {
    db: Arc<SurrealDbClient>,
    max_hops: u32,
}

impl GraphRetriever {
    pub fn new(db: Arc<SurrealDbClient>, max_hops: u32) -> Self {
        Self { db, max_hops }
    }

    #[instrument(skip(self, query_terms), fields(terms = query_terms.len(), max_hops = self.max_hops))]
    pub async fn retrieve(
        &self,
        query_terms: &[String],
    ) -> Result<Vec<RetrievalCandidate>, AppError> {
        let seeds = GraphEntity::find_by_names(query_terms.to_vec(), &self.db).await?;
        if seeds.is_empty() {
            return Ok(Vec::new());
        }
        trace!(seeds = seeds.len(), "graph traversal seeded");

        let reached = self.traverse(&seeds).await?;

        // Provenance: every reached entity contributes its chunks at its own
        // score; a chunk cited by several entities keeps the best score.
        let mut chunk_scores: HashMap<String, f32> = HashMap::new();
        let mut entity_chunks: HashMap<&str, &Vec<String>> = HashMap::new();
        for seed in &seeds {
            entity_chunks.insert(seed.id.as_str(), &seed.chunk_ids);
        }

        for (entity_id, reach) in &reached {
            let score = Self::score(*reach);
            let chunk_ids = match entity_chunks.get(entity_id.as_str()) {
                Some(ids) => (*ids).clone(),
                None => {
                    let entity: Option<GraphEntity> = self.db.get_item(entity_id).await?;
                    entity.map(|e| e.chunk_ids).unwrap_or_default()
                }
            };
            for chunk_id in chunk_ids {
                let slot = chunk_scores.entry(chunk_id).or_insert(0.0);
                *slot = slot.max(score);
            }
        }

        let mut candidates = Vec::new();
        let mut ids: Vec<(String, f32)> = chunk_scores.into_iter().collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        for (chunk_id, score) in ids {
            let chunk: Option<DocumentChunk> = self.db.get_item(&chunk_id).await?;
            if let Some(chunk) = chunk {
                candidates.push(RetrievalCandidate::new(chunk).with_graph_score(score));
            }
        }

        Ok(candidates)
    }

    async fn traverse(&self, seeds: &[GraphEntity]) -> Result<HashMap<String, Reach>, AppError> {
        let mut reached: HashMap<String, Reach> = HashMap::new();
        let mut frontier: VecDeque<(String, u32)> = VecDeque::new();
        let mut expanded: HashSet<String> = HashSet::new();

        for seed in seeds {
            reached.insert(seed.id.clone(), Reach { hops: 0, paths: 1 });
            frontier.push_back((seed.id.clone(), 0));
        }

        while let Some((entity_id, hops)) = frontier.pop_front() {
            if hops >= self.max_hops || !expanded.insert(entity_id.clone()) {
                continue;
            }

            for edge in GraphRelationship::find_touching(&entity_id, &self.db).await? {
                let neighbour = if edge.in_ == entity_id {
                    edge.out.clone()
                } else {
                    edge.in_.clone()
                };

                match reached.get_mut(&neighbour) {
                    Some(existing) => {
                        // Another distinct path to an already-reached entity.
                        if existing.hops == hops + 1 {
                            existing.paths += 1;
                        }
                    }
                    None => {
                        reached.insert(
                            neighbour.clone(),
                            Reach {
                                hops: hops + 1,
                                paths: 1,
                            },
                        );
                        frontier.push_back((neighbour, hops + 1));
                    }
                }
            }
        }

        Ok(reached)
    }

    fn score(reach: Reach) -> f32 {
        let base = 1.0 / (1.0 + reach.hops as f32);
        let extra_paths = (reach.paths.saturating_sub(1) as f32).min(MAX_EXTRA_PATHS);
        clamp_unit(base + extra_paths * PATH_CORROBORATION_BONUS)
    }
}
