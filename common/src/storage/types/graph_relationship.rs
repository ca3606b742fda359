use crate::storage::types::document::deserialize_flexible_id;
use crate::{error::AppError, storage::db::SurrealDbClient, utils::identity};
use serde::{Deserialize, Serialize};

/// Directed edge between two graph entities, stored as a SurrealDB `RELATE`
/// record. Identity is (source, relation type, target), so repeated detection
/// of the same relationship accumulates provenance instead of duplicating
/// edges.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GraphRelationship {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(rename = "in", deserialize_with = "deserialize_flexible_id")]
    pub in_: String,
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub out: String,
    pub relationship_type: String,
    pub chunk_ids: Vec<String>,
}

impl GraphRelationship {
    pub fn new(
        source_entity_id: String,
        target_entity_id: String,
        relationship_type: String,
        chunk_ids: Vec<String>,
    ) -> Self {
        Self {
            id: identity::relationship_id(&source_entity_id, &relationship_type, &target_entity_id),
            in_: source_entity_id,
            out: target_entity_id,
            relationship_type,
            chunk_ids,
        }
    }

    pub async fn upsert_merging_provenance(
        &self,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut existing_result = db_client
            .query(format!("SELECT * FROM relates_to:`{}`", self.id))
            .await?;
        let existing: Option<GraphRelationship> = existing_result.take(0)?;

        if existing.is_some() {
            db_client
                .client
                .query(format!(
                    "UPDATE relates_to:`{}`
                    SET chunk_ids = array::distinct(array::concat(chunk_ids, $chunk_ids))",
                    self.id
                ))
                .bind(("chunk_ids", self.chunk_ids.clone()))
                .await?;
        } else {
            db_client
                .client
                .query(format!(
                    r#"RELATE graph_entity:`{}`->relates_to:`{}`->graph_entity:`{}`
                    SET
                        relationship_type = $relationship_type,
                        chunk_ids = $chunk_ids"#,
                    self.in_, self.id, self.out
                ))
                .bind(("relationship_type", self.relationship_type.clone()))
                .bind(("chunk_ids", self.chunk_ids.clone()))
                .await?;
        }

        Ok(())
    }

    /// All edges that touch the given entity, in either direction. One hop of
    /// the traversal frontier.
    pub async fn find_touching(
        entity_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<GraphRelationship>, AppError> {
        let mut response = db_client
            .client
            .query(
                "SELECT * FROM relates_to
                WHERE in = type::thing('graph_entity', $entity_id)
                   OR out = type::thing('graph_entity', $entity_id)",
            )
            .bind(("entity_id", entity_id.to_string()))
            .await?;

        Ok(response.take(0)?)
    }
}
