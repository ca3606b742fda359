use crate::{error::AppError, storage::db::SurrealDbClient, stored_object, utils::identity};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum GraphEntityType {
    Organization,
    Person,
    Metric,
    Date,
    Product,
    Concept,
}

impl GraphEntityType {
    pub fn variants() -> &'static [&'static str] {
        &[
            "Organization",
            "Person",
            "Metric",
            "Date",
            "Product",
            "Concept",
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GraphEntityType::Organization => "Organization",
            GraphEntityType::Person => "Person",
            GraphEntityType::Metric => "Metric",
            GraphEntityType::Date => "Date",
            GraphEntityType::Product => "Product",
            GraphEntityType::Concept => "Concept",
        }
    }
}

impl From<String> for GraphEntityType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "organization" | "org" | "company" => GraphEntityType::Organization,
            "person" => GraphEntityType::Person,
            "metric" | "measure" | "kpi" => GraphEntityType::Metric,
            "date" | "period" => GraphEntityType::Date,
            "product" => GraphEntityType::Product,
            _ => GraphEntityType::Concept, // Default case
        }
    }
}

stored_object!(GraphEntity, "graph_entity", {
    name: String,
    entity_type: GraphEntityType,
    description: String,
    chunk_ids: Vec<String>
});

impl GraphEntity {
    /// Identity is (canonical name, type); re-extraction from another chunk
    /// resolves to the same node.
    pub fn new(
        name: String,
        entity_type: GraphEntityType,
        description: String,
        chunk_ids: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: identity::entity_id(&name, entity_type.as_str()),
            created_at: now,
            updated_at: now,
            name,
            entity_type,
            description,
            chunk_ids,
        }
    }

    /// Upsert-by-identity: a new node is created once, subsequent sightings
    /// only union their chunk ids into the provenance set.
    pub async fn upsert_merging_provenance(
        &self,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let existing: Option<GraphEntity> = db_client.get_item(&self.id).await?;

        match existing {
            Some(_) => {
                db_client
                    .client
                    .query(
                        "UPDATE type::thing($table, $id)
                        SET chunk_ids = array::distinct(array::concat(chunk_ids, $chunk_ids)),
                            updated_at = $updated_at",
                    )
                    .bind(("table", Self::table_name()))
                    .bind(("id", self.id.clone()))
                    .bind(("chunk_ids", self.chunk_ids.clone()))
                    .bind(("updated_at", surrealdb::sql::Datetime::from(Utc::now())))
                    .await?;
            }
            None => {
                db_client.store_item(self.clone()).await?;
            }
        }

        Ok(())
    }

    /// Seed lookup for graph retrieval: entities whose lowercased name
    /// appears among the query-derived terms.
    pub async fn find_by_names(
        names: Vec<String>,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<GraphEntity>, AppError> {
        let lowered: Vec<String> = names.into_iter().map(|n| n.to_lowercase()).collect();

        let mut response = db_client
            .client
            .query(
                "SELECT * FROM graph_entity
                WHERE string::lowercase(name) INSIDE $names
                ORDER BY name",
            )
            .bind(("names", lowered))
            .await?;

        Ok(response.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_entity_type_from_string() {
        assert_eq!(
            GraphEntityType::from("organization".to_string()),
            GraphEntityType::Organization
        );
        assert_eq!(
            GraphEntityType::from("KPI".to_string()),
            GraphEntityType::Metric
        );
        assert_eq!(
            GraphEntityType::from("unknown".to_string()),
            GraphEntityType::Concept
        );
    }

    #[tokio::test]
    async fn test_upsert_merges_provenance_instead_of_duplicating() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let first = GraphEntity::new(
            "Acme Corp".into(),
            GraphEntityType::Organization,
            "A company".into(),
            vec!["chunk-1".into()],
        );
        let second = GraphEntity::new(
            "Acme Corp".into(),
            GraphEntityType::Organization,
            "Same company, other chunk".into(),
            vec!["chunk-2".into(), "chunk-1".into()],
        );
        assert_eq!(first.id, second.id);

        first
            .upsert_merging_provenance(&db)
            .await
            .expect("First upsert failed");
        second
            .upsert_merging_provenance(&db)
            .await
            .expect("Second upsert failed");

        let all = db
            .get_all_stored_items::<GraphEntity>()
            .await
            .expect("Failed to fetch entities");
        assert_eq!(all.len(), 1, "Identity dedup must hold");

        let mut chunk_ids = all[0].chunk_ids.clone();
        chunk_ids.sort();
        assert_eq!(chunk_ids, vec!["chunk-1".to_string(), "chunk-2".to_string()]);
    }

    #[tokio::test]
    async fn test_find_by_names_is_case_insensitive() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let entity = GraphEntity::new(
            "Revenue".into(),
            GraphEntityType::Metric,
            "Quarterly revenue".into(),
            vec!["chunk-1".into()],
        );
        entity
            .upsert_merging_provenance(&db)
            .await
            .expect("Upsert failed");

        let found = GraphEntity::find_by_names(vec!["REVENUE".into(), "profit".into()], &db)
            .await
            .expect("Lookup failed");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Revenue");

        let missing = GraphEntity::find_by_names(vec!["cost".into()], &db)
            .await
            .expect("Lookup failed");
        assert!(missing.is_empty());
    }
}
