use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Relative weights for blending the retriever scores at fusion time.
///
/// These are a tuning surface, not a fixed algorithm; table matches carry a
/// dominant weight because structured questions answered by semantic
/// similarity alone are often wrong.
#[derive(Clone, Copy, Deserialize, Debug)]
pub struct FusionWeightsConfig {
    #[serde(default = "default_vector_weight")]
    pub vector: f32,
    #[serde(default = "default_graph_weight")]
    pub graph: f32,
    #[serde(default = "default_table_weight")]
    pub table: f32,
    #[serde(default = "default_corroboration_bonus")]
    pub corroboration_bonus: f32,
}

impl Default for FusionWeightsConfig {
    fn default() -> Self {
        Self {
            vector: default_vector_weight(),
            graph: default_graph_weight(),
            table: default_table_weight(),
            corroboration_bonus: default_corroboration_bonus(),
        }
    }
}

fn default_vector_weight() -> f32 {
    0.35
}

fn default_graph_weight() -> f32 {
    0.25
}

fn default_table_weight() -> f32 {
    1.0
}

fn default_corroboration_bonus() -> f32 {
    0.05
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_vlm_model")]
    pub vlm_model: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
    #[serde(default = "default_chunk_overlap_chars")]
    pub chunk_overlap_chars: usize,
    #[serde(default = "default_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_hops")]
    pub graph_max_hops: u32,
    #[serde(default = "default_context_budget_tokens")]
    pub context_budget_tokens: usize,
    #[serde(default)]
    pub fusion_weights: FusionWeightsConfig,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_vlm_model() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_backend() -> String {
    "openai".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_chunk_max_chars() -> usize {
    2_000
}

fn default_chunk_overlap_chars() -> usize {
    200
}

fn default_top_k() -> usize {
    8
}

fn default_similarity_threshold() -> f32 {
    0.35
}

fn default_max_hops() -> u32 {
    2
}

fn default_context_budget_tokens() -> usize {
    2_800
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fusion_weight_defaults_favor_table_matches() {
        let weights = FusionWeightsConfig::default();
        assert!(weights.table > weights.vector);
        assert!(weights.table > weights.graph);
    }
}
