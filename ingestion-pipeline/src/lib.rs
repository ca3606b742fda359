#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunking;
pub mod embedding_indexer;
pub mod extraction;
pub mod graph_indexer;
pub mod pipeline;
pub mod reader;

pub use pipeline::{IngestionPipeline, IngestionReport, IngestionTuning};
