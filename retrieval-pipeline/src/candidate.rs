use common::storage::types::document_chunk::DocumentChunk;

/// Which retriever produced (or corroborated) a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceTag {
    Vector,
    Graph,
    Table,
}

impl SourceTag {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceTag::Vector => "vector",
            SourceTag::Graph => "graph",
            SourceTag::Table => "table",
        }
    }
}

/// Per-source subscores, each already normalized to [0, 1] within its source.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scores {
    pub vector: Option<f32>,
    pub graph: Option<f32>,
    pub table: Option<f32>,
}

/// A chunk surfaced by one or more retrievers, with its accumulated scores.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub chunk: DocumentChunk,
    pub sources: Vec<SourceTag>,
    pub scores: Scores,
    pub fused: f32,
}

impl RetrievalCandidate {
    pub fn new(chunk: DocumentChunk) -> Self {
        Self {
            chunk,
            sources: Vec::new(),
            scores: Scores::default(),
            fused: 0.0,
        }
    }

    pub fn with_vector_score(mut self, score: f32) -> Self {
        self.scores.vector = Some(score);
        self.tag(SourceTag::Vector);
        self
    }

    pub fn with_graph_score(mut self, score: f32) -> Self {
        self.scores.graph = Some(score);
        self.tag(SourceTag::Graph);
        self
    }

    pub fn with_table_score(mut self, score: f32) -> Self {
        self.scores.table = Some(score);
        self.tag(SourceTag::Table);
        self
    }

    pub fn tag(&mut self, source: SourceTag) {
        if !self.sources.contains(&source) {
            self.sources.push(source);
            self.sources.sort();
        }
    }
}
