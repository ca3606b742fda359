use common::{
    error::AppError,
    storage::types::{
        document_chunk::{ChunkKind, DocumentChunk, TableMeta},
        manifest::{ChartDescription, PageExtraction, TableData},
    },
};
use text_splitter::{ChunkConfig, TextSplitter};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 2_000,
            overlap_chars: 200,
        }
    }
}

/// Deterministic split of one extracted page into retrieval-sized chunks.
///
/// Narrative text is split on semantic boundaries with overlap; each table
/// row becomes one self-describing chunk annotated with its column names;
/// each chart description becomes one chunk. Rerunning over identical
/// content produces identical chunk ids.
pub fn chunk_page(
    document_id: &str,
    page_number: u32,
    extraction: &PageExtraction,
    config: &ChunkingConfig,
) -> Result<Vec<DocumentChunk>, AppError> {
    if config.max_chars == 0 {
        return Err(AppError::Validation(
            "chunk_max_chars must be greater than zero".into(),
        ));
    }
    if config.overlap_chars >= config.max_chars {
        return Err(AppError::Validation(format!(
            "chunk overlap of {} must be smaller than the chunk capacity of {}",
            config.overlap_chars, config.max_chars
        )));
    }

    let mut chunks = Vec::new();

    // Narrative text.
    let narrative = extraction.narrative_text.trim();
    if !narrative.is_empty() {
        let chunk_config = ChunkConfig::new(config.max_chars)
            .with_overlap(config.overlap_chars)
            .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
        let splitter = TextSplitter::new(chunk_config);

        for (ordinal, (offset, piece)) in splitter.chunk_indices(narrative).enumerate() {
            chunks.push(DocumentChunk::new(
                document_id.to_owned(),
                page_number,
                ChunkKind::Text,
                ordinal as u32,
                piece.to_owned(),
                (offset as u32, (offset + piece.len()) as u32),
                None,
            ));
        }
    }

    // Tables: one chunk per row, never per cell, so a row stays answerable
    // on its own.
    let mut table_ordinal = 0_u32;
    for table in &extraction.tables {
        let meta = TableMeta {
            title: table.title.clone(),
            notes: table.notes.clone(),
            column_names: table.columns.iter().map(|c| c.name.clone()).collect(),
        };

        for row in render_table_rows(table) {
            let span_end = row.len() as u32;
            chunks.push(DocumentChunk::new(
                document_id.to_owned(),
                page_number,
                ChunkKind::TableRow,
                table_ordinal,
                row,
                (0, span_end),
                Some(meta.clone()),
            ));
            table_ordinal += 1;
        }
    }

    // Charts: title, summary, and key points combined into one chunk.
    for (ordinal, chart) in extraction.charts.iter().enumerate() {
        let content = render_chart(chart);
        if content.is_empty() {
            continue;
        }
        let span_end = content.len() as u32;
        chunks.push(DocumentChunk::new(
            document_id.to_owned(),
            page_number,
            ChunkKind::ChartSummary,
            ordinal as u32,
            content,
            (0, span_end),
            None,
        ));
    }

    Ok(chunks)
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".to_owned(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_table_rows(table: &TableData) -> Vec<String> {
    let row_count = table
        .columns
        .iter()
        .map(|column| column.values.len())
        .max()
        .unwrap_or(0);

    let title_prefix = table
        .title
        .as_deref()
        .map(|title| format!("{title} | "))
        .unwrap_or_default();

    if row_count == 0 {
        // Header-only table: keep a single descriptive chunk so the table is
        // still discoverable.
        let header: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        if header.is_empty() && table.title.is_none() {
            return Vec::new();
        }
        let notes = table
            .notes
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default();
        return vec![format!("{title_prefix}columns: {}{notes}", header.join(", "))];
    }

    (0..row_count)
        .map(|row_index| {
            let cells: Vec<String> = table
                .columns
                .iter()
                .map(|column| {
                    let value = column
                        .values
                        .get(row_index)
                        .map(render_cell)
                        .unwrap_or_else(|| "-".to_owned());
                    format!("{}: {}", column.name, value)
                })
                .collect();
            format!("{title_prefix}{}", cells.join(" | "))
        })
        .collect()
}

fn render_chart(chart: &ChartDescription) -> String {
    let mut parts = Vec::new();
    if let Some(title) = chart.title.as_deref() {
        if !title.is_empty() {
            parts.push(title.to_owned());
        }
    }
    if let Some(summary) = chart.summary.as_deref() {
        if !summary.is_empty() {
            parts.push(summary.to_owned());
        }
    }
    if !chart.key_points.is_empty() {
        parts.push(format!("Key points: {}", chart.key_points.join("; ")));
    }
    parts.join(". ")
}
