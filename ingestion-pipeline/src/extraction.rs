use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs, ResponseFormat,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::{
    error::AppError,
    storage::types::manifest::{ChartDescription, PageExtraction, TableData},
};
use serde::Deserialize;
use tracing::debug;

/// Page text passed as disambiguation context is capped to keep the request
/// under the model's input limits.
const PAGE_TEXT_CHAR_LIMIT: usize = 15_000;

static EXTRACTION_INSTRUCTIONS: &str = r#"You are an expert financial document analyst.

Task:
- Find ALL tables and charts on this full PDF page image.
- For tables: output JSON with `columns` as a list of objects with 'name' and 'values' fields.
  Normalize numbers (no thousands separators), keep signs; allow units/% as strings if present.
  Use null for empty cells; include `title` and `notes` (footnotes/units) when visible.
- For charts/figures: provide a short `summary` and 3-10 `key_points` with concrete metrics when visible.
- For charts/figures: make sure the key_points contain all the exact values visible in the chart.
- Use the provided page text as context to disambiguate headers/abbreviations. Do not invent data.
- If none present, return empty arrays.

Return JSON in this exact format:
{
  "tables": [{"title": "...", "notes": "...", "columns": [{"name": "col1", "values": [...]}]}],
  "figures": [{"title": "...", "summary": "...", "key_points": [...]}],
  "page_summary": "..."
}"#;

/// Opaque extraction collaborator: page image in, structured payload out.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(
        &self,
        page_image_png: &[u8],
        page_text: &str,
    ) -> Result<PageExtraction, AppError>;
}

// Raw shape the vision model returns before mapping to PageExtraction.
#[derive(Debug, Deserialize)]
struct VlmPayload {
    #[serde(default)]
    tables: Vec<TableData>,
    #[serde(default)]
    figures: Vec<ChartDescription>,
    #[serde(default)]
    page_summary: Option<String>,
}

/// Vision-language extraction backed by an OpenAI-compatible chat endpoint.
pub struct VlmExtractor {
    client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    model: String,
}

impl VlmExtractor {
    pub fn new(
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: String,
    ) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl PageExtractor for VlmExtractor {
    async fn extract(
        &self,
        page_image_png: &[u8],
        page_text: &str,
    ) -> Result<PageExtraction, AppError> {
        let image_data_url = format!("data:image/png;base64,{}", BASE64.encode(page_image_png));

        let context_text: String = page_text.trim().chars().take(PAGE_TEXT_CHAR_LIMIT).collect();

        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(vec![
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(EXTRACTION_INSTRUCTIONS)
                    .build()?
                    .into(),
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(format!("PAGE_TEXT:\n{context_text}"))
                    .build()?
                    .into(),
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(image_data_url)
                            .detail(ImageDetail::High)
                            .build()?,
                    )
                    .build()?
                    .into(),
            ])
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([user_message.into()])
            .response_format(ResponseFormat::JsonObject)
            .build()?;

        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "No content found in extraction response".into(),
            ))?;

        let payload = serde_json::from_str::<VlmPayload>(content).map_err(|e| {
            AppError::LLMParsing(format!("Failed to parse extraction response: {e}"))
        })?;

        debug!(
            tables = payload.tables.len(),
            figures = payload.figures.len(),
            "page extraction parsed"
        );

        let narrative_text = payload
            .page_summary
            .filter(|summary| !summary.trim().is_empty())
            .unwrap_or_else(|| context_text.clone());

        Ok(PageExtraction {
            tables: payload.tables,
            charts: payload.figures,
            narrative_text,
        })
    }
}
