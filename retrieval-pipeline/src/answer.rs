use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use common::error::AppError;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::instrument;

use crate::context::Context;

/// Marker handed to the model when retrieval produced nothing, so it answers
/// from the question alone and says so instead of hallucinating provenance.
pub const NO_CONTEXT_MARKER: &str = "No relevant context was retrieved from the document store.";

static ANSWER_INSTRUCTIONS: &str = r"You answer questions about ingested documents.

Ground every claim in the provided context and cite figures exactly as they appear. When the context says no relevant content was retrieved, say that you cannot answer from the ingested documents instead of guessing.";

/// Answer synthesis seam. The pipeline retrieves and assembles the context;
/// implementations only turn (query, context) into prose.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, query: &str, context: &Context) -> Result<String, AppError>;
}

pub fn create_user_message(query: &str, context: &Context) -> String {
    let rendered = if context.is_empty() {
        NO_CONTEXT_MARKER
    } else {
        context.rendered.as_str()
    };

    format!(
        r"
        Context Information:
        ==================
        {rendered}

        User Question:
        ==================
        {query}
        "
    )
}

pub struct OpenAiAnswerGenerator {
    client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    model: String,
    attempts: usize,
    base_delay_ms: u64,
}

impl OpenAiAnswerGenerator {
    pub fn new(
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        model: String,
    ) -> Self {
        Self {
            client,
            model,
            attempts: 3,
            base_delay_ms: 250,
        }
    }

    async fn complete(&self, user_message: &str) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(ANSWER_INSTRUCTIONS)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_message.to_owned())
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing("Answer generation returned no content".into()))
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiAnswerGenerator {
    /// Transient completion failures are retried with the same assembled
    /// context; retrieval is never re-run for a generation hiccup.
    #[instrument(skip_all, fields(model = %self.model, context_tokens = context.token_estimate))]
    async fn generate(&self, query: &str, context: &Context) -> Result<String, AppError> {
        let user_message = create_user_message(query, context);

        let strategy = ExponentialBackoff::from_millis(self.base_delay_ms)
            .map(jitter)
            .take(self.attempts.saturating_sub(1));

        RetryIf::spawn(
            strategy,
            || self.complete(&user_message),
            AppError::is_transient,
        )
        .await
    }
}
