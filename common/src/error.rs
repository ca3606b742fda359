use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Identity conflict for {0}: content differs under the same content-addressed id")]
    IdentityConflict(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether the failure is worth retrying with backoff.
    ///
    /// Rate limits, timeouts, and transport errors are transient; malformed
    /// input, auth failures, and parsing errors are permanent and retrying
    /// them only burns quota.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::OpenAI(err) => transient_openai(err),
            // Provider calls surface their OpenAI errors wrapped in anyhow.
            AppError::Anyhow(err) => err
                .downcast_ref::<OpenAIError>()
                .is_some_and(transient_openai),
            AppError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            AppError::Database(_) => true,
            _ => false,
        }
    }
}

fn transient_openai(err: &OpenAIError) -> bool {
    match err {
        OpenAIError::Reqwest(_) => true,
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.as_deref().unwrap_or_default();
            kind.contains("rate_limit")
                || kind.contains("server_error")
                || kind.contains("overloaded")
                || api.message.contains("Rate limit")
        }
        _ => false,
    }
}
