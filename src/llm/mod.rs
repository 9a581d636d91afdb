pub mod gemini;
mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use thiserror::Error;

/// Ordered, forward-only sequence of reply fragments. Consumed once.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// One prompt for the text-generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Static instructions sent alongside the prompt.
    pub instructions: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, instructions: Option<String>) -> Self {
        Self {
            prompt: prompt.into(),
            instructions,
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("authentication rejected ({status}): {message}")]
    Auth { status: u16, message: String },
    #[error("quota exceeded: {0}")]
    Quota(String),
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("response blocked: {0}")]
    Blocked(String),
    #[error("empty response")]
    EmptyResponse,
}

impl GenerationError {
    /// Short stable label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Auth { .. } => "auth",
            GenerationError::Quota(_) => "quota",
            GenerationError::Upstream { .. } => "upstream",
            GenerationError::Network(_) => "network",
            GenerationError::Malformed(_) => "malformed",
            GenerationError::Blocked(_) => "blocked",
            GenerationError::EmptyResponse => "empty",
        }
    }

    /// Classify a non-success HTTP reply from the service.
    pub fn from_status(status: u16, body: &str) -> Self {
        Self::classify(status, extract_error_message(body))
    }

    /// Map a status code and error message to an error kind.
    pub fn classify(status: u16, message: String) -> Self {
        match status {
            401 | 403 => GenerationError::Auth { status, message },
            // Gemini answers a bad key with 400 INVALID_ARGUMENT.
            400 if message.contains("API key") => GenerationError::Auth { status, message },
            429 => GenerationError::Quota(message),
            _ => GenerationError::Upstream { status, message },
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
}

/// Pull `error.message` out of a JSON error body, falling back to the raw text.
fn extract_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ => body.trim().to_string(),
    }
}

/// Seam between the relay and the generative-AI provider.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Request a complete reply in one response.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Request a reply delivered as fragments while it is being produced.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError>;
}
