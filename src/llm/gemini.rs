use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{sse, ErrorBody, FragmentStream, GenerationError, GenerationRequest, TextGenerator};
use crate::config::GeminiConfig;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(request: &'a GenerationRequest) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            system_instruction: request.instructions.as_deref().map(|text| Content {
                role: None,
                parts: vec![Part { text }],
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    /// Errors raised after a stream has started arrive as a regular event.
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

impl GenerateContentResponse {
    /// Text of the first candidate. A response without candidates yields an
    /// empty string; streams send those for usage metadata.
    fn into_text(self) -> Result<String, GenerationError> {
        if let Some(error) = self.error {
            return Err(GenerationError::classify(error.code.unwrap_or(500), error.message));
        }
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GenerationError::Blocked(format!("prompt blocked ({})", reason)));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(String::new());
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        match candidate.finish_reason.as_deref() {
            Some(reason) if text.is_empty() && BLOCKING_FINISH_REASONS.contains(&reason) => Err(
                GenerationError::Blocked(format!("candidate stopped ({})", reason)),
            ),
            _ => Ok(text),
        }
    }
}

fn decode_chunk(payload: &str) -> Result<String, GenerationError> {
    serde_json::from_str::<GenerateContentResponse>(payload)
        .map_err(|e| GenerationError::Malformed(format!("{} in {:?}", e, payload)))?
        .into_text()
}

/// Client for the Gemini `generateContent` REST API.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    async fn post(
        &self,
        url: &str,
        request: &GenerationRequest,
    ) -> Result<reqwest::Response, GenerationError> {
        debug!("Sending request to Gemini: {}", url);

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&GenerateContentRequest::new(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(GenerationError::from_status(status.as_u16(), &error_body));
        }
        Ok(response)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = self.endpoint("generateContent");
        let body = self.post(&url, request).await?.text().await?;
        decode_chunk(&body)
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, request).await?;
        Ok(sse::fragments(response.bytes_stream(), decode_chunk))
    }
}
