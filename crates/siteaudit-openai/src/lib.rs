//! OpenAI-compatible collaborators for site audits
//!
//! Supports any provider exposing the OpenAI chat completions and responses
//! endpoints.
//!
//! # Features
//! - Background reasoning jobs through the responses endpoint, with a
//!   domain-restricted web search tool
//! - JSON-mode repair of malformed pass output
//! - LLM page selection with a deterministic fallback

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use reqwest::header::{self, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use siteaudit_core::AuditError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

pub mod repair;
pub mod responses;
pub mod selector;

pub use repair::*;
pub use responses::*;
pub use selector::*;

/// Errors raised by the OpenAI-compatible client
#[derive(Error, Debug)]
pub enum OpenAIError {
    /// The configured base URL or an endpoint could not be built
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Transport failure
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an error status
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Sanitized error message
        message: String,
    },

    /// The API key contains characters not allowed in a header
    #[error("Invalid API key characters: {0}")]
    InvalidApiKey(String),

    /// The API answered without the content we asked for
    #[error("Empty response: {0}")]
    EmptyResponse(String),

    /// The response body did not have the expected shape
    #[error("Unexpected response body: {0}")]
    Decode(String),
}

impl From<OpenAIError> for AuditError {
    fn from(err: OpenAIError) -> Self {
        AuditError::Provider(err.to_string())
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, OpenAIError>;

/// OpenAI-compatible client
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    base_url: Url,
    api_key: SecretString,
    http: reqwest::Client,
    default_model: String,
}

/// Configuration for the client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for the API (e.g. "https://api.openai.com/v1")
    pub base_url: String,
    /// API key for authentication
    pub api_key: SecretString,
    /// Default model to use for requests
    pub default_model: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: SecretString::new("".into()),
            default_model: "gpt-4o-mini".to_string(),
            timeout_seconds: get_default_timeout(),
        }
    }
}

/// Request timeout from `SITEAUDIT_OPENAI_TIMEOUT_SECONDS`, 60 s otherwise
fn get_default_timeout() -> u64 {
    std::env::var("SITEAUDIT_OPENAI_TIMEOUT_SECONDS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(60)
}

/// Chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// ID of the model to use
    pub model: String,
    /// List of messages in the conversation
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Desired format for the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// Format of the response
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ResponseFormat {
    /// JSON object response
    #[serde(rename = "json_object")]
    JsonObject,
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author
    pub role: Role,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Role of the message author
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt
    System,
    /// User input
    User,
    /// Assistant response
    Assistant,
}

/// Chat completion response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Unique ID of the response
    pub id: String,
    /// List of generated choices
    pub choices: Vec<Choice>,
    /// Token usage statistics
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Generated choice
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    /// Generated message
    pub message: Message,
    /// Reason for finishing (e.g. "stop", "length")
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage statistics
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    #[serde(alias = "input_tokens")]
    pub prompt_tokens: i64,
    /// Tokens in the completion
    #[serde(alias = "output_tokens")]
    pub completion_tokens: i64,
    /// Total tokens used
    pub total_tokens: i64,
}

/// API error response
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    /// Detailed error information
    pub error: ErrorDetail,
}

/// Detailed error information
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    /// Error message
    pub message: String,
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}

impl OpenAIClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;

        info!(
            "Creating OpenAI client for host: {}",
            base_url.host_str().unwrap_or("unknown")
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            base_url,
            api_key: config.api_key,
            http,
            default_model: config.default_model,
        })
    }

    /// Get the default model configured for this client
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let api_key_val = HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose_secret()))
            .map_err(|e| OpenAIError::InvalidApiKey(e.to_string()))?;
        headers.insert(header::AUTHORIZATION, api_key_val);
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        Ok(headers)
    }

    /// Resolve an endpoint below the base URL.
    ///
    /// `Url::join` replaces the last segment unless the base ends with a
    /// slash, so "v1" + "chat" must become "v1/chat".
    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut base = self.base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Url::parse(&base)?.join(path.trim_start_matches('/'))?)
    }

    /// Send a chat completion request
    #[instrument(skip(self, request), fields(model = %request.model))]
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = self.endpoint("chat/completions")?;
        debug!("Sending chat request to {}", url);

        let response = self
            .http
            .post(url)
            .headers(self.build_headers()?)
            .json(&request)
            .send()
            .await?;

        let chat_response: ChatResponse = Self::read_json(response).await?;
        match &chat_response.usage {
            Some(usage) => info!(
                id = %chat_response.id,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Chat completion successful: {} tokens used",
                usage.total_tokens
            ),
            None => info!(id = %chat_response.id, "Chat completion successful"),
        }
        Ok(chat_response)
    }

    /// Chat with a system and a user message, returning the first choice
    pub async fn simple_chat(
        &self,
        system: &str,
        user: &str,
        response_format: Option<ResponseFormat>,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.default_model.clone(),
            messages: vec![Message::system(system), Message::user(user)],
            temperature: Some(0.1),
            max_tokens: Some(4000),
            response_format,
        };

        let choice = self
            .chat(request)
            .await?
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| OpenAIError::EmptyResponse("no choices returned".to_string()))?;
        if choice.finish_reason.as_deref() == Some("length") {
            warn!("Chat completion truncated at the token limit");
        }
        Ok(choice.message.content)
    }

    /// Start a response. With `background` set the call returns at once and
    /// the response must be polled with [`OpenAIClient::get_response`].
    #[instrument(skip(self, request), fields(model = %request.model))]
    pub async fn create_response(&self, request: &CreateResponseRequest) -> Result<ResponseObject> {
        let url = self.endpoint("responses")?;
        debug!("Creating response at {}", url);

        let response = self
            .http
            .post(url)
            .headers(self.build_headers()?)
            .json(request)
            .send()
            .await?;

        let created: ResponseObject = Self::read_json(response).await?;
        info!(id = %created.id, status = ?created.status, "Response created");
        Ok(created)
    }

    /// Fetch a response by id
    #[instrument(skip(self))]
    pub async fn get_response(&self, id: &str) -> Result<ResponseObject> {
        let url = self.endpoint(&format!("responses/{id}"))?;

        let response = self
            .http
            .get(url)
            .headers(self.build_headers()?)
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Full body goes to the log only; callers see a sanitized message.
            error!("API error ({}): {}", status, body);
            let message = match serde_json::from_str::<ApiError>(&body) {
                Ok(api_error) => match api_error.error.error_type {
                    Some(kind) => format!(
                        "{} ({})",
                        sanitize_error_message(&api_error.error.message),
                        kind
                    ),
                    None => sanitize_error_message(&api_error.error.message),
                },
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string(),
            };
            return Err(OpenAIError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| OpenAIError::Decode(e.to_string()))
    }
}

/// Sanitize error messages to prevent information disclosure
fn sanitize_error_message(message: &str) -> String {
    let patterns = [
        (r"sk-[a-zA-Z0-9_-]{20,}", "sk-***"),
        (r"(?i)bearer\s+[a-zA-Z0-9._-]+", "Bearer ***"),
        (r"[a-zA-Z0-9_-]{32,}", "***REDACTED***"),
    ];

    let mut sanitized = message.to_string();
    for (pattern, replacement) in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            sanitized = re.replace_all(&sanitized, replacement).to_string();
        }
    }

    if sanitized.chars().count() > 256 {
        let truncated: String = sanitized.chars().take(256).collect();
        format!("{truncated}... [truncated]")
    } else {
        sanitized
    }
}
