//! Background reasoning jobs over the responses endpoint

use crate::OpenAIClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use siteaudit_core::{
    JobHandle, JobRequest, JobSnapshot, JobStatus, ReasoningService, ToolCallTrace,
};
use tracing::{debug, instrument};

/// Body of `POST /responses`
#[derive(Debug, Clone, Serialize)]
pub struct CreateResponseRequest {
    /// Model to run
    pub model: String,
    /// System-level instructions
    pub instructions: String,
    /// Task input
    pub input: String,
    /// Return at once and run the response in the background
    pub background: bool,
    /// Tools the model may call
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    /// Cap on built-in tool calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
    /// Reasoning options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,
}

/// Reasoning options
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningOptions {
    /// "low", "medium" or "high"
    pub effort: String,
}

/// A tool the model may call
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tool {
    /// Built-in web search, optionally restricted to some domains
    WebSearch {
        /// Domain restriction
        #[serde(skip_serializing_if = "Option::is_none")]
        filters: Option<WebSearchFilters>,
    },
}

/// Web search restriction
#[derive(Debug, Clone, Serialize)]
pub struct WebSearchFilters {
    /// Only these domains may be searched or opened
    pub allowed_domains: Vec<String>,
}

/// Lifecycle state of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Accepted, not started
    Queued,
    /// Running
    InProgress,
    /// Finished
    Completed,
    /// Finished early, usually on the output token limit
    Incomplete,
    /// Finished with an error
    Failed,
    /// Cancelled
    Cancelled,
    /// Anything this client does not know
    #[serde(other)]
    Unknown,
}

impl From<ResponseStatus> for JobStatus {
    fn from(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Queued => JobStatus::Queued,
            ResponseStatus::InProgress => JobStatus::InProgress,
            ResponseStatus::Completed => JobStatus::Completed,
            ResponseStatus::Incomplete => JobStatus::Incomplete,
            ResponseStatus::Cancelled => JobStatus::Cancelled,
            ResponseStatus::Failed | ResponseStatus::Unknown => JobStatus::Failed,
        }
    }
}

/// A response as returned by create and retrieve
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseObject {
    /// Response id
    pub id: String,
    /// Lifecycle state
    pub status: ResponseStatus,
    /// Output items, in order
    #[serde(default)]
    pub output: Vec<OutputItem>,
    /// Error detail for failed responses
    #[serde(default)]
    pub error: Option<ResponseError>,
    /// Why the response stopped early
    #[serde(default)]
    pub incomplete_details: Option<IncompleteDetails>,
}

/// Error attached to a failed response
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseError {
    /// Error code
    #[serde(default)]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Reason for an incomplete response
#[derive(Debug, Clone, Deserialize)]
pub struct IncompleteDetails {
    /// e.g. "max_output_tokens"
    #[serde(default)]
    pub reason: Option<String>,
}

/// One output item
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    /// Assistant message
    Message {
        /// Content parts
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    /// A web search tool call
    WebSearchCall {
        /// What the tool did
        #[serde(default)]
        action: Option<WebSearchAction>,
    },
    /// Reasoning summaries and other items
    #[serde(other)]
    Other,
}

/// Part of a message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text output
    OutputText {
        /// The text
        text: String,
    },
    /// Refusal or other parts
    #[serde(other)]
    Other,
}

/// Action taken by a web search call
#[derive(Debug, Clone, Deserialize)]
pub struct WebSearchAction {
    /// "search", "open_page" or "find"
    #[serde(rename = "type")]
    pub kind: String,
    /// Page the action opened or searched in
    #[serde(default)]
    pub url: Option<String>,
}

impl ResponseObject {
    /// Concatenated text of every message part, if any
    pub fn output_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message { content } => Some(content),
                _ => None,
            })
            .flatten()
            .filter_map(|part| match part {
                ContentPart::OutputText { text } => Some(text.as_str()),
                ContentPart::Other => None,
            })
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(""))
        }
    }

    /// Tool calls recorded in the output
    pub fn tool_calls(&self) -> Vec<ToolCallTrace> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::WebSearchCall {
                    action: Some(action),
                } => Some(ToolCallTrace {
                    action: action.kind.clone(),
                    url: action.url.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    fn error_reason(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(match &error.code {
                Some(code) => format!("{code}: {}", error.message),
                None => error.message.clone(),
            });
        }
        if self.status == ResponseStatus::Unknown {
            return Some("unrecognized response status".to_string());
        }
        self.incomplete_details
            .as_ref()
            .and_then(|d| d.reason.clone())
    }

    /// Convert to the engine's poll snapshot
    pub fn into_snapshot(self) -> JobSnapshot {
        JobSnapshot {
            status: self.status.into(),
            output_text: self.output_text(),
            tool_calls: self.tool_calls(),
            error: self.error_reason(),
        }
    }
}

/// Reasoning service running each pass as a background response with a
/// domain-restricted web search tool
#[derive(Debug, Clone)]
pub struct OpenAIReasoningService {
    client: OpenAIClient,
    model: String,
    reasoning_effort: Option<String>,
}

impl OpenAIReasoningService {
    /// Create a service using the client's default model
    pub fn new(client: OpenAIClient) -> Self {
        let model = client.default_model().to_string();
        Self {
            client,
            model,
            reasoning_effort: None,
        }
    }

    /// Use a different model for passes
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the reasoning effort sent with every job
    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    /// Build the responses request for a job
    pub fn build_request(&self, job: &JobRequest) -> CreateResponseRequest {
        CreateResponseRequest {
            model: self.model.clone(),
            instructions: job.instructions.clone(),
            input: job.input.clone(),
            background: true,
            tools: vec![Tool::WebSearch {
                filters: Some(WebSearchFilters {
                    allowed_domains: job.allowed_domains.clone(),
                }),
            }],
            max_tool_calls: Some(job.tool_call_budget),
            reasoning: self
                .reasoning_effort
                .clone()
                .map(|effort| ReasoningOptions { effort }),
        }
    }
}

#[async_trait]
impl ReasoningService for OpenAIReasoningService {
    #[instrument(skip(self, request), fields(category = %request.category))]
    async fn submit(&self, request: &JobRequest) -> siteaudit_core::Result<JobHandle> {
        let created = self.client.create_response(&self.build_request(request)).await?;
        Ok(JobHandle { id: created.id })
    }

    async fn poll(&self, handle: &JobHandle) -> siteaudit_core::Result<JobSnapshot> {
        let response = self.client.get_response(&handle.id).await?;
        debug!(id = %handle.id, status = ?response.status, "Polled response");
        Ok(response.into_snapshot())
    }
}
