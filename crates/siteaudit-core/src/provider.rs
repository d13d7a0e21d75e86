//! Traits for the external collaborators of the audit engine
//!
//! The reasoning service, the manifest provider, the page selector and the
//! output repair step are all out of process. The engine only talks to them
//! through these traits.

use crate::models::{AuditCategory, ContentManifest};
use crate::{AuditError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// A job submitted to the reasoning service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Category the job audits
    pub category: AuditCategory,
    /// Category-specific instruction set
    pub instructions: String,
    /// Task input: assigned pages, manifest and issue context
    pub input: String,
    /// Domains the job may browse
    pub allowed_domains: Vec<String>,
    /// Maximum tool calls the job may make
    pub tool_call_budget: u32,
}

/// Opaque handle to a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    /// Service-side job identifier
    pub id: String,
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started
    Queued,
    /// Running
    InProgress,
    /// Finished normally
    Completed,
    /// Finished with truncated output (token budget)
    Incomplete,
    /// Finished with an error
    Failed,
    /// Cancelled by the service or an operator
    Cancelled,
}

impl JobStatus {
    /// Whether the job will not change state again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::InProgress)
    }

    /// Whether a terminal state carries usable output
    pub fn has_usable_output(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Incomplete)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Incomplete => "incomplete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One tool call recorded by the service while running a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallTrace {
    /// Action kind, e.g. `open_page` or `search`
    pub action: String,
    /// URL the action touched, if any
    #[serde(default)]
    pub url: Option<String>,
}

/// A poll response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Current state
    pub status: JobStatus,
    /// Text output, once available
    #[serde(default)]
    pub output_text: Option<String>,
    /// Tool calls made so far
    #[serde(default)]
    pub tool_calls: Vec<ToolCallTrace>,
    /// Error detail for failed jobs
    #[serde(default)]
    pub error: Option<String>,
}

/// Asynchronous job executor that performs the actual content analysis.
///
/// Implementations handle their own transport retries; the engine only
/// submits, polls and interprets.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Submit a job
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle>;

    /// Fetch the current state of a job
    async fn poll(&self, handle: &JobHandle) -> Result<JobSnapshot>;
}

/// Secondary transformation that turns malformed pass output into the
/// expected JSON document.
#[async_trait]
pub trait OutputRepair: Send + Sync {
    /// Rewrite `raw` as a JSON object with an `issues` array
    async fn repair(&self, category: AuditCategory, raw: &str) -> Result<String>;
}

/// Source of extracted page structure for a domain
#[async_trait]
pub trait ManifestProvider: Send + Sync {
    /// Produce the manifest for `domain`
    async fn manifest(&self, domain: &str) -> Result<ContentManifest>;
}

/// Chooses which discovered pages a run audits
#[async_trait]
pub trait PageSelector: Send + Sync {
    /// Pick up to `target` URLs out of `discovered`
    async fn select(&self, domain: &str, discovered: &[String], target: usize)
        -> Result<Vec<String>>;
}

/// Manifest provider backed by manifests already in memory
#[derive(Debug, Default)]
pub struct StaticManifestProvider {
    manifests: RwLock<HashMap<String, ContentManifest>>,
}

impl StaticManifestProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manifest under its domain
    pub async fn insert(&self, manifest: ContentManifest) {
        let mut manifests = self.manifests.write().await;
        manifests.insert(manifest.domain.to_lowercase(), manifest);
    }

    /// Load one manifest from a JSON file
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let manifest: ContentManifest = serde_json::from_str(&raw)?;
        let provider = Self::new();
        provider.insert(manifest).await;
        Ok(provider)
    }
}

#[async_trait]
impl ManifestProvider for StaticManifestProvider {
    async fn manifest(&self, domain: &str) -> Result<ContentManifest> {
        let manifests = self.manifests.read().await;
        manifests
            .get(&domain.to_lowercase())
            .cloned()
            .ok_or_else(|| AuditError::Manifest(format!("no manifest for domain '{domain}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Completed.has_usable_output());
        assert!(JobStatus::Incomplete.has_usable_output());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Failed.has_usable_output());
        assert!(!JobStatus::Cancelled.has_usable_output());
    }

    #[tokio::test]
    async fn test_static_manifest_provider_lookup_is_case_insensitive() -> anyhow::Result<()> {
        let provider = StaticManifestProvider::new();
        provider
            .insert(ContentManifest {
                domain: "Example.test".to_string(),
                ..Default::default()
            })
            .await;

        assert_eq!(provider.manifest("example.TEST").await?.domain, "Example.test");
        assert!(matches!(
            provider.manifest("other.test").await,
            Err(AuditError::Manifest(_))
        ));
        Ok(())
    }
}
