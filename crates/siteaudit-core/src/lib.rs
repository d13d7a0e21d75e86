//! Site Audit Core - audit orchestration, link validation, and data models
//!
//! This crate runs the concurrent part of a website content audit: it fans out
//! one analysis job per issue category to an external reasoning service,
//! validates every discovered hyperlink over HTTP, and merges whatever
//! completes into a single run result.
//!
//! # Modules
//!
//! - [`models`] - Issues, pass results, link results and run results
//! - [`config`] - Explicit configuration for every component
//! - [`limiter`] - Bounded FIFO concurrency limiter
//! - [`links`] - Redirect-aware prober and the link validation engine
//! - [`executor`] - Single-category audit pass (submit, poll, parse, retry)
//! - [`orchestrator`] - Parallel fan-out and merge for a whole run
//! - [`provider`] - Traits for the external collaborators

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod config;
pub mod executor;
pub mod limiter;
pub mod links;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod provider;
pub mod selection;

pub use config::*;
pub use executor::*;
pub use limiter::*;
pub use links::*;
pub use models::*;
pub use orchestrator::*;
pub use provider::*;
pub use selection::*;

use thiserror::Error;

/// Core error type for the audit engine
///
/// Only [`AuditError::AllPassesFailed`] ever escapes a full run; every other
/// variant is recovered inside the component that produced it.
#[derive(Error, Debug)]
pub enum AuditError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON or TOML (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Submission or polling against the reasoning service failed
    #[error("Reasoning service error: {0}")]
    Provider(String),

    /// The job reached a terminal state that carries no usable output
    #[error("Job ended with status '{status}': {reason}")]
    JobFailed {
        /// Terminal status reported by the service
        status: String,
        /// Reason reported by the service, if any
        reason: String,
    },

    /// The job was still queued or running when the pass budget ran out
    #[error("{category} pass exceeded its budget after {elapsed_ms} ms")]
    PassTimeout {
        /// Category of the pass that timed out
        category: models::AuditCategory,
        /// Wall-clock time spent before giving up
        elapsed_ms: u64,
    },

    /// The audited site blocked the reasoning service's crawler
    #[error("Site is blocked by bot protection")]
    BotProtection,

    /// Pass output could not be parsed, even after repair
    #[error("Unparseable pass output: {0}")]
    Parse(String),

    /// The content manifest could not be produced
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Page selection failed
    #[error("Page selection failed: {0}")]
    Selection(String),

    /// The concurrency limiter was shut down
    #[error("Limiter closed: {0}")]
    Limiter(String),

    /// A link probe task died before reporting
    #[error("Link check failed: {0}")]
    LinkCheck(String),

    /// Every category pass of a run failed
    #[error("All audit passes failed: {}", format_failed(.failed))]
    AllPassesFailed {
        /// Category and reason for every failed pass
        failed: Vec<(models::AuditCategory, String)>,
    },
}

impl AuditError {
    /// Whether the pass executor should retry after this error.
    ///
    /// Only transient service errors qualify. Timeouts, terminal job states,
    /// bot protection and parse failures are final for the pass.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuditError::Provider(_))
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::Serialization(err.to_string())
    }
}

fn format_failed(failed: &[(models::AuditCategory, String)]) -> String {
    failed
        .iter()
        .map(|(category, reason)| format!("{category}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias using [`AuditError`]
pub type Result<T> = std::result::Result<T, AuditError>;
