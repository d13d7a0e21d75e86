//! JSON repair of malformed pass output

use crate::{OpenAIClient, ResponseFormat};
use async_trait::async_trait;
use siteaudit_core::prompts::REPAIR_SYSTEM_PROMPT;
use siteaudit_core::{AuditCategory, OutputRepair};
use tracing::{info, instrument};

/// Output repair through a JSON-mode chat completion
#[derive(Debug, Clone)]
pub struct OpenAIOutputRepair {
    client: OpenAIClient,
}

impl OpenAIOutputRepair {
    /// Create a repair step from an OpenAI-compatible client
    pub fn new(client: OpenAIClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OutputRepair for OpenAIOutputRepair {
    #[instrument(skip(self, raw), fields(raw_len = raw.len()))]
    async fn repair(&self, category: AuditCategory, raw: &str) -> siteaudit_core::Result<String> {
        let user = format!("Category: {category}\n\nAudit notes:\n{raw}");
        let repaired = self
            .client
            .simple_chat(REPAIR_SYSTEM_PROMPT, &user, Some(ResponseFormat::JsonObject))
            .await?;
        info!(%category, "Repaired pass output");
        Ok(repaired)
    }
}
