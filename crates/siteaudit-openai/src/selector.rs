//! LLM page selection

use crate::{OpenAIClient, ResponseFormat};
use async_trait::async_trait;
use serde::Deserialize;
use siteaudit_core::{normalize_page_url, AuditError, HeuristicPageSelector, PageSelector};
use std::collections::HashSet;
use tracing::{info, instrument, warn};

const SELECTION_SYSTEM_PROMPT: &str = r#"You pick which pages of a website to audit.
Choose the pages that best represent the site's content: the homepage, product or service pages, pricing, about, and contact pages before blog archives, tag listings, or legal boilerplate.
Pick only from the provided list. Return ONLY a JSON object: {"urls":["https://..."]}"#;

#[derive(Debug, Default, Deserialize)]
struct SelectionPayload {
    #[serde(default)]
    urls: Vec<String>,
}

/// Page selector asking a model for representative pages.
///
/// Falls back to [`HeuristicPageSelector`] whenever the call fails or the
/// model picks nothing usable.
#[derive(Debug, Clone)]
pub struct OpenAIPageSelector {
    client: OpenAIClient,
}

impl OpenAIPageSelector {
    /// Create a selector from an OpenAI-compatible client
    pub fn new(client: OpenAIClient) -> Self {
        Self { client }
    }

    async fn ask(
        &self,
        domain: &str,
        discovered: &[String],
        target: usize,
    ) -> siteaudit_core::Result<Vec<String>> {
        let mut user = format!("Domain: {domain}\nPick up to {target} pages.\n\nDiscovered pages:\n");
        for url in discovered {
            user.push_str(&format!("- {url}\n"));
        }

        let raw = self
            .client
            .simple_chat(SELECTION_SYSTEM_PROMPT, &user, Some(ResponseFormat::JsonObject))
            .await?;
        let payload: SelectionPayload = serde_json::from_str(&raw)
            .map_err(|e| AuditError::Selection(format!("unparseable selection: {e}")))?;

        // Only URLs that were actually discovered survive.
        let known: HashSet<String> = discovered.iter().map(|u| normalize_page_url(u)).collect();
        let picked: Vec<String> = payload
            .urls
            .into_iter()
            .filter(|u| known.contains(&normalize_page_url(u)))
            .take(target)
            .collect();

        if picked.is_empty() {
            return Err(AuditError::Selection("model picked no known pages".to_string()));
        }
        Ok(picked)
    }
}

#[async_trait]
impl PageSelector for OpenAIPageSelector {
    #[instrument(skip(self, discovered), fields(discovered = discovered.len()))]
    async fn select(
        &self,
        domain: &str,
        discovered: &[String],
        target: usize,
    ) -> siteaudit_core::Result<Vec<String>> {
        match self.ask(domain, discovered, target).await {
            Ok(picked) => {
                info!(selected = picked.len(), "Model selected pages");
                Ok(picked)
            }
            Err(err) => {
                warn!("Model page selection failed, using heuristic: {}", err);
                HeuristicPageSelector.select(domain, discovered, target).await
            }
        }
    }
}
