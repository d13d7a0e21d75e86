//! Parallel audit orchestrator

use crate::config::AuditConfig;
use crate::executor::{PassAssignment, PassExecutor};
use crate::links::LinkValidator;
use crate::models::*;
use crate::provider::{ManifestProvider, PageSelector};
use crate::selection::{bare_domain, finalize_selection, HeuristicPageSelector};
use crate::{AuditError, Result};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Orchestration phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationPhase {
    /// Choosing the pages to audit
    SelectingPages,
    /// Launching every pass and link validation
    FanningOut,
    /// Waiting for every unit to settle
    AwaitingAll,
    /// Combining what succeeded
    Merging,
    /// Finished
    Done,
}

impl std::fmt::Display for OrchestrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestrationPhase::SelectingPages => write!(f, "Selecting Pages"),
            OrchestrationPhase::FanningOut => write!(f, "Fanning Out"),
            OrchestrationPhase::AwaitingAll => write!(f, "Awaiting All"),
            OrchestrationPhase::Merging => write!(f, "Merging"),
            OrchestrationPhase::Done => write!(f, "Done"),
        }
    }
}

/// Runs every category pass and link validation for a domain, concurrently,
/// and merges whatever succeeds
#[derive(Clone)]
pub struct AuditOrchestrator {
    manifests: Arc<dyn ManifestProvider>,
    selector: Arc<dyn PageSelector>,
    executor: PassExecutor,
    links: LinkValidator,
    config: AuditConfig,
}

impl std::fmt::Debug for AuditOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditOrchestrator")
            .field("executor", &self.executor)
            .field("links", &self.links)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuditOrchestrator {
    /// Create an orchestrator using the heuristic page selector
    pub fn new(
        manifests: Arc<dyn ManifestProvider>,
        executor: PassExecutor,
        links: LinkValidator,
        config: AuditConfig,
    ) -> Self {
        Self {
            manifests,
            selector: Arc::new(HeuristicPageSelector),
            executor,
            links,
            config,
        }
    }

    /// Replace the page selector
    pub fn with_selector(mut self, selector: Arc<dyn PageSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Audit a domain.
    ///
    /// Succeeds when at least one category pass succeeds. Fails with
    /// [`AuditError::AllPassesFailed`] when none does, whatever link
    /// validation found.
    #[instrument(skip(self, context))]
    pub async fn run_audit(
        &self,
        domain: &str,
        tier: Tier,
        context: IssueContext,
    ) -> Result<AuditRunResult> {
        let started_at = Utc::now();
        let started = Instant::now();
        let run_id = new_run_id(started_at);
        let budget = self.config.tiers.budget(tier).clone();
        info!(%run_id, %tier, categories = budget.categories.len(), "Starting audit run");

        // Selecting pages
        let mut phase = OrchestrationPhase::SelectingPages;
        info!("Phase: {}", phase);
        let manifest = match self.manifests.manifest(domain).await {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!("Manifest unavailable, auditing the homepage only: {}", err);
                ContentManifest {
                    domain: domain.to_string(),
                    ..ContentManifest::default()
                }
            }
        };
        let discovered = if manifest.discovered_urls.is_empty() {
            manifest.pages.iter().map(|p| p.url.clone()).collect()
        } else {
            manifest.discovered_urls.clone()
        };
        let pages = self
            .select_pages(domain, &discovered, budget.target_pages)
            .await;
        info!(selected = pages.len(), discovered = discovered.len(), "Pages selected");

        // Fanning out
        phase = OrchestrationPhase::FanningOut;
        info!("Phase: {}", phase);
        let manifest_text: Arc<str> = Arc::from(manifest.render(&pages));
        let context = Arc::new(context);
        let allowed_domains = vec![bare_domain(domain)];

        let mut pass_handles = Vec::with_capacity(budget.categories.len());
        for &category in &budget.categories {
            let assignment = PassAssignment {
                category,
                pages: pages.clone(),
                manifest: manifest_text.clone(),
                context: context.clone(),
                allowed_domains: allowed_domains.clone(),
                timeout: budget.pass_timeout(),
            };
            let executor = self.executor.clone();
            pass_handles.push((
                category,
                tokio::spawn(async move { executor.execute(&assignment).await }),
            ));
        }

        let link_pages = manifest.pages_for(&pages);
        let link_domain = domain.to_string();
        let link_config = self.config.links.clone();
        let links = self.links.clone();
        let link_handle = tokio::spawn(async move {
            links
                .validate_links(&link_pages, &link_domain, &link_config)
                .await
        });

        // Awaiting all
        phase = OrchestrationPhase::AwaitingAll;
        info!("Phase: {}", phase);
        let (categories, handles): (Vec<_>, Vec<_>) = pass_handles.into_iter().unzip();
        let (settled, link_settled) = tokio::join!(join_all(handles), link_handle);

        // Merging
        phase = OrchestrationPhase::Merging;
        info!("Phase: {}", phase);
        let passes: Vec<AuditPassResult> = categories
            .into_iter()
            .zip(settled)
            .map(|(category, joined)| match joined {
                Ok(result) => result,
                Err(e) => AuditPassResult::failed(category, 0, format!("pass task aborted: {e}")),
            })
            .collect();
        let link_issues = match link_settled {
            Ok(issues) => issues,
            Err(e) => {
                warn!("Link validation task aborted: {}", e);
                Vec::new()
            }
        };

        let merged = merge_passes(passes, link_issues, &context)?;

        phase = OrchestrationPhase::Done;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            %run_id,
            issues = merged.issues.len(),
            pages_audited = merged.audited_urls.len(),
            failed = merged.failed_categories.len(),
            duration_ms,
            "Phase: {}",
            phase
        );

        Ok(AuditRunResult {
            run_id,
            started_at,
            pages_audited: merged.audited_urls.len(),
            issues: merged.issues,
            discovered_pages: discovered,
            audited_urls: merged.audited_urls,
            duration_ms,
            tier,
            failed_categories: merged.failed_categories,
        })
    }

    async fn select_pages(&self, domain: &str, discovered: &[String], target: usize) -> Vec<String> {
        let selected = match self.selector.select(domain, discovered, target).await {
            Ok(selected) => selected,
            Err(err) => {
                warn!("Page selection failed, using heuristic selection: {}", err);
                HeuristicPageSelector
                    .select(domain, discovered, target)
                    .await
                    .unwrap_or_default()
            }
        };
        finalize_selection(domain, selected, target)
    }
}

/// Outcome of merging settled passes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedPasses {
    /// Issues from successful passes, then link issues
    pub issues: Vec<Issue>,
    /// Distinct normalized pages opened by successful passes
    pub audited_urls: Vec<String>,
    /// Categories whose pass failed
    pub failed_categories: Vec<AuditCategory>,
}

/// Merge settled pass results with link validation issues.
///
/// Fails only when no pass succeeded. Link issues previously resolved or
/// ignored are dropped by exact match, like pass issues.
pub fn merge_passes(
    passes: Vec<AuditPassResult>,
    link_issues: Vec<Issue>,
    context: &IssueContext,
) -> Result<MergedPasses> {
    let mut merged = MergedPasses::default();
    let mut failed = Vec::new();
    let mut succeeded = 0usize;
    let mut seen_pages = HashSet::new();

    for pass in passes {
        if !pass.is_success() {
            let reason = pass
                .error_reason
                .unwrap_or_else(|| "unknown error".to_string());
            warn!(category = %pass.category, "Pass failed: {}", reason);
            merged.failed_categories.push(pass.category);
            failed.push((pass.category, reason));
            continue;
        }
        succeeded += 1;
        for page in &pass.opened_pages {
            let normalized = normalize_page_url(page);
            if seen_pages.insert(normalized.clone()) {
                merged.audited_urls.push(normalized);
            }
        }
        merged.issues.extend(pass.issues);
    }

    if succeeded == 0 {
        return Err(AuditError::AllPassesFailed { failed });
    }

    merged
        .issues
        .extend(link_issues.into_iter().filter(|issue| !context.is_excluded(issue)));
    Ok(merged)
}
