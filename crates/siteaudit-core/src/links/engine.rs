//! Link validation engine
//!
//! Best effort by contract: [`LinkValidator::validate_links`] never fails.
//! Anything that goes wrong inside degrades to an empty issue list so link
//! checking can never abort an audit run.

use super::prober::{HttpProber, LinkProber, ProbeOutcome};
use crate::config::{LinkCheckConfig, ProberPolicy};
use crate::limiter::ConcurrencyLimiter;
use crate::models::{AuditCategory, Issue, LinkCheckResult, LinkStatus, PageSnapshot};
use crate::selection::bare_domain;
use crate::{AuditError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

const SKIPPED_SCHEMES: [&str; 4] = ["mailto:", "tel:", "javascript:", "data:"];

const ASSET_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "bmp", "avif", "tif", "tiff",
    // archives
    "zip", "tar", "gz", "tgz", "rar", "7z", "bz2", "xz",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // stylesheets and scripts
    "css", "js", "mjs", "map",
];

/// A link that survived extraction, filtering and deduplication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    /// Absolute target, fragment removed
    pub target: Url,
    /// Page the link appears on
    pub source_url: String,
    /// Visible anchor text
    pub anchor_text: String,
}

/// Candidates selected for probing
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    /// Candidates to probe, in discovery order
    pub candidates: Vec<LinkCandidate>,
    /// Candidates cut by `max_links`
    pub dropped: usize,
}

/// Extract, resolve, filter, deduplicate and cap the links of `pages`
pub fn collect_candidates(
    pages: &[PageSnapshot],
    domain: &str,
    config: &LinkCheckConfig,
) -> CandidateSet {
    let base_domain = bare_domain(domain);
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut candidates = Vec::new();

    for page in pages {
        let Ok(source) = Url::parse(&page.url) else {
            debug!(url = %page.url, "Skipping page with unparseable URL");
            continue;
        };

        for link in &page.links {
            let href = link.href.trim();
            if is_skipped_href(href) {
                continue;
            }
            let Ok(mut target) = source.join(href) else {
                debug!(%href, source = %page.url, "Skipping unresolvable href");
                continue;
            };
            target.set_fragment(None);

            if !matches!(target.scheme(), "http" | "https") {
                continue;
            }
            if !config.check_external && !is_internal(&target, &base_domain) {
                continue;
            }
            if is_asset(&target) {
                continue;
            }
            if !seen.insert((target.to_string(), page.url.clone())) {
                continue;
            }

            candidates.push(LinkCandidate {
                target,
                source_url: page.url.clone(),
                anchor_text: link.anchor_text.trim().to_string(),
            });
        }
    }

    let mut dropped = 0;
    if candidates.len() > config.max_links {
        dropped = candidates.len() - config.max_links;
        candidates.truncate(config.max_links);
        info!(
            kept = candidates.len(),
            dropped, "Link candidates over max_links; dropped {dropped}"
        );
    }

    CandidateSet {
        candidates,
        dropped,
    }
}

/// Probes the links of fetched pages and reports the failures
#[derive(Clone)]
pub struct LinkValidator {
    prober: Arc<dyn LinkProber>,
    policy: ProberPolicy,
}

impl std::fmt::Debug for LinkValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkValidator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LinkValidator {
    /// Create a validator over any prober
    pub fn new(prober: Arc<dyn LinkProber>, policy: ProberPolicy) -> Self {
        Self { prober, policy }
    }

    /// Create a validator probing over real HTTP
    pub fn http(policy: ProberPolicy) -> Result<Self> {
        let prober = HttpProber::new(policy.clone())?;
        Ok(Self::new(Arc::new(prober), policy))
    }

    /// Check every link and return the issues. Never fails; internal errors
    /// are logged and yield an empty list.
    #[instrument(skip(self, pages, config), fields(pages = pages.len()))]
    pub async fn validate_links(
        &self,
        pages: &[PageSnapshot],
        domain: &str,
        config: &LinkCheckConfig,
    ) -> Vec<Issue> {
        match self.check_links(pages, domain, config).await {
            Ok(results) => {
                let issues: Vec<Issue> = results.iter().filter_map(link_issue).collect();
                info!(
                    checked = results.len(),
                    issues = issues.len(),
                    "Link validation complete"
                );
                issues
            }
            Err(err) => {
                warn!("Link validation degraded to no results: {}", err);
                Vec::new()
            }
        }
    }

    /// Check every link and return one result per (target, source) pair,
    /// `ok` results included.
    ///
    /// Each distinct target is probed once, under a limiter holding
    /// `config.concurrency` permits.
    pub async fn check_links(
        &self,
        pages: &[PageSnapshot],
        domain: &str,
        config: &LinkCheckConfig,
    ) -> Result<Vec<LinkCheckResult>> {
        let CandidateSet { candidates, .. } = collect_candidates(pages, domain, config);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut targets: Vec<Url> = Vec::new();
        let mut target_index: HashMap<String, usize> = HashMap::new();
        for candidate in &candidates {
            let key = candidate.target.to_string();
            if !target_index.contains_key(&key) {
                target_index.insert(key, targets.len());
                targets.push(candidate.target.clone());
            }
        }

        let outcomes = self.probe_all(targets, config).await?;

        let mut results = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let target = candidate.target.to_string();
            let outcome = target_index
                .get(&target)
                .and_then(|&i| outcomes.get(i))
                .ok_or_else(|| AuditError::LinkCheck(format!("no probe outcome for {target}")))?;
            results.push(outcome.classify(
                &self.policy,
                &target,
                &candidate.source_url,
                &candidate.anchor_text,
            ));
        }
        Ok(results)
    }

    async fn probe_all(
        &self,
        targets: Vec<Url>,
        config: &LinkCheckConfig,
    ) -> Result<Vec<ProbeOutcome>> {
        let limiter = ConcurrencyLimiter::new(config.concurrency);
        let timeout = config.timeout();
        let count = targets.len();
        debug!(count, concurrency = limiter.capacity(), "Probing link targets");

        let mut tasks = JoinSet::new();
        for (index, target) in targets.into_iter().enumerate() {
            let limiter = limiter.clone();
            let prober = self.prober.clone();
            tasks.spawn(async move {
                let _permit = limiter.acquire().await?;
                let outcome = prober.probe(&target, timeout).await;
                Ok::<_, AuditError>((index, outcome))
            });
        }

        let mut outcomes: Vec<Option<ProbeOutcome>> = vec![None; count];
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) =
                joined.map_err(|e| AuditError::LinkCheck(format!("probe task: {e}")))??;
            outcomes[index] = Some(outcome);
        }

        outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.ok_or_else(|| AuditError::LinkCheck(format!("probe {index} never reported")))
            })
            .collect()
    }
}

/// Turn a non-`ok` result into an issue
pub fn link_issue(result: &LinkCheckResult) -> Option<Issue> {
    let severity = result.status.severity()?;
    let anchor = if result.anchor_text.is_empty() {
        String::new()
    } else {
        format!(" (anchor \"{}\")", result.anchor_text)
    };
    let target = &result.target_url;

    let (description, suggested_fix) = match result.status {
        LinkStatus::Ok => return None,
        LinkStatus::Broken => (
            format!(
                "Broken link to {target}{anchor}: HTTP {}",
                result
                    .http_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "error".to_string())
            ),
            "Update the link to a live page or remove it.".to_string(),
        ),
        LinkStatus::RedirectLoop => (
            format!(
                "Redirect loop on link to {target}{anchor}: {}",
                result.error.as_deref().unwrap_or("redirects never settle")
            ),
            "Fix the redirect rules for this URL so it resolves to a single page.".to_string(),
        ),
        LinkStatus::Timeout => (
            format!("Link to {target}{anchor} timed out"),
            "Check that the destination server is reachable, or replace the link.".to_string(),
        ),
        LinkStatus::SslError => (
            format!(
                "SSL/TLS error on link to {target}{anchor}: {}",
                result.error.as_deref().unwrap_or("certificate problem")
            ),
            "Renew or fix the destination's certificate, or link to a secure alternative."
                .to_string(),
        ),
        LinkStatus::Error => (
            format!(
                "Link to {target}{anchor} could not be checked: {}",
                result.error.as_deref().unwrap_or("request failed")
            ),
            "Verify the destination manually and update the link if needed.".to_string(),
        ),
        LinkStatus::RedirectChain => (
            format!(
                "Link to {target}{anchor} passes through {} redirects{}",
                result.redirect_count,
                result
                    .final_url
                    .as_deref()
                    .map(|u| format!(" before reaching {u}"))
                    .unwrap_or_default()
            ),
            format!(
                "Point the link directly at {}.",
                result.final_url.as_deref().unwrap_or("the final destination")
            ),
        ),
        LinkStatus::Slow => (
            format!(
                "Link to {target}{anchor} took {} ms to respond",
                result.response_time_ms
            ),
            "Investigate the destination's response time or link to a faster alternative."
                .to_string(),
        ),
        LinkStatus::MixedContent => (
            format!(
                "Secure page links to insecure destination {}{anchor}",
                result.final_url.as_deref().unwrap_or(target)
            ),
            "Link to the https:// version of the destination.".to_string(),
        ),
    };

    Some(Issue {
        page_url: result.source_url.clone(),
        category: AuditCategory::LinksAndFormatting,
        description,
        severity,
        suggested_fix,
    })
}

fn is_skipped_href(href: &str) -> bool {
    if href.is_empty() || href.starts_with('#') {
        return true;
    }
    let lower = href.to_lowercase();
    SKIPPED_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

fn is_internal(url: &Url, base_domain: &str) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let base = base_domain.strip_prefix("www.").unwrap_or(base_domain);
    host == base || host.ends_with(&format!(".{base}"))
}

fn is_asset(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    let file = path.rsplit('/').next().unwrap_or("");
    match file.rsplit_once('.') {
        Some((_, ext)) => ASSET_EXTENSIONS.contains(&ext),
        None => false,
    }
}
