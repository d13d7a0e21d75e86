//! Data models for site audits

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Issue category. Each category is audited by an independent pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Spelling, grammar and punctuation
    Language,
    /// Factual accuracy and cross-page consistency
    FactsAndConsistency,
    /// Links and formatting. Also fed by the link validation engine.
    LinksAndFormatting,
    /// Tone and brand voice
    BrandVoice,
}

impl AuditCategory {
    /// Every category, in reporting order
    pub const ALL: [AuditCategory; 4] = [
        AuditCategory::Language,
        AuditCategory::FactsAndConsistency,
        AuditCategory::LinksAndFormatting,
        AuditCategory::BrandVoice,
    ];
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditCategory::Language => write!(f, "Language"),
            AuditCategory::FactsAndConsistency => write!(f, "Facts & Consistency"),
            AuditCategory::LinksAndFormatting => write!(f, "Links & Formatting"),
            AuditCategory::BrandVoice => write!(f, "Brand Voice"),
        }
    }
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic or minor
    Low,
    /// Should be fixed
    Medium,
    /// Visibly broken for visitors
    Critical,
}

/// Cost/scope tier of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Cheapest tier: few pages, short budget
    Free,
    /// Paid tier
    Pro,
    /// Highest tier: most pages, longest budget
    Enterprise,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Pro => write!(f, "pro"),
            Tier::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = crate::AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" | "paid" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(crate::AuditError::Config(format!("unknown tier '{other}'"))),
        }
    }
}

/// A content problem found on one page
///
/// Identity is the `(page_url, category, description)` tuple compared as
/// plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Page the issue was found on
    pub page_url: String,
    /// Category of the pass that produced it
    pub category: AuditCategory,
    /// What is wrong
    pub description: String,
    /// How bad it is
    pub severity: Severity,
    /// Suggested remedy
    pub suggested_fix: String,
}

impl Issue {
    /// Whether this issue has the same identity as `partial`
    pub fn matches(&self, partial: &IssuePartial) -> bool {
        self.category == partial.category
            && self.page_url == partial.page_url
            && self.description == partial.description
    }
}

/// Identity of a previously reported issue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuePartial {
    /// Page the issue was reported on
    pub page_url: String,
    /// Category it was reported under
    pub category: AuditCategory,
    /// Description text, matched verbatim
    pub description: String,
}

impl From<&Issue> for IssuePartial {
    fn from(issue: &Issue) -> Self {
        Self {
            page_url: issue.page_url.clone(),
            category: issue.category,
            description: issue.description.clone(),
        }
    }
}

/// Issues carried over from the previous run of the same domain
///
/// `excluded` holds issues the user resolved or ignored; they must not be
/// reported again. `active` holds issues still open, so a pass can avoid
/// restating them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueContext {
    /// Resolved or ignored issues
    #[serde(default)]
    pub excluded: Vec<IssuePartial>,
    /// Still-open issues
    #[serde(default)]
    pub active: Vec<IssuePartial>,
}

impl IssueContext {
    /// The slice of this context that belongs to one category
    pub fn for_category(&self, category: AuditCategory) -> IssueContext {
        IssueContext {
            excluded: self
                .excluded
                .iter()
                .filter(|p| p.category == category)
                .cloned()
                .collect(),
            active: self
                .active
                .iter()
                .filter(|p| p.category == category)
                .cloned()
                .collect(),
        }
    }

    /// Whether an issue was resolved or ignored previously
    pub fn is_excluded(&self, issue: &Issue) -> bool {
        self.excluded.iter().any(|p| issue.matches(p))
    }

    /// Whether the context carries nothing
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty() && self.active.is_empty()
    }
}

/// Outcome status of one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassStatus {
    /// The pass produced usable output
    Success,
    /// The pass failed; see `error_reason`
    Failed,
}

/// Result of one category pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPassResult {
    /// Category audited
    pub category: AuditCategory,
    /// Issues found (empty on failure)
    pub issues: Vec<Issue>,
    /// Pages the job actually opened
    pub opened_pages: Vec<String>,
    /// Number of distinct pages opened
    pub pages_audited: usize,
    /// Wall-clock duration including retries
    pub duration_ms: u64,
    /// Success or failure
    pub status: PassStatus,
    /// Why the pass failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl AuditPassResult {
    /// Build a failed result
    pub fn failed(category: AuditCategory, duration_ms: u64, reason: impl Into<String>) -> Self {
        Self {
            category,
            issues: Vec::new(),
            opened_pages: Vec::new(),
            pages_audited: 0,
            duration_ms,
            status: PassStatus::Failed,
            error_reason: Some(reason.into()),
        }
    }

    /// Whether the pass succeeded
    pub fn is_success(&self) -> bool {
        self.status == PassStatus::Success
    }
}

/// Classification of one probed link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Reachable, fast, short redirect path
    Ok,
    /// 4xx or 5xx
    Broken,
    /// Too many redirects before the final page
    RedirectChain,
    /// Redirects revisit a URL, or exceed the hop cap
    RedirectLoop,
    /// Responded, but slower than the threshold
    Slow,
    /// Certificate or TLS failure
    SslError,
    /// Deadline fired
    Timeout,
    /// Secure page links to a plaintext destination
    MixedContent,
    /// Any other transport failure
    Error,
}

impl LinkStatus {
    /// Severity of the issue raised for this status, if any
    pub fn severity(&self) -> Option<Severity> {
        match self {
            LinkStatus::Ok => None,
            LinkStatus::Broken | LinkStatus::RedirectLoop | LinkStatus::Timeout => {
                Some(Severity::Critical)
            }
            LinkStatus::SslError | LinkStatus::Error => Some(Severity::Medium),
            LinkStatus::RedirectChain | LinkStatus::Slow | LinkStatus::MixedContent => {
                Some(Severity::Low)
            }
        }
    }
}

/// Result of checking one (target, source) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkCheckResult {
    /// Absolute link target
    pub target_url: String,
    /// Page the link appears on
    pub source_url: String,
    /// Visible anchor text
    pub anchor_text: String,
    /// Classification
    pub status: LinkStatus,
    /// Last HTTP status seen, if any response arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Number of redirects followed
    pub redirect_count: usize,
    /// Wall-clock time for the whole chain
    pub response_time_ms: u64,
    /// Last URL reached, when different from the target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A hyperlink extracted from a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLink {
    /// Raw href attribute
    pub href: String,
    /// Visible anchor text
    #[serde(default)]
    pub anchor_text: String,
}

/// Structure extracted from one fetched page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    /// Page URL
    pub url: String,
    /// Document title
    #[serde(default)]
    pub title: Option<String>,
    /// Heading texts in document order
    #[serde(default)]
    pub headings: Vec<String>,
    /// Hyperlinks in document order
    #[serde(default)]
    pub links: Vec<PageLink>,
}

/// Structural extraction of a site, produced by the manifest provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentManifest {
    /// Base domain
    pub domain: String,
    /// Fetched pages with their structure
    #[serde(default)]
    pub pages: Vec<PageSnapshot>,
    /// Every internal URL discovered while crawling
    #[serde(default)]
    pub discovered_urls: Vec<String>,
}

impl ContentManifest {
    /// Fetched pages restricted to `urls`, compared after normalization
    pub fn pages_for(&self, urls: &[String]) -> Vec<PageSnapshot> {
        let wanted: BTreeSet<String> = urls.iter().map(|u| normalize_page_url(u)).collect();
        self.pages
            .iter()
            .filter(|p| wanted.contains(&normalize_page_url(&p.url)))
            .cloned()
            .collect()
    }

    /// Render the manifest of the given pages as prompt text
    pub fn render(&self, urls: &[String]) -> String {
        let mut out = String::new();
        for page in self.pages_for(urls) {
            out.push_str(&format!("## {}\n", page.url));
            if let Some(title) = &page.title {
                out.push_str(&format!("Title: {title}\n"));
            }
            for heading in &page.headings {
                out.push_str(&format!("- heading: {heading}\n"));
            }
            for link in &page.links {
                out.push_str(&format!("- link: [{}]({})\n", link.anchor_text, link.href));
            }
            out.push('\n');
        }
        out
    }
}

/// Merged result of one orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRunResult {
    /// Unique identifier for this run
    pub run_id: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Issues from every successful pass plus link validation
    pub issues: Vec<Issue>,
    /// Number of distinct pages opened across passes
    pub pages_audited: usize,
    /// Every URL the manifest provider discovered
    pub discovered_pages: Vec<String>,
    /// Distinct pages opened across passes, normalized
    pub audited_urls: Vec<String>,
    /// Wall-clock duration of the run
    pub duration_ms: u64,
    /// Tier the run was budgeted for
    pub tier: Tier,
    /// Categories whose pass failed (diagnostics only)
    #[serde(default)]
    pub failed_categories: Vec<AuditCategory>,
}

/// Create a run identifier: UTC timestamp plus a short random suffix
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("{}_{}", now.format("%Y-%m-%dT%H-%M-%SZ"), &uuid[..8])
}

/// Normalize a page URL for set membership: lowercase, no fragment, no
/// trailing slash, no leading `www.` on the host.
pub fn normalize_page_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    without_fragment
        .trim_end_matches('/')
        .to_lowercase()
        .replacen("://www.", "://", 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn partial(url: &str, category: AuditCategory, desc: &str) -> IssuePartial {
        IssuePartial {
            page_url: url.to_string(),
            category,
            description: desc.to_string(),
        }
    }

    #[test]
    fn test_context_for_category_filters_both_lists() {
        let ctx = IssueContext {
            excluded: vec![
                partial("https://a.test/", AuditCategory::Language, "typo X"),
                partial("https://a.test/", AuditCategory::BrandVoice, "too casual"),
            ],
            active: vec![partial("https://a.test/b", AuditCategory::Language, "typo Y")],
        };

        let language = ctx.for_category(AuditCategory::Language);
        assert_eq!(language.excluded.len(), 1);
        assert_eq!(language.active.len(), 1);
        assert!(ctx.for_category(AuditCategory::FactsAndConsistency).is_empty());
    }

    #[test]
    fn test_exclusion_is_exact_string_match() {
        let ctx = IssueContext {
            excluded: vec![partial("https://a.test/", AuditCategory::Language, "typo X")],
            active: vec![],
        };
        let mut issue = Issue {
            page_url: "https://a.test/".to_string(),
            category: AuditCategory::Language,
            description: "typo X".to_string(),
            severity: Severity::Low,
            suggested_fix: "fix it".to_string(),
        };
        assert!(ctx.is_excluded(&issue));

        issue.description = "typo X.".to_string();
        assert!(!ctx.is_excluded(&issue));
    }

    #[test]
    fn test_link_status_severity() {
        assert_eq!(LinkStatus::Ok.severity(), None);
        assert_eq!(LinkStatus::Broken.severity(), Some(Severity::Critical));
        assert_eq!(LinkStatus::RedirectLoop.severity(), Some(Severity::Critical));
        assert_eq!(LinkStatus::Timeout.severity(), Some(Severity::Critical));
        assert_eq!(LinkStatus::SslError.severity(), Some(Severity::Medium));
        assert_eq!(LinkStatus::Error.severity(), Some(Severity::Medium));
        assert_eq!(LinkStatus::RedirectChain.severity(), Some(Severity::Low));
        assert_eq!(LinkStatus::Slow.severity(), Some(Severity::Low));
        assert_eq!(LinkStatus::MixedContent.severity(), Some(Severity::Low));
    }

    #[test]
    fn test_normalize_page_url() {
        assert_eq!(normalize_page_url("https://A.test/About/"), "https://a.test/about");
        assert_eq!(normalize_page_url("https://a.test/#top"), "https://a.test");
        assert_eq!(normalize_page_url("https://WWW.a.test/"), "https://a.test");
        assert_eq!(normalize_page_url("https://a.test/www.html"), "https://a.test/www.html");
    }

    #[test]
    fn test_pages_for_matches_www_homepage() {
        let manifest = ContentManifest {
            domain: "a.test".to_string(),
            pages: vec![PageSnapshot {
                url: "https://www.a.test/".to_string(),
                title: Some("Home".to_string()),
                ..Default::default()
            }],
            discovered_urls: vec![],
        };

        let pages = manifest.pages_for(&["https://a.test/".to_string()]);
        assert_eq!(pages.len(), 1);
        assert!(manifest.render(&["https://a.test/".to_string()]).contains("Title: Home"));
    }

    #[test]
    fn test_manifest_render_selected_pages_only() {
        let manifest = ContentManifest {
            domain: "a.test".to_string(),
            pages: vec![
                PageSnapshot {
                    url: "https://a.test/".to_string(),
                    title: Some("Home".to_string()),
                    headings: vec!["Welcome".to_string()],
                    links: vec![PageLink {
                        href: "/about".to_string(),
                        anchor_text: "About".to_string(),
                    }],
                },
                PageSnapshot {
                    url: "https://a.test/other".to_string(),
                    ..Default::default()
                },
            ],
            discovered_urls: vec![],
        };

        let text = manifest.render(&["https://a.test".to_string()]);
        assert!(text.contains("Title: Home"));
        assert!(text.contains("- link: [About](/about)"));
        assert!(!text.contains("/other"));
    }

    #[test]
    fn test_tier_from_str() {
        assert_eq!("Free".parse::<Tier>().ok(), Some(Tier::Free));
        assert_eq!("paid".parse::<Tier>().ok(), Some(Tier::Pro));
        assert!("gold".parse::<Tier>().is_err());
    }

    #[test]
    fn test_run_id_shape() {
        let id = new_run_id(Utc::now());
        assert_eq!(id.split('_').nth(1).map(str::len), Some(8));
    }
}
