//! Configuration for the audit engine
//!
//! All thresholds, caps, intervals and tier budgets live here and are passed
//! into each component at construction. Every field has a default, so a
//! partial TOML file is enough.

use crate::models::{AuditCategory, Tier};
use crate::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Link prober policy
    pub prober: ProberPolicy,
    /// Link validation engine settings
    pub links: LinkCheckConfig,
    /// Audit pass executor policy
    pub pass: PassPolicy,
    /// Per-tier budgets
    pub tiers: TierTable,
}

impl AuditConfig {
    /// Parse a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AuditConfig =
            toml::from_str(raw).map_err(|e| AuditError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AuditError::Serialization(e.to_string()))
    }

    /// Reject values that would stall or disable a component
    pub fn validate(&self) -> Result<()> {
        if self.links.concurrency == 0 {
            return Err(AuditError::Config("links.concurrency must be at least 1".into()));
        }
        if self.prober.max_redirects == 0 {
            return Err(AuditError::Config("prober.max_redirects must be at least 1".into()));
        }
        if self.pass.poll_interval_ms == 0 {
            return Err(AuditError::Config("pass.poll_interval_ms must be positive".into()));
        }
        for tier in [Tier::Free, Tier::Pro, Tier::Enterprise] {
            let budget = self.tiers.budget(tier);
            if budget.categories.is_empty() {
                return Err(AuditError::Config(format!("tier '{tier}' has no categories")));
            }
            if budget.target_pages == 0 {
                return Err(AuditError::Config(format!("tier '{tier}' targets zero pages")));
            }
        }
        Ok(())
    }
}

/// Classification thresholds for the link prober
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProberPolicy {
    /// A successful response slower than this is `slow`
    pub slow_threshold_ms: u64,
    /// This many redirects or more before a 2xx is a `redirect_chain`
    pub redirect_chain_threshold: usize,
    /// Redirect hop cap; exceeding it is a `redirect_loop`
    pub max_redirects: usize,
    /// User-Agent sent with every probe
    pub user_agent: String,
}

impl Default for ProberPolicy {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 3_000,
            redirect_chain_threshold: 3,
            max_redirects: 10,
            user_agent: format!("siteaudit-linkcheck/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Settings for one link validation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkCheckConfig {
    /// Probes in flight at once
    pub concurrency: usize,
    /// Deadline for one probe, including its redirects
    pub timeout_ms: u64,
    /// Also probe links that leave the base domain
    pub check_external: bool,
    /// Candidate cap after deduplication
    pub max_links: usize,
}

impl Default for LinkCheckConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            timeout_ms: 10_000,
            check_external: false,
            max_links: 200,
        }
    }
}

impl LinkCheckConfig {
    /// Probe deadline as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Polling and retry policy for audit passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassPolicy {
    /// Delay between status polls
    pub poll_interval_ms: u64,
    /// Delay before the retry after a transient failure
    pub retry_delay_ms: u64,
    /// Retries after a transient failure
    pub max_retries: u32,
    /// Tool calls granted on top of one per assigned page
    pub tool_call_buffer: u32,
}

impl Default for PassPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            retry_delay_ms: 2_000,
            max_retries: 1,
            tool_call_buffer: 10,
        }
    }
}

impl PassPolicy {
    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry delay as a [`Duration`]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Tool-call budget for a pass over `page_count` pages
    pub fn tool_call_budget(&self, page_count: usize) -> u32 {
        u32::try_from(page_count)
            .unwrap_or(u32::MAX)
            .saturating_add(self.tool_call_buffer)
    }
}

/// Scope and time budget for one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBudget {
    /// Pages selected for auditing
    pub target_pages: usize,
    /// Wall-clock ceiling for each pass
    pub pass_timeout_secs: u64,
    /// Categories audited
    pub categories: Vec<AuditCategory>,
}

impl TierBudget {
    /// Pass ceiling as a [`Duration`]
    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }
}

/// Budgets for every tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTable {
    /// Free tier
    pub free: TierBudget,
    /// Pro tier
    pub pro: TierBudget,
    /// Enterprise tier
    pub enterprise: TierBudget,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            free: TierBudget {
                target_pages: 5,
                pass_timeout_secs: 240,
                categories: vec![
                    AuditCategory::Language,
                    AuditCategory::FactsAndConsistency,
                    AuditCategory::LinksAndFormatting,
                ],
            },
            pro: TierBudget {
                target_pages: 20,
                pass_timeout_secs: 420,
                categories: AuditCategory::ALL.to_vec(),
            },
            enterprise: TierBudget {
                target_pages: 50,
                pass_timeout_secs: 600,
                categories: AuditCategory::ALL.to_vec(),
            },
        }
    }
}

impl TierTable {
    /// Budget for a tier
    pub fn budget(&self, tier: Tier) -> &TierBudget {
        match tier {
            Tier::Free => &self.free,
            Tier::Pro => &self.pro,
            Tier::Enterprise => &self.enterprise,
        }
    }
}
