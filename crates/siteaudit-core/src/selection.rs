//! Page selection

use crate::models::normalize_page_url;
use crate::provider::PageSelector;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Homepage URL of a domain
pub fn homepage_url(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        format!("{domain}/")
    } else {
        format!("https://{domain}/")
    }
}

/// Bare host of a domain given with or without a scheme
pub fn bare_domain(domain: &str) -> String {
    let domain = domain.trim();
    let without_scheme = domain
        .strip_prefix("https://")
        .or_else(|| domain.strip_prefix("http://"))
        .unwrap_or(domain);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_lowercase()
}

/// Deduplicate a selection, force the homepage in first, cap at `target`
pub fn finalize_selection(domain: &str, selected: Vec<String>, target: usize) -> Vec<String> {
    let homepage = homepage_url(domain);
    let mut seen = HashSet::new();
    let mut pages = Vec::with_capacity(target.max(1));

    for url in std::iter::once(homepage).chain(selected) {
        if pages.len() >= target.max(1) {
            break;
        }
        if seen.insert(normalize_page_url(&url)) {
            pages.push(url);
        }
    }
    pages
}

/// Deterministic selector: homepage first, then the shallowest paths
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPageSelector;

#[async_trait]
impl PageSelector for HeuristicPageSelector {
    async fn select(
        &self,
        domain: &str,
        discovered: &[String],
        target: usize,
    ) -> Result<Vec<String>> {
        let mut ranked: Vec<&String> = discovered.iter().collect();
        ranked.sort_by_key(|url| (path_depth(url), url.len()));
        Ok(finalize_selection(
            domain,
            ranked.into_iter().cloned().collect(),
            target,
        ))
    }
}

fn path_depth(url: &str) -> usize {
    let after_scheme = url.split("://").nth(1).unwrap_or(url);
    after_scheme
        .split('/')
        .skip(1)
        .filter(|segment| !segment.is_empty())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_homepage_url() {
        assert_eq!(homepage_url("example.test"), "https://example.test/");
        assert_eq!(homepage_url("http://example.test/"), "http://example.test/");
    }

    #[test]
    fn test_bare_domain() {
        assert_eq!(bare_domain("https://Example.test/path"), "example.test");
        assert_eq!(bare_domain("example.test"), "example.test");
    }

    #[test]
    fn test_finalize_always_includes_homepage() {
        let pages = finalize_selection(
            "example.test",
            vec![
                "https://example.test/a".to_string(),
                "https://example.test/b".to_string(),
                "https://example.test/a/".to_string(),
            ],
            2,
        );
        assert_eq!(pages, vec!["https://example.test/", "https://example.test/a"]);
    }

    #[tokio::test]
    async fn test_heuristic_prefers_shallow_paths() -> anyhow::Result<()> {
        let discovered = vec![
            "https://example.test/blog/2024/post".to_string(),
            "https://example.test/pricing".to_string(),
            "https://example.test/".to_string(),
            "https://example.test/about".to_string(),
        ];
        let pages = HeuristicPageSelector
            .select("example.test", &discovered, 3)
            .await?;
        assert_eq!(
            pages,
            vec![
                "https://example.test/",
                "https://example.test/about",
                "https://example.test/pricing",
            ]
        );
        Ok(())
    }
}
