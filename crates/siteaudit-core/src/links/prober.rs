//! Redirect-aware link prober
//!
//! Issues a HEAD request with automatic redirects disabled and walks the
//! `Location` headers itself, so the whole chain is recorded and loops are
//! caught. One physical probe can be classified many times, once per page
//! that links to the target, since mixed content depends on the source page.

use crate::config::ProberPolicy;
use crate::models::{LinkCheckResult, LinkStatus};
use crate::{AuditError, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

/// How a probe ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTerminal {
    /// A 2xx response
    Reached {
        /// Final HTTP status
        status: u16,
    },
    /// A 4xx or 5xx response (or any other non-redirect, non-success code)
    HttpError {
        /// Final HTTP status
        status: u16,
    },
    /// Redirects revisited a URL or exceeded the hop cap
    Loop {
        /// Status of the last redirect response
        status: u16,
        /// What went wrong
        message: String,
    },
    /// A redirect response without a usable `Location` header
    MissingLocation {
        /// Status of the redirect response
        status: u16,
    },
    /// The deadline fired
    Timeout,
    /// Certificate or TLS failure
    Tls(String),
    /// Any other transport failure
    Transport(String),
}

/// Raw result of one physical probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Every URL visited, starting with the target
    pub chain: Vec<Url>,
    /// Wall-clock time across the chain
    pub elapsed_ms: u64,
    /// How the chain ended
    pub terminal: ProbeTerminal,
}

impl ProbeOutcome {
    /// Redirects followed
    pub fn redirect_count(&self) -> usize {
        self.chain.len().saturating_sub(1)
    }

    /// Last URL reached
    pub fn final_url(&self) -> Option<&Url> {
        self.chain.last()
    }

    fn http_status(&self) -> Option<u16> {
        match &self.terminal {
            ProbeTerminal::Reached { status }
            | ProbeTerminal::HttpError { status }
            | ProbeTerminal::Loop { status, .. }
            | ProbeTerminal::MissingLocation { status } => Some(*status),
            ProbeTerminal::Timeout | ProbeTerminal::Tls(_) | ProbeTerminal::Transport(_) => None,
        }
    }

    /// Classify this outcome for one linking page
    pub fn classify(
        &self,
        policy: &ProberPolicy,
        target_url: &str,
        source_url: &str,
        anchor_text: &str,
    ) -> LinkCheckResult {
        let (status, error) = match &self.terminal {
            ProbeTerminal::Reached { .. } => {
                if self.redirect_count() >= policy.redirect_chain_threshold {
                    (
                        LinkStatus::RedirectChain,
                        Some(format!("{} redirects before the final page", self.redirect_count())),
                    )
                } else if self.elapsed_ms > policy.slow_threshold_ms {
                    (LinkStatus::Slow, None)
                } else if self.is_mixed_content(source_url) {
                    (LinkStatus::MixedContent, None)
                } else {
                    (LinkStatus::Ok, None)
                }
            }
            ProbeTerminal::HttpError { status } => {
                (LinkStatus::Broken, Some(format!("HTTP {status}")))
            }
            ProbeTerminal::Loop { message, .. } => (LinkStatus::RedirectLoop, Some(message.clone())),
            ProbeTerminal::MissingLocation { status } => (
                LinkStatus::Error,
                Some(format!("HTTP {status} redirect without a Location header")),
            ),
            ProbeTerminal::Timeout => (LinkStatus::Timeout, Some("request timed out".to_string())),
            ProbeTerminal::Tls(message) => (LinkStatus::SslError, Some(message.clone())),
            ProbeTerminal::Transport(message) => (LinkStatus::Error, Some(message.clone())),
        };

        let final_url = self
            .final_url()
            .map(Url::to_string)
            .filter(|u| self.redirect_count() > 0 && u != target_url);

        LinkCheckResult {
            target_url: target_url.to_string(),
            source_url: source_url.to_string(),
            anchor_text: anchor_text.to_string(),
            status,
            http_status: self.http_status(),
            redirect_count: self.redirect_count(),
            response_time_ms: self.elapsed_ms,
            final_url,
            error,
        }
    }

    fn is_mixed_content(&self, source_url: &str) -> bool {
        let source_secure = Url::parse(source_url)
            .map(|u| u.scheme() == "https")
            .unwrap_or(false);
        let final_plain = self.final_url().map(|u| u.scheme() == "http").unwrap_or(false);
        source_secure && final_plain
    }
}

/// Checks whether one URL exists
#[async_trait]
pub trait LinkProber: Send + Sync {
    /// Probe `target`, giving up once `timeout` has elapsed
    async fn probe(&self, target: &Url, timeout: Duration) -> ProbeOutcome;
}

/// Prober over real HTTP
#[derive(Debug, Clone)]
pub struct HttpProber {
    http: reqwest::Client,
    policy: ProberPolicy,
}

impl HttpProber {
    /// Create a prober. Automatic redirects are disabled on the client.
    pub fn new(policy: ProberPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(policy.user_agent.clone())
            .build()
            .map_err(|e| AuditError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { http, policy })
    }

    /// Policy the prober was built with
    pub fn policy(&self) -> &ProberPolicy {
        &self.policy
    }

    async fn request(
        &self,
        method: Method,
        url: &Url,
        deadline: Instant,
    ) -> std::result::Result<reqwest::Response, ProbeTerminal> {
        match tokio::time::timeout_at(deadline, self.http.request(method, url.clone()).send()).await
        {
            Err(_) => Err(ProbeTerminal::Timeout),
            Ok(Err(err)) if err.is_timeout() => Err(ProbeTerminal::Timeout),
            Ok(Err(err)) => {
                let message = error_chain(&err);
                if is_tls_failure(&message) {
                    Err(ProbeTerminal::Tls(message))
                } else {
                    Err(ProbeTerminal::Transport(message))
                }
            }
            Ok(Ok(response)) => Ok(response),
        }
    }

    /// HEAD, falling back to GET when the server refuses HEAD
    async fn existence_check(
        &self,
        url: &Url,
        deadline: Instant,
    ) -> std::result::Result<reqwest::Response, ProbeTerminal> {
        let response = self.request(Method::HEAD, url, deadline).await?;
        if matches!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            debug!(%url, "HEAD refused, retrying with GET");
            return self.request(Method::GET, url, deadline).await;
        }
        Ok(response)
    }

    async fn walk(&self, target: &Url, deadline: Instant, chain: &mut Vec<Url>) -> ProbeTerminal {
        let mut current = target.clone();
        chain.push(current.clone());

        loop {
            let response = match self.existence_check(&current, deadline).await {
                Ok(response) => response,
                Err(terminal) => return terminal,
            };
            let status = response.status();
            let code = status.as_u16();

            if status.is_success() {
                return ProbeTerminal::Reached { status: code };
            }
            if !status.is_redirection() {
                return ProbeTerminal::HttpError { status: code };
            }

            let next = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|location| current.join(location).ok());
            let Some(mut next) = next else {
                return ProbeTerminal::MissingLocation { status: code };
            };
            next.set_fragment(None);

            if chain.contains(&next) {
                return ProbeTerminal::Loop {
                    status: code,
                    message: format!("redirect loop back to {next}"),
                };
            }
            if chain.len() > self.policy.max_redirects {
                return ProbeTerminal::Loop {
                    status: code,
                    message: format!("exceeded {} redirects", self.policy.max_redirects),
                };
            }

            chain.push(next.clone());
            current = next;
        }
    }
}

#[async_trait]
impl LinkProber for HttpProber {
    #[instrument(skip(self, target), fields(target = %target))]
    async fn probe(&self, target: &Url, timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut chain = Vec::new();

        let terminal = self.walk(target, deadline, &mut chain).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(?terminal, redirects = chain.len().saturating_sub(1), elapsed_ms, "Probe finished");

        ProbeOutcome {
            chain,
            elapsed_ms,
            terminal,
        }
    }
}

/// Render an error with all of its sources
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

fn is_tls_failure(message: &str) -> bool {
    let pattern = r"(?i)certificate|\bssl\b|\btls\b|handshake|self[- ]signed|unknown ?issuer|CERT_";
    match regex::Regex::new(pattern) {
        Ok(re) => re.is_match(message),
        Err(_) => false,
    }
}
