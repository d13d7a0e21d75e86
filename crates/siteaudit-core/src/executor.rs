//! Audit pass executor
//!
//! Runs one category-scoped job against the reasoning service:
//!
//! ```text
//! submit → poll (queued → in_progress → completed | incomplete | failed)
//!        → extract output → parse JSON (→ repair → parse) → AuditPassResult
//! ```
//!
//! The executor fails soft. Whatever happens, [`PassExecutor::execute`]
//! returns an [`AuditPassResult`]; failures are carried in its status.

use crate::config::PassPolicy;
use crate::models::{
    normalize_page_url, AuditCategory, AuditPassResult, Issue, IssueContext, PassStatus, Severity,
};
use crate::prompts::{
    build_pass_input, build_pass_instructions, BOT_PROTECTION_SENTINEL, NO_ISSUES_TOKEN,
};
use crate::provider::{JobHandle, JobRequest, JobSnapshot, OutputRepair, ReasoningService};
use crate::{AuditError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Everything one pass needs
#[derive(Debug, Clone)]
pub struct PassAssignment {
    /// Category to audit
    pub category: AuditCategory,
    /// Exactly the pages to audit
    pub pages: Vec<String>,
    /// Rendered manifest of those pages
    pub manifest: Arc<str>,
    /// Issue context; only the entries for `category` are used
    pub context: Arc<IssueContext>,
    /// Domains the job may browse
    pub allowed_domains: Vec<String>,
    /// Wall-clock ceiling for the whole pass, retries included
    pub timeout: Duration,
}

/// Runs single-category audit passes
#[derive(Clone)]
pub struct PassExecutor {
    service: Arc<dyn ReasoningService>,
    repair: Option<Arc<dyn OutputRepair>>,
    policy: PassPolicy,
}

impl std::fmt::Debug for PassExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassExecutor")
            .field("policy", &self.policy)
            .field("repair", &self.repair.is_some())
            .finish_non_exhaustive()
    }
}

impl PassExecutor {
    /// Create an executor without a repair step
    pub fn new(service: Arc<dyn ReasoningService>, policy: PassPolicy) -> Self {
        Self {
            service,
            repair: None,
            policy,
        }
    }

    /// Attach the secondary transformation used when direct parsing fails
    pub fn with_repair(mut self, repair: Arc<dyn OutputRepair>) -> Self {
        self.repair = Some(repair);
        self
    }

    /// Build the job for an assignment
    pub fn build_request(&self, assignment: &PassAssignment, context: &IssueContext) -> JobRequest {
        JobRequest {
            category: assignment.category,
            instructions: build_pass_instructions(assignment.category),
            input: build_pass_input(&assignment.pages, &assignment.manifest, context),
            allowed_domains: assignment.allowed_domains.clone(),
            tool_call_budget: self.policy.tool_call_budget(assignment.pages.len()),
        }
    }

    /// Run one pass. Never fails; see [`AuditPassResult::status`].
    #[instrument(skip_all, fields(category = %assignment.category, pages = assignment.pages.len()))]
    pub async fn execute(&self, assignment: &PassAssignment) -> AuditPassResult {
        let started = Instant::now();
        let deadline = started + assignment.timeout;
        let category = assignment.category;
        let context = assignment.context.for_category(category);
        let request = self.build_request(assignment, &context);

        let outcome = match self.run_with_retry(&request, started, deadline).await {
            Ok(snapshot) => self.interpret(assignment, &context, snapshot).await,
            Err(err) => Err(err),
        };
        let duration_ms = elapsed_ms(started);

        match outcome {
            Ok((issues, opened_pages)) => {
                info!(
                    issues = issues.len(),
                    opened = opened_pages.len(),
                    duration_ms,
                    "Pass complete"
                );
                AuditPassResult {
                    category,
                    issues,
                    pages_audited: opened_pages.len(),
                    opened_pages,
                    duration_ms,
                    status: PassStatus::Success,
                    error_reason: None,
                }
            }
            Err(err) => {
                warn!(duration_ms, "Pass failed: {}", err);
                AuditPassResult::failed(category, duration_ms, err.to_string())
            }
        }
    }

    async fn run_with_retry(
        &self,
        request: &JobRequest,
        started: Instant,
        deadline: Instant,
    ) -> Result<JobSnapshot> {
        let mut retries = 0;
        loop {
            match self.attempt(request, started, deadline).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) if err.is_retryable() && retries < self.policy.max_retries => {
                    retries += 1;
                    let delay = self.policy.retry_delay();
                    if Instant::now() + delay >= deadline {
                        warn!(retry = retries, "No budget left to retry after: {}", err);
                        return Err(AuditError::PassTimeout {
                            category: request.category,
                            elapsed_ms: elapsed_ms(started),
                        });
                    }
                    warn!(
                        retry = retries,
                        "Pass attempt failed, retrying in {:?}: {}", delay, err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One submit-and-poll cycle. `started` is the start of the whole pass.
    async fn attempt(
        &self,
        request: &JobRequest,
        started: Instant,
        deadline: Instant,
    ) -> Result<JobSnapshot> {
        let category = request.category;

        let handle = within(deadline, category, started, self.service.submit(request)).await?;
        debug!(job = %handle.id, "Job submitted");

        loop {
            let snapshot = within(deadline, category, started, self.service.poll(&handle)).await?;

            if snapshot.status.is_terminal() {
                return self.settle(&handle, snapshot);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AuditError::PassTimeout {
                    category,
                    elapsed_ms: elapsed_ms(started),
                });
            }
            debug!(job = %handle.id, status = %snapshot.status, "Job still running");
            tokio::time::sleep(self.policy.poll_interval().min(deadline - now)).await;
        }
    }

    fn settle(&self, handle: &JobHandle, snapshot: JobSnapshot) -> Result<JobSnapshot> {
        if snapshot.status.has_usable_output() {
            debug!(job = %handle.id, status = %snapshot.status, "Job settled");
            return Ok(snapshot);
        }
        Err(AuditError::JobFailed {
            status: snapshot.status.to_string(),
            reason: snapshot
                .error
                .unwrap_or_else(|| "no reason given".to_string()),
        })
    }

    async fn interpret(
        &self,
        assignment: &PassAssignment,
        context: &IssueContext,
        snapshot: JobSnapshot,
    ) -> Result<(Vec<Issue>, Vec<String>)> {
        let category = assignment.category;
        let raw = snapshot.output_text.unwrap_or_default();

        let drafts = match parse_pass_output(&raw) {
            Err(AuditError::Parse(reason)) => match &self.repair {
                Some(repair) => {
                    debug!("Direct parse failed ({}), repairing output", reason);
                    let repaired = repair
                        .repair(category, &raw)
                        .await
                        .map_err(|e| AuditError::Parse(format!("repair failed: {e}")))?;
                    parse_pass_output(&repaired)?
                }
                None => return Err(AuditError::Parse(reason)),
            },
            other => other?,
        };

        let issues = finalize_issues(category, drafts, context);
        let opened_pages = opened_pages(&snapshot.tool_calls, &assignment.pages);
        Ok((issues, opened_pages))
    }
}

/// Bound one service call by the pass deadline
async fn within<T>(
    deadline: Instant,
    category: AuditCategory,
    started: Instant,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout_at(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(AuditError::PassTimeout {
            category,
            elapsed_ms: elapsed_ms(started),
        }),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// An issue as written by the reasoning service, before stamping
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DraftIssue {
    /// Page the issue is on
    #[serde(alias = "url", alias = "pageUrl")]
    pub page_url: String,
    /// What is wrong
    pub description: String,
    /// Free-form severity, normalized later
    #[serde(default)]
    pub severity: String,
    /// Suggested remedy
    #[serde(default, alias = "suggestedFix", alias = "fix")]
    pub suggested_fix: String,
}

#[derive(Debug, Deserialize)]
struct PassPayload {
    issues: Vec<DraftIssue>,
}

/// Parse raw pass output.
///
/// Accepts the no-issues token or a JSON object with an `issues` array. The
/// bot-protection sentinel is an error, not an empty result.
pub fn parse_pass_output(raw: &str) -> Result<Vec<DraftIssue>> {
    let trimmed = raw.trim().trim_matches('`').trim();
    if trimmed.is_empty() {
        return Err(AuditError::Parse("empty output".to_string()));
    }
    if trimmed.trim_matches('"') == NO_ISSUES_TOKEN {
        return Ok(Vec::new());
    }
    if trimmed.contains(BOT_PROTECTION_SENTINEL) {
        return Err(AuditError::BotProtection);
    }

    // A JSON object without an `issues` array is not a zero-issue answer.
    match extract_json_object(trimmed) {
        Some(json) => serde_json::from_str::<PassPayload>(&json)
            .map(|payload| payload.issues)
            .map_err(|e| AuditError::Parse(e.to_string())),
        None => Err(AuditError::Parse("no JSON object found".to_string())),
    }
}

/// Normalize free-form severity text
pub fn parse_severity(raw: &str) -> Severity {
    match raw.trim().to_lowercase().as_str() {
        "critical" | "high" | "severe" | "major" => Severity::Critical,
        "medium" | "moderate" => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Stamp drafts with the category, drop blanks, duplicates and excluded
/// issues
fn finalize_issues(
    category: AuditCategory,
    drafts: Vec<DraftIssue>,
    context: &IssueContext,
) -> Vec<Issue> {
    let mut seen = HashSet::new();
    let mut excluded = 0usize;
    let mut issues = Vec::with_capacity(drafts.len());

    for draft in drafts {
        let description = draft.description.trim().to_string();
        if description.is_empty() {
            continue;
        }
        let issue = Issue {
            page_url: draft.page_url.trim().to_string(),
            category,
            description,
            severity: parse_severity(&draft.severity),
            suggested_fix: draft.suggested_fix.trim().to_string(),
        };
        if context.is_excluded(&issue) {
            excluded += 1;
            continue;
        }
        if seen.insert((issue.page_url.clone(), issue.description.clone())) {
            issues.push(issue);
        }
    }

    if excluded > 0 {
        info!(excluded, "Dropped previously resolved or ignored issues");
    }
    issues
}

/// Distinct pages opened according to the tool-call trace; the assigned
/// pages when the trace records none
fn opened_pages(trace: &[crate::provider::ToolCallTrace], assigned: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut opened = Vec::new();
    for call in trace {
        if !matches!(call.action.as_str(), "open_page" | "open" | "fetch") {
            continue;
        }
        if let Some(url) = &call.url {
            if seen.insert(normalize_page_url(url)) {
                opened.push(url.clone());
            }
        }
    }

    if opened.is_empty() {
        for url in assigned {
            if seen.insert(normalize_page_url(url)) {
                opened.push(url.clone());
            }
        }
    }
    opened
}

fn extract_json_object(input: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced_json(input) {
        return Some(fenced);
    }

    let mut in_string = false;
    let mut escape = false;
    let mut depth = 0usize;
    let mut start_idx: Option<usize> = None;

    for (idx, ch) in input.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start_idx = Some(idx);
                }
                depth = depth.saturating_add(1);
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(start) = start_idx {
                            return Some(input[start..=idx].to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    None
}

fn extract_fenced_json(input: &str) -> Option<String> {
    let fence_start = input.find("```json")?;
    let after = &input[fence_start + "```json".len()..];
    let fence_end = after.find("```")?;
    let candidate = after[..fence_end].trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IssuePartial;
    use crate::provider::{JobStatus, ToolCallTrace};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Service replaying scripted submit/poll answers
    #[derive(Default)]
    struct ScriptedService {
        submits: Mutex<VecDeque<Result<JobHandle>>>,
        polls: Mutex<VecDeque<Result<JobSnapshot>>>,
        submitted: Mutex<Vec<JobRequest>>,
    }

    impl ScriptedService {
        fn submit_ok(self, id: &str) -> Self {
            if let Ok(mut q) = self.submits.lock() {
                q.push_back(Ok(JobHandle { id: id.to_string() }));
            }
            self
        }

        fn submit_err(self, message: &str) -> Self {
            if let Ok(mut q) = self.submits.lock() {
                q.push_back(Err(AuditError::Provider(message.to_string())));
            }
            self
        }

        fn poll(self, status: JobStatus, output: Option<&str>) -> Self {
            if let Ok(mut q) = self.polls.lock() {
                q.push_back(Ok(JobSnapshot {
                    status,
                    output_text: output.map(str::to_string),
                    tool_calls: vec![],
                    error: None,
                }));
            }
            self
        }

        fn poll_err(self, message: &str) -> Self {
            if let Ok(mut q) = self.polls.lock() {
                q.push_back(Err(AuditError::Provider(message.to_string())));
            }
            self
        }

        fn submit_count(&self) -> usize {
            self.submitted.lock().map(|s| s.len()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedService {
        async fn submit(&self, request: &JobRequest) -> Result<JobHandle> {
            if let Ok(mut submitted) = self.submitted.lock() {
                submitted.push(request.clone());
            }
            self.submits
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| Ok(JobHandle { id: "job".to_string() }))
        }

        async fn poll(&self, _handle: &JobHandle) -> Result<JobSnapshot> {
            self.polls
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| {
                    Ok(JobSnapshot {
                        status: JobStatus::InProgress,
                        output_text: None,
                        tool_calls: vec![],
                        error: None,
                    })
                })
        }
    }

    struct FixedRepair(&'static str);

    #[async_trait]
    impl OutputRepair for FixedRepair {
        async fn repair(&self, _category: AuditCategory, _raw: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn assignment(category: AuditCategory) -> PassAssignment {
        PassAssignment {
            category,
            pages: vec![
                "https://a.test/".to_string(),
                "https://a.test/about".to_string(),
            ],
            manifest: Arc::from(""),
            context: Arc::new(IssueContext::default()),
            allowed_domains: vec!["a.test".to_string()],
            timeout: Duration::from_secs(240),
        }
    }

    const ONE_ISSUE: &str = r#"{"issues":[{"page_url":"https://a.test/","description":"Typo 'teh'","severity":"medium","suggested_fix":"the"}]}"#;

    #[test]
    fn test_parse_no_issues_token() -> anyhow::Result<()> {
        assert!(parse_pass_output("NO_ISSUES")?.is_empty());
        assert!(parse_pass_output("  `NO_ISSUES`\n")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_bot_sentinel_is_error() {
        assert!(matches!(
            parse_pass_output("BOT_PROTECTION_DETECTED"),
            Err(AuditError::BotProtection)
        ));
    }

    #[test]
    fn test_parse_json_in_prose_and_fences() -> anyhow::Result<()> {
        let prose = format!("Here you go:\n{ONE_ISSUE}\nThanks");
        assert_eq!(parse_pass_output(&prose)?.len(), 1);

        let fenced = format!("```json\n{ONE_ISSUE}\n```");
        assert_eq!(parse_pass_output(&fenced)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_parse_garbage_is_parse_error() {
        assert!(matches!(
            parse_pass_output("I found a few typos on the homepage."),
            Err(AuditError::Parse(_))
        ));
        assert!(matches!(parse_pass_output("   "), Err(AuditError::Parse(_))));
    }

    #[test]
    fn test_parse_json_without_issues_is_parse_error() {
        assert!(matches!(
            parse_pass_output(r#"{"status":"blocked by cloudflare captcha"}"#),
            Err(AuditError::Parse(_))
        ));
        assert!(matches!(parse_pass_output("{}"), Err(AuditError::Parse(_))));
    }

    #[test]
    fn test_parse_bot_sentinel_wins_over_json() {
        assert!(matches!(
            parse_pass_output("BOT_PROTECTION_DETECTED\n{}"),
            Err(AuditError::BotProtection)
        ));
        assert!(matches!(
            parse_pass_output(r#"BOT_PROTECTION_DETECTED {"issues":[]}"#),
            Err(AuditError::BotProtection)
        ));
    }

    #[test]
    fn test_parse_severity() {
        assert_eq!(parse_severity("High"), Severity::Critical);
        assert_eq!(parse_severity("moderate"), Severity::Medium);
        assert_eq!(parse_severity(""), Severity::Low);
    }

    #[test]
    fn test_opened_pages_from_trace_or_assignment() {
        let trace = vec![
            ToolCallTrace {
                action: "search".to_string(),
                url: None,
            },
            ToolCallTrace {
                action: "open_page".to_string(),
                url: Some("https://a.test/about".to_string()),
            },
            ToolCallTrace {
                action: "open_page".to_string(),
                url: Some("https://a.test/About/".to_string()),
            },
        ];
        let assigned = vec!["https://a.test/".to_string()];
        assert_eq!(opened_pages(&trace, &assigned), vec!["https://a.test/about"]);
        assert_eq!(opened_pages(&[], &assigned), assigned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_polls_until_completed() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_ok("job-1")
                .poll(JobStatus::Queued, None)
                .poll(JobStatus::InProgress, None)
                .poll(JobStatus::Completed, Some(ONE_ISSUE)),
        );
        let executor = PassExecutor::new(service.clone(), PassPolicy::default());

        let result = executor.execute(&assignment(AuditCategory::Language)).await;

        assert_eq!(result.status, PassStatus::Success);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].category, AuditCategory::Language);
        assert_eq!(result.issues[0].severity, Severity::Medium);
        assert_eq!(result.pages_audited, 2);
        assert_eq!(service.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_output_is_accepted() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_ok("job-1")
                .poll(JobStatus::Incomplete, Some(ONE_ISSUE)),
        );
        let executor = PassExecutor::new(service, PassPolicy::default());
        let result = executor.execute(&assignment(AuditCategory::BrandVoice)).await;
        assert!(result.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_not_retried() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_ok("job-1")
                .poll(JobStatus::Failed, None),
        );
        let executor = PassExecutor::new(service.clone(), PassPolicy::default());
        let result = executor.execute(&assignment(AuditCategory::Language)).await;

        assert_eq!(result.status, PassStatus::Failed);
        assert!(result.error_reason.unwrap_or_default().contains("failed"));
        assert_eq!(service.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_once() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_err("connection reset")
                .submit_ok("job-2")
                .poll(JobStatus::Completed, Some("NO_ISSUES")),
        );
        let executor = PassExecutor::new(service.clone(), PassPolicy::default());
        let result = executor.execute(&assignment(AuditCategory::Language)).await;

        assert!(result.is_success());
        assert!(result.issues.is_empty());
        assert_eq!(service.submit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_transient_error_fails_soft() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_err("connection reset")
                .submit_err("connection reset again"),
        );
        let executor = PassExecutor::new(service.clone(), PassPolicy::default());
        let result = executor.execute(&assignment(AuditCategory::Language)).await;

        assert_eq!(result.status, PassStatus::Failed);
        assert!(result
            .error_reason
            .unwrap_or_default()
            .contains("connection reset again"));
        assert_eq!(service.submit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_past_ceiling_times_out() {
        let service = Arc::new(ScriptedService::default().submit_ok("job-1"));
        let executor = PassExecutor::new(service.clone(), PassPolicy::default());
        let mut work = assignment(AuditCategory::FactsAndConsistency);
        work.timeout = Duration::from_secs(10);

        let started = Instant::now();
        let result = executor.execute(&work).await;

        assert_eq!(result.status, PassStatus::Failed);
        assert!(result.error_reason.unwrap_or_default().contains("budget"));
        assert!(started.elapsed() <= Duration::from_secs(11));
        assert_eq!(service.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bot_protection_fails_pass() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_ok("job-1")
                .poll(JobStatus::Completed, Some("BOT_PROTECTION_DETECTED")),
        );
        let executor = PassExecutor::new(service.clone(), PassPolicy::default());
        let result = executor.execute(&assignment(AuditCategory::Language)).await;

        assert_eq!(result.status, PassStatus::Failed);
        assert!(result.error_reason.unwrap_or_default().contains("bot protection"));
        assert_eq!(service.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repair_used_only_when_direct_parse_fails() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_ok("job-1")
                .poll(JobStatus::Completed, Some("Typo 'teh' on the homepage.")),
        );
        let executor = PassExecutor::new(service, PassPolicy::default())
            .with_repair(Arc::new(FixedRepair(ONE_ISSUE)));
        let result = executor.execute(&assignment(AuditCategory::Language)).await;

        assert!(result.is_success());
        assert_eq!(result.issues.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepairable_output_fails() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_ok("job-1")
                .poll(JobStatus::Completed, Some("nothing useful")),
        );
        let executor = PassExecutor::new(service, PassPolicy::default())
            .with_repair(Arc::new(FixedRepair("still not json")));
        let result = executor.execute(&assignment(AuditCategory::Language)).await;

        assert_eq!(result.status, PassStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_carries_category_context_and_budget() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_ok("job-1")
                .poll(JobStatus::Completed, Some(ONE_ISSUE)),
        );
        let executor = PassExecutor::new(service.clone(), PassPolicy::default());
        let mut work = assignment(AuditCategory::Language);
        work.context = Arc::new(IssueContext {
            excluded: vec![
                IssuePartial {
                    page_url: "https://a.test/".to_string(),
                    category: AuditCategory::Language,
                    description: "Typo 'teh'".to_string(),
                },
                IssuePartial {
                    page_url: "https://a.test/".to_string(),
                    category: AuditCategory::BrandVoice,
                    description: "Too casual".to_string(),
                },
            ],
            active: vec![],
        });

        let result = executor.execute(&work).await;

        // The only issue returned was excluded, so nothing survives.
        assert!(result.is_success());
        assert!(result.issues.is_empty());

        let submitted = service.submitted.lock().map(|s| s.clone()).unwrap_or_default();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].tool_call_budget, 12);
        assert!(submitted[0].input.contains("Typo 'teh'"));
        assert!(!submitted[0].input.contains("Too casual"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_without_issues_array_goes_to_repair() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_ok("job-1")
                .poll(JobStatus::Completed, Some(r#"{"status":"done"}"#)),
        );
        let executor = PassExecutor::new(service, PassPolicy::default())
            .with_repair(Arc::new(FixedRepair(ONE_ISSUE)));

        let result = executor.execute(&assignment(AuditCategory::Language)).await;

        assert!(result.is_success());
        assert_eq!(result.issues.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_resubmits_job() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_ok("job-1")
                .poll_err("poll connection reset")
                .submit_ok("job-2")
                .poll(JobStatus::Completed, Some(ONE_ISSUE)),
        );
        let executor = PassExecutor::new(service.clone(), PassPolicy::default());
        let result = executor.execute(&assignment(AuditCategory::Language)).await;

        assert!(result.is_success());
        assert_eq!(result.issues.len(), 1);
        assert_eq!(service.submit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_poll_error_fails_soft() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_ok("job-1")
                .poll_err("poll connection reset")
                .submit_ok("job-2")
                .poll_err("poll connection reset again"),
        );
        let executor = PassExecutor::new(service.clone(), PassPolicy::default());
        let result = executor.execute(&assignment(AuditCategory::Language)).await;

        assert_eq!(result.status, PassStatus::Failed);
        assert!(result
            .error_reason
            .unwrap_or_default()
            .contains("poll connection reset again"));
        assert_eq!(service.submit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_never_outlives_ceiling() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_err("connection reset")
                .submit_ok("job-2")
                .poll(JobStatus::Completed, Some(ONE_ISSUE)),
        );
        let policy = PassPolicy {
            retry_delay_ms: 60_000,
            ..PassPolicy::default()
        };
        let executor = PassExecutor::new(service.clone(), policy);
        let mut work = assignment(AuditCategory::Language);
        work.timeout = Duration::from_secs(10);

        let started = Instant::now();
        let result = executor.execute(&work).await;

        assert_eq!(result.status, PassStatus::Failed);
        assert!(result.error_reason.unwrap_or_default().contains("budget"));
        assert!(started.elapsed() <= Duration::from_secs(10));
        assert_eq!(service.submit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_retry_reports_whole_pass_time() {
        let service = Arc::new(
            ScriptedService::default()
                .submit_err("connection reset")
                .submit_ok("job-2"),
        );
        let executor = PassExecutor::new(service.clone(), PassPolicy::default());
        let mut work = assignment(AuditCategory::Language);
        work.timeout = Duration::from_secs(10);

        let result = executor.execute(&work).await;

        let reason = result.error_reason.unwrap_or_default();
        let elapsed_ms = reason
            .split("after ")
            .nth(1)
            .and_then(|rest| rest.trim_end_matches(" ms").parse::<u64>().ok())
            .unwrap_or_default();
        assert!(elapsed_ms >= 10_000, "reported {elapsed_ms} ms in '{reason}'");
        assert_eq!(service.submit_count(), 2);
    }
}
