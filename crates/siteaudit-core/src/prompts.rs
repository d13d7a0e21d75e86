//! Instruction templates for audit passes

use crate::models::{AuditCategory, IssueContext, IssuePartial};

/// Output token meaning "nothing to report"
pub const NO_ISSUES_TOKEN: &str = "NO_ISSUES";

/// Output token meaning "the site blocked the crawler"
pub const BOT_PROTECTION_SENTINEL: &str = "BOT_PROTECTION_DETECTED";

const SHARED_RULES: &str = r#"You are auditing the published content of a website.

Rules:
- Open every assigned page and audit only those pages.
- Report only problems you can see on the live page. NEVER fabricate.
- One issue per problem. Quote the offending text in the description.
- Severity is one of: low, medium, critical.
- Do not report anything listed under "Previously resolved or ignored".
- Do not restate anything listed under "Already reported".

Output (STRICT):
- If there is nothing to report, output exactly NO_ISSUES
- If the site blocks you with a captcha, firewall or bot check, output exactly BOT_PROTECTION_DETECTED
- Otherwise output ONLY a JSON object:
{"issues":[{"page_url":"https://...","description":"...","severity":"low|medium|critical","suggested_fix":"..."}]}
"#;

/// Category-specific focus for a pass
pub fn category_focus(category: AuditCategory) -> &'static str {
    match category {
        AuditCategory::Language => {
            "Focus: spelling, grammar, punctuation, capitalization and wrong words. \
             Ignore stylistic preferences and regional spelling variants used consistently."
        }
        AuditCategory::FactsAndConsistency => {
            "Focus: factual errors, contradictions between pages (prices, dates, names, \
             figures, contact details) and outdated statements."
        }
        AuditCategory::LinksAndFormatting => {
            "Focus: link text that does not match its destination, broken layout, \
             empty sections, placeholder text, duplicated blocks and malformed lists or tables. \
             HTTP status of links is checked separately; do not probe links yourself."
        }
        AuditCategory::BrandVoice => {
            "Focus: tone shifts, inconsistent terminology or product naming, and copy that \
             contradicts the voice established on the homepage."
        }
    }
}

/// Full instruction set for one category
pub fn build_pass_instructions(category: AuditCategory) -> String {
    format!(
        "{SHARED_RULES}\nCategory: {category}\n{}\n",
        category_focus(category)
    )
}

/// Task input: assigned pages, manifest excerpt and issue context
pub fn build_pass_input(pages: &[String], manifest: &str, context: &IssueContext) -> String {
    let mut input = String::new();

    input.push_str("# Assigned pages\n");
    for page in pages {
        input.push_str(&format!("- {page}\n"));
    }

    if !manifest.trim().is_empty() {
        input.push_str("\n# Page manifest\n");
        input.push_str(manifest);
        input.push('\n');
    }

    push_partials(&mut input, "Previously resolved or ignored", &context.excluded);
    push_partials(&mut input, "Already reported", &context.active);

    input
}

fn push_partials(out: &mut String, heading: &str, partials: &[IssuePartial]) {
    if partials.is_empty() {
        return;
    }
    out.push_str(&format!("\n# {heading}\n"));
    for partial in partials {
        out.push_str(&format!("- {} :: {}\n", partial.page_url, partial.description));
    }
}

/// Instructions for the secondary repair step
pub const REPAIR_SYSTEM_PROMPT: &str = r#"You convert website audit notes into JSON.
Return ONLY a JSON object of the form
{"issues":[{"page_url":"https://...","description":"...","severity":"low|medium|critical","suggested_fix":"..."}]}
Keep every issue from the notes. Do not invent issues. If the notes contain no issues, return {"issues":[]}."#;
