//! Site audit CLI

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use siteaudit_core::*;
use siteaudit_openai::{
    ClientConfig, OpenAIClient, OpenAIOutputRepair, OpenAIPageSelector, OpenAIReasoningService,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "siteaudit")]
#[command(about = "Website content audit - parallel audit passes and link validation")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML). Defaults to the user config directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the links of the pages in a manifest
    Links {
        /// Content manifest (JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Base domain. Defaults to the manifest's domain.
        #[arg(short, long)]
        domain: Option<String>,

        /// Also check links leaving the domain
        #[arg(long)]
        external: bool,

        /// Maximum probes in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print every result, `ok` included, as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a full audit of a domain
    Audit {
        /// Content manifest (JSON)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Domain to audit. Defaults to the manifest's domain.
        #[arg(short, long)]
        domain: Option<String>,

        /// Tier: free, pro or enterprise
        #[arg(short, long, default_value = "free")]
        tier: Tier,

        /// Issue context from the previous run (JSON)
        #[arg(long)]
        context: Option<PathBuf>,

        /// API base URL
        #[arg(long, default_value = "https://api.openai.com/v1")]
        base_url: String,

        /// Model for audit passes
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,

        /// Let the model choose the pages to audit
        #[arg(long)]
        llm_selection: bool,

        /// Write the run result here (JSON)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Links {
            manifest,
            domain,
            external,
            concurrency,
            json,
        } => check_links(config, manifest, domain, external, concurrency, json).await,
        Commands::Audit {
            manifest,
            domain,
            tier,
            context,
            base_url,
            model,
            llm_selection,
            out,
        } => {
            run_audit(
                config,
                AuditArgs {
                    manifest,
                    domain,
                    tier,
                    context,
                    base_url,
                    model,
                    llm_selection,
                    out,
                },
            )
            .await
        }
        Commands::PrintConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("siteaudit").join("config.toml"))
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<AuditConfig> {
    if let Some(path) = explicit {
        return AuditConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()));
    }
    match default_config_path() {
        Some(path) if path.exists() => AuditConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        _ => Ok(AuditConfig::default()),
    }
}

fn read_manifest(path: &Path) -> anyhow::Result<ContentManifest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing manifest {}", path.display()))
}

fn spinner(message: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message.to_string());
    Ok(pb)
}

async fn check_links(
    mut config: AuditConfig,
    manifest: PathBuf,
    domain: Option<String>,
    external: bool,
    concurrency: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let manifest = read_manifest(&manifest)?;
    let domain = domain.unwrap_or_else(|| manifest.domain.clone());
    config.links.check_external |= external;
    if let Some(concurrency) = concurrency {
        config.links.concurrency = concurrency;
    }
    config.validate()?;

    println!("{}", style("🔗 Link Validation").bold().cyan());
    println!("  Domain: {}", domain);
    println!("  Pages: {}", manifest.pages.len());
    println!("  Concurrency: {}", config.links.concurrency);
    println!();

    let validator = LinkValidator::http(config.prober.clone())?;
    let pb = spinner("Probing links...")?;
    let results = validator
        .check_links(&manifest.pages, &domain, &config.links)
        .await?;
    pb.finish_with_message(format!("Checked {} links", results.len()));

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let issues: Vec<Issue> = results.iter().filter_map(link_issue).collect();
    if issues.is_empty() {
        println!("\n{}", style("✅ No link problems found").green().bold());
        return Ok(());
    }

    println!("\n{}", style(format!("⚠️  {} link problems", issues.len())).yellow());
    for issue in &issues {
        print_issue(issue);
    }
    Ok(())
}

struct AuditArgs {
    manifest: PathBuf,
    domain: Option<String>,
    tier: Tier,
    context: Option<PathBuf>,
    base_url: String,
    model: String,
    llm_selection: bool,
    out: Option<PathBuf>,
}

async fn run_audit(config: AuditConfig, args: AuditArgs) -> anyhow::Result<()> {
    let manifest = read_manifest(&args.manifest)?;
    let domain = args.domain.unwrap_or_else(|| manifest.domain.clone());
    let context: IssueContext = match &args.context {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading issue context {}", path.display()))?;
            serde_json::from_str(&raw)?
        }
        None => IssueContext::default(),
    };

    let api_key = std::env::var("OPENAI_API_KEY")
        .context("OPENAI_API_KEY must be set to run an audit")?;
    let client = OpenAIClient::new(ClientConfig {
        base_url: args.base_url,
        api_key: SecretString::new(api_key.into()),
        default_model: args.model,
        ..ClientConfig::default()
    })?;

    println!("{}", style("🔍 Site Audit").bold().cyan());
    println!("  Domain: {}", domain);
    println!("  Tier: {}", args.tier);
    println!(
        "  Carried-over issues: {} excluded, {} active",
        context.excluded.len(),
        context.active.len()
    );
    println!();

    let manifests = StaticManifestProvider::new();
    manifests
        .insert(ContentManifest {
            domain: domain.clone(),
            ..manifest
        })
        .await;

    let executor = PassExecutor::new(
        Arc::new(OpenAIReasoningService::new(client.clone())),
        config.pass.clone(),
    )
    .with_repair(Arc::new(OpenAIOutputRepair::new(client.clone())));
    let links = LinkValidator::http(config.prober.clone())?;

    let mut orchestrator = AuditOrchestrator::new(Arc::new(manifests), executor, links, config);
    if args.llm_selection {
        orchestrator = orchestrator.with_selector(Arc::new(OpenAIPageSelector::new(client)));
    }

    let pb = spinner("Running audit passes...")?;
    let result = orchestrator.run_audit(&domain, args.tier, context).await;
    pb.finish_and_clear();

    let result = match result {
        Ok(result) => result,
        Err(AuditError::AllPassesFailed { failed }) => {
            println!("{}", style("❌ Every audit pass failed").red().bold());
            for (category, reason) in &failed {
                println!("  - {}: {}", category, reason);
            }
            anyhow::bail!("audit of {} failed", domain);
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", style("📊 Audit Summary").bold().green());
    println!("  Run ID: {}", result.run_id);
    println!("  Pages audited: {}", result.pages_audited);
    println!("  Pages discovered: {}", result.discovered_pages.len());
    println!("  Issues: {}", result.issues.len());
    println!("  Duration: {:.1}s", result.duration_ms as f64 / 1000.0);
    if !result.failed_categories.is_empty() {
        let failed: Vec<String> = result.failed_categories.iter().map(|c| c.to_string()).collect();
        println!("  {}", style(format!("Failed passes: {}", failed.join(", "))).yellow());
    }

    for category in AuditCategory::ALL {
        let issues: Vec<&Issue> = result.issues.iter().filter(|i| i.category == category).collect();
        if issues.is_empty() {
            continue;
        }
        println!("\n{}", style(format!("{} ({})", category, issues.len())).bold());
        for issue in issues {
            print_issue(issue);
        }
    }

    if let Some(out) = args.out {
        std::fs::write(&out, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("writing {}", out.display()))?;
        println!("\n{}", style(format!("📄 Result written to {}", out.display())).bold());
    }

    println!("\n{}", style("✅ Done!").green().bold());
    Ok(())
}

fn print_issue(issue: &Issue) {
    let severity = match issue.severity {
        Severity::Critical => style("critical").red().bold(),
        Severity::Medium => style("medium").yellow(),
        Severity::Low => style("low").dim(),
    };
    println!("  [{}] {}", severity, issue.page_url);
    println!("      {}", issue.description);
    if !issue.suggested_fix.is_empty() {
        println!("      {} {}", style("fix:").dim(), issue.suggested_fix);
    }
}
