//! CLI command definitions for skill-forge.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::metrics::{compare_reports, export_metrics, init_metrics};
use crate::report::load_report;
use crate::runner::{create_agent, AgentType, EvalReport, Evaluation, RunConfig};
use crate::sandbox::{DockerProviderConfig, Provider, ProviderKind, ProviderOptions};
use crate::task::Task;

/// Default output directory for reports.
const DEFAULT_OUTPUT_DIR: &str = "./results";

/// Evaluate agent skills by running tasks in isolated sandboxes.
#[derive(Parser)]
#[command(name = "skill-forge")]
#[command(about = "Run agents against tasks over repeated sandboxed trials and score them")]
#[command(version)]
#[command(
    long_about = "skill-forge runs an agent against a task N times, each trial in a fresh sandbox, grades every trial and reports pass rate, pass@k and pass^k.\n\nExample usage:\n  skill-forge run ./tasks/pdf-extract --trials 5 --parallel 2 --skill ./skills/pdf\n  skill-forge compare results/with.json results/without.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run an evaluation of one task.
    #[command(alias = "eval")]
    Run(RunArgs),

    /// Compare a report with skills against a baseline without them.
    Compare(CompareArgs),
}

/// Arguments for `skill-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task directory (instruction.md, task.yaml, tests/, environment/).
    pub task_dir: PathBuf,

    /// Number of trials.
    #[arg(short = 'n', long, default_value = "5")]
    pub trials: usize,

    /// Maximum trials running at once.
    #[arg(short, long, default_value = "1")]
    pub parallel: usize,

    /// Sandbox provider (local, docker).
    #[arg(long, default_value = "local")]
    pub provider: ProviderKind,

    /// Skill bundle directory to inject (repeatable).
    #[arg(short, long = "skill")]
    pub skills: Vec<PathBuf>,

    /// Agent type (oracle, command).
    #[arg(short, long, default_value = "oracle")]
    pub agent: AgentType,

    /// Command template for the command agent; must contain {instruction}.
    #[arg(long, env = "SKILL_FORGE_AGENT_COMMAND")]
    pub agent_command: Option<String>,

    /// Environment variable forwarded into the sandbox as a secret (repeatable).
    #[arg(long = "secret-env")]
    pub secret_env: Vec<String>,

    /// k for pass@k and pass^k (defaults to the number of trials).
    #[arg(short, long)]
    pub k: Option<usize>,

    /// Output directory for the report.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Do not write the report to disk.
    #[arg(long)]
    pub no_save: bool,

    /// Secrets of this length or shorter are not redacted.
    #[arg(long, default_value = "8")]
    pub redaction_min_length: usize,

    /// Base directory for local workspaces (defaults to the system temp dir).
    #[arg(long)]
    pub workspace_dir: Option<PathBuf>,

    /// Docker network mode for trial containers.
    #[arg(long, default_value = "bridge")]
    pub network_mode: String,

    /// Enforce the task's storage limit on trial containers.
    #[arg(long)]
    pub storage_quota: bool,

    /// Print the full report as JSON instead of a summary.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `skill-forge compare`.
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Report produced with skills.
    pub with_skills: PathBuf,

    /// Baseline report produced without skills.
    pub without_skills: PathBuf,

    /// Print the comparison as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_evaluation_command(args).await,
        Commands::Compare(args) => run_compare_command(args).await,
    }
}

async fn run_evaluation_command(args: RunArgs) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Failed to register metrics");
    }

    let task = Task::load(&args.task_dir)
        .with_context(|| format!("Failed to load task from {}", args.task_dir.display()))?;
    let agent = create_agent(args.agent, args.agent_command.clone())?;

    let mut config = RunConfig::new()
        .with_trials(args.trials)
        .with_parallel(args.parallel)
        .with_provider(args.provider)
        .with_skills(args.skills.clone())
        .with_output_dir(&args.output)
        .with_redaction_min_length(args.redaction_min_length);
    for name in &args.secret_env {
        config = config.with_secret_env_name(name);
    }
    if let Some(k) = args.k {
        config = config.with_k(k);
    }
    if args.no_save {
        config = config.without_persistence();
    }

    let options = ProviderOptions {
        local_base_dir: args.workspace_dir.clone(),
        docker: DockerProviderConfig {
            network_mode: args.network_mode.clone(),
            enforce_storage_quota: args.storage_quota,
            ..DockerProviderConfig::default()
        },
    };
    let provider = Provider::create(args.provider, options)
        .await
        .context("Failed to initialize sandbox provider")?;

    info!(task = %task.name, provider = %args.provider, agent = agent.name(), "Running evaluation");
    let outcome = Evaluation::new(task, config)
        .run(&provider, agent.as_ref())
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else {
        print_summary(&outcome.report);
        if let Some(path) = &outcome.report_path {
            println!("  Report:       {}", path.display());
        }
    }

    tracing::debug!(metrics = %export_metrics(), "Prometheus metrics");
    Ok(())
}

async fn run_compare_command(args: CompareArgs) -> anyhow::Result<()> {
    let with_skills = read_report(&args.with_skills).await?;
    let without_skills = read_report(&args.without_skills).await?;
    let comparison = compare_reports(&with_skills, &without_skills);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
        return Ok(());
    }

    println!("\n=== Skill Comparison: {} ===", comparison.task);
    println!("Skills:          {}", comparison.skills.join(", "));
    println!("Pass rate with:  {:.3}", comparison.pass_rate_with);
    println!("Pass rate w/o:   {:.3}", comparison.pass_rate_without);
    println!("Normalized gain: {:+.3}", comparison.normalized_gain);
    Ok(())
}

async fn read_report(path: &Path) -> anyhow::Result<EvalReport> {
    load_report(path)
        .await
        .with_context(|| format!("Failed to read report {}", path.display()))
}

fn print_summary(report: &EvalReport) {
    println!("\n=== Evaluation Results: {} ===", report.task);
    println!("Provider:       {}", report.provider);
    println!("Agent:          {}", report.agent);
    if !report.skills_used.is_empty() {
        println!("Skills:         {}", report.skills_used.join(", "));
    }
    println!("Trials:         {} (parallel {})", report.num_trials, report.parallel);
    println!("Successes:      {}", report.successes);
    println!("Failed trials:  {}", report.failed_trials());
    println!("Pass rate:      {:.3}", report.pass_rate);
    println!("pass@{}:         {:.3}", report.k, report.pass_at_k);
    println!("pass^{}:         {:.3}", report.k, report.pass_pow_k);
    println!();
    for trial in &report.trials {
        println!(
            "  #{:<3} {:<9} reward={:.3} commands={:<3} {:.1}s",
            trial.trial_id, trial.status, trial.reward, trial.command_count, trial.duration_secs
        );
        if let Some(err) = &trial.error {
            println!("       error: {err}");
        }
    }
}
