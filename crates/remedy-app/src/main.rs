//! Remedy - rule-driven auto-remediation for PowerShell scripts
//!
//! Runs detected lint violations through a chain of fix rules, refuses any
//! result that no longer parses, and backs up every file before writing it.

mod output;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use remedy_adapters::backup::restore;
use remedy_adapters::config::{Config, PROJECT_CONFIG_FILE};
use remedy_adapters::violations::ViolationFile;
use remedy_core::registry::RuleRegistry;
use remedy_core::rules::builtin_registry;
use remedy_engine::{CancellationToken, Engine, RemediationRequest};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "remedy",
    about = "Fix PowerShell lint violations safely",
    long_about = "Applies fix rules for detected lint violations, validates that the\n\
                  result still parses, and backs up each file before writing it.",
    version
)]
struct Args {
    /// Raise log verbosity (-v info, -vv debug). REMEDY_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file to use instead of remedy.toml / the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fix violations in files or directories
    Fix(FixArgs),
    /// List the available fix rules
    Rules,
    /// Put the newest backup of a file back in place
    Restore {
        file: PathBuf,
    },
    /// Write a default remedy.toml in the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args, Debug)]
struct FixArgs {
    /// Files or directories (defaults to current directory)
    #[arg(default_value = ".")]
    paths: Vec<PathBuf>,

    /// Only run these rules (comma separated)
    #[arg(long, value_delimiter = ',')]
    rules: Vec<String>,

    /// Never run these rules (comma separated)
    #[arg(long, value_delimiter = ',')]
    skip: Vec<String>,

    /// Show what would change without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the diff of every changed file
    #[arg(long)]
    show_diff: bool,

    /// Dry run that exits non-zero when any file would change
    #[arg(long)]
    check: bool,

    /// Maximum number of worker threads
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Give up on a file after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Read violations from analyzer JSON output instead of the built-in checks
    #[arg(long)]
    violations: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    output: OutputFormat,

    /// With --output json, include the fixed content of every changed file
    #[arg(long)]
    include_content: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose, args.log_json);

    let registry = Arc::new(builtin_registry().context("Failed to build rule registry")?);
    match args.command {
        Command::Fix(fix) => run_fix(fix, args.config.as_deref(), registry),
        Command::Rules => {
            let cwd = std::env::current_dir()?;
            let (config, _) = Config::discover(&cwd, args.config.as_deref())?;
            let enabled = config.enabled_rules(&registry)?;
            output::print_rules(&registry, &enabled);
            Ok(ExitCode::SUCCESS)
        }
        Command::Restore { file } => {
            let cwd = std::env::current_dir()?;
            let (config, _) = Config::discover(&cwd, args.config.as_deref())?;
            let record = config
                .backup_store()
                .latest_for(&file)
                .with_context(|| format!("No backup to restore for {}", file.display()))?;
            restore(&record)
                .with_context(|| format!("Failed to restore {}", file.display()))?;
            println!(
                "restored {} from {}",
                record.original_path.display(),
                record.backup_path.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Init { force } => {
            let path = std::env::current_dir()?.join(PROJECT_CONFIG_FILE);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save(&path)?;
            println!("wrote {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_fix(
    args: FixArgs,
    config_path: Option<&Path>,
    registry: Arc<RuleRegistry>,
) -> Result<ExitCode> {
    let project_root = project_root(&args.paths)?;
    let (mut config, source) = Config::discover(&project_root, config_path)?;
    if let Some(source) = &source {
        tracing::info!(path = %source.display(), "using config");
    }

    // Command-line flags win over the config file.
    if !args.rules.is_empty() {
        config.fix.enabled_rules = Some(args.rules.clone());
    }
    config.fix.disabled_rules.extend(args.skip.iter().cloned());
    let enabled = config.enabled_rules(&registry)?;
    let dry_run = args.dry_run || args.check || config.fix.dry_run;
    let per_file_timeout = match args.timeout_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.per_file_timeout(),
    };

    let mut engine = Engine::new(registry)
        .with_backup_store(config.backup_store())
        .with_discover_options(config.discover_options());
    if let Some(path) = &args.violations {
        let violations = ViolationFile::load(path)?;
        tracing::info!(
            files = violations.file_count(),
            violations = violations.violation_count(),
            "loaded violations"
        );
        engine = engine.with_detector(Arc::new(violations));
    }

    let request = RemediationRequest {
        paths: args.paths.clone(),
        enabled_rule_ids: Some(enabled),
        dry_run,
        max_workers: args.jobs.or(config.fix.max_workers),
        per_file_timeout,
    };
    let report = engine
        .run_remediation(&request, &CancellationToken::new())
        .context("Remediation could not start")?;

    match args.output {
        OutputFormat::Human => output::print_human(&report, args.show_diff),
        OutputFormat::Json => output::print_json(&report, args.include_content)?,
    }

    let would_change = args.check && report.counts.files_changed > 0;
    if report.has_failures() || would_change {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Directory whose remedy.toml applies: the first path, or its parent.
fn project_root(paths: &[PathBuf]) -> Result<PathBuf> {
    let first = match paths.first() {
        Some(p) => p.clone(),
        None => return Ok(std::env::current_dir()?),
    };
    let dir = if first.is_dir() {
        first
    } else {
        first
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    };
    Ok(dir)
}

fn init_tracing(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_env("REMEDY_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt.with_target(false))
            .init();
    }
}
