//! castcheck CLI - round-robin multicast reachability runs
//!
//! Exit status: 0 when the run finished with zero EXEC_ERROR entries, 1 when
//! any probe could not be executed or observed, 2 for configuration,
//! inventory and persistence errors. FAIL and TIMEOUT never change it.

mod logging;
mod render;
mod settings;

use anyhow::{Context, Result};
use castcheck_core::application::{Coordinator, Deployer, RunOptions};
use castcheck_core::domain::{OutcomeStatus, RunReport, RunSummary};
use castcheck_core::port::id_provider::UuidProvider;
use castcheck_core::port::time_provider::SystemTimeProvider;
use castcheck_core::port::{RemoteExecutor, ReportStore};
use castcheck_infra_sqlite::SqliteReportStore;
use castcheck_infra_ssh::ShellExecutor;
use clap::{Parser, Subcommand};
use colored::Colorize;
use settings::AppSettings;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

const EXIT_OK: u8 = 0;
const EXIT_EXEC_ERRORS: u8 = 1;
const EXIT_TOOL_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "castcheck")]
#[command(about = "Round-robin multicast reachability checks across a host inventory", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML)
    #[arg(short, long, global = true, env = "CASTCHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Report database path (overrides database.path)
    #[arg(long, global = true, env = "CASTCHECK_DB_PATH")]
    db: Option<String>,

    /// Also append JSON logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Run every host's commands on this machine instead of over ssh
    #[arg(long, global = true)]
    local: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sweep: every host sends once while all others listen
    Run {
        /// Push this probe binary to every host before round 1
        #[arg(long, value_name = "PROBE_BINARY")]
        deploy: Option<PathBuf>,

        /// Capture read-only network diagnostics from every host first
        #[arg(long)]
        snapshot: bool,
    },

    /// Copy the probe binary to every host
    Deploy {
        /// Local probe binary
        probe: PathBuf,
    },

    /// Show a stored run
    Report {
        /// Run ID (default: most recent run)
        #[arg(long)]
        run: Option<String>,

        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init_logging(cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return ExitCode::from(EXIT_TOOL_ERROR);
        }
    };

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(EXIT_TOOL_ERROR)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<u8> {
    let mut settings = AppSettings::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        settings.database.path = settings::expand(db)?;
    }

    match cli.command {
        Commands::Run { deploy, snapshot } => {
            let deploy_probe = deploy
                .as_deref()
                .map(settings::expand_path)
                .transpose()?;
            if let Some(probe) = &deploy_probe {
                ensure_probe_exists(probe)?;
            }
            let options = RunOptions {
                deploy_probe,
                capture_snapshots: snapshot,
            };
            run_sweep(&settings, executor(&settings, cli.local), &options).await
        }
        Commands::Deploy { probe } => {
            let probe = settings::expand_path(&probe)?;
            ensure_probe_exists(&probe)?;
            deploy_probe(&settings, executor(&settings, cli.local), &probe).await
        }
        Commands::Report { run, json } => show_report(&settings, run, json).await,
    }
}

fn executor(settings: &AppSettings, local: bool) -> Arc<dyn RemoteExecutor> {
    if local {
        Arc::new(ShellExecutor::local())
    } else {
        Arc::new(ShellExecutor::ssh(settings.ssh.clone()))
    }
}

fn ensure_probe_exists(probe: &Path) -> Result<()> {
    if !probe.is_file() {
        anyhow::bail!("Probe binary {} not found", probe.display());
    }
    Ok(())
}

async fn open_store(settings: &AppSettings) -> Result<SqliteReportStore> {
    let db_path = &settings.database.path;
    if let Some(parent) = Path::new(db_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    info!(db_path = %db_path, "Opening report database");
    SqliteReportStore::open(db_path)
        .await
        .with_context(|| format!("Failed to open report database {}", db_path))
}

async fn run_sweep(
    settings: &AppSettings,
    executor: Arc<dyn RemoteExecutor>,
    options: &RunOptions,
) -> Result<u8> {
    let inventory = settings.inventory()?;
    let store = Arc::new(open_store(settings).await?);

    let coordinator = Coordinator::new(
        settings.sweep(),
        executor,
        store.clone(),
        Arc::new(SystemTimeProvider),
        Arc::new(UuidProvider),
    )
    .context("Invalid sweep configuration")?;

    let summary = coordinator
        .run(&inventory, options)
        .await
        .context("Run aborted")?;

    print_summary(&summary);
    match store.load_run(&summary.run_id).await {
        Ok(Some(report)) => print_problems(&report),
        Ok(None) => warn!(run_id = %summary.run_id, "Finished run missing from the report store"),
        Err(e) => warn!(run_id = %summary.run_id, error = %e, "Could not reload run for details"),
    }

    Ok(if summary.exit_code() == 0 {
        EXIT_OK
    } else {
        EXIT_EXEC_ERRORS
    })
}

fn print_summary(summary: &RunSummary) {
    println!("{}", format!("Run {}", summary.run_id).cyan().bold());
    println!();
    println!("{}", render::matrix_table(&summary.matrix));
    println!();
    println!("  {}", render::status_counts(&summary.matrix));
    if summary.filled_pairs > 0 {
        println!(
            "  {} {} pairs had no round result and count as EXEC_ERROR",
            "!".yellow().bold(),
            summary.filled_pairs
        );
    }
    if summary.cleanup_failures > 0 {
        println!(
            "  {} {} receiver cleanups failed (see logs)",
            "!".yellow().bold(),
            summary.cleanup_failures
        );
    }
    println!("  {} {}", "Report:".bold(), summary.location);
}

fn print_problems(report: &RunReport) {
    if let Some(table) = render::problem_table(report) {
        println!();
        println!("{}", table);
    }
}

async fn deploy_probe(
    settings: &AppSettings,
    executor: Arc<dyn RemoteExecutor>,
    probe: &Path,
) -> Result<u8> {
    let inventory = settings.inventory()?;
    let sweep = settings.sweep();
    sweep.validate().context("Invalid sweep configuration")?;

    let results = Deployer::new(executor, Arc::new(sweep))
        .deploy(&inventory, probe)
        .await;

    println!("{}", render::deploy_table(&results));
    let failed = results.iter().filter(|r| !r.is_ok()).count();
    if failed == 0 {
        println!("{}", "✓ Probe deployed to every host".green().bold());
        Ok(EXIT_OK)
    } else {
        println!(
            "{}",
            format!("✗ {} of {} hosts failed", failed, results.len())
                .red()
                .bold()
        );
        Ok(EXIT_EXEC_ERRORS)
    }
}

async fn show_report(settings: &AppSettings, run: Option<String>, json: bool) -> Result<u8> {
    let store = open_store(settings).await?;
    let run_id = match run {
        Some(id) => id,
        None => store
            .latest_run_id()
            .await?
            .context("No runs recorded yet")?,
    };
    let report = store
        .load_run(&run_id)
        .await?
        .with_context(|| format!("Run {} not found", run_id))?;

    let mut matrix = report.matrix()?;
    if report.is_finalized() {
        matrix.fill_missing(OutcomeStatus::ExecError);
    }

    if json {
        let doc = serde_json::json!({
            "run_id": report.run_id,
            "started_at": report.started_at,
            "finished_at": report.finished_at,
            "matrix": matrix,
            "rounds": report.rounds,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        let state = if report.is_finalized() {
            "finished".green()
        } else {
            "incomplete".yellow()
        };
        println!(
            "{} ({})",
            format!("Run {}", report.run_id).cyan().bold(),
            state
        );
        println!();
        println!("{}", render::matrix_table(&matrix));
        println!();
        println!("  {}", render::status_counts(&matrix));
        print_problems(&report);
    }

    Ok(if matrix.count(OutcomeStatus::ExecError) == 0 {
        EXIT_OK
    } else {
        EXIT_EXEC_ERRORS
    })
}
