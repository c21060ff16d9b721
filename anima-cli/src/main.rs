//! `anima` — the thin CLI front end for the iteration driver. Parses
//! subcommands, wires the concrete adapters, and maps the driver's
//! outcome to a process exit code.
//!
//! A `clap` derive enum of subcommands, a `tracing_subscriber::fmt` init
//! gated by verbosity flags, and a `main` that dispatches to one function
//! per subcommand and translates its `Result` into an `ExitCode`.

mod adapters;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anima_core::domain::models::AnimaStatus;
use anima_core::driver::{self, DriverContext, IterationOutcomeReport, StopReason};
use anima_core::dispatch::StageRegistry;
use anima_core::gate::GateState;
use anima_core::health::{self, HealthMonitor};
use anima_core::history::HistoryStore;
use anima_core::state::StateStore;
use anima_core::{AnimaConfig, ConfigLoader};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use adapters::{GitVersionControl, LocalFileSystem, SubprocessAgent};

#[derive(Parser)]
#[command(name = "anima", about = "Autonomous iteration engine", version)]
struct Cli {
    /// Project root to operate on (defaults to the current directory).
    #[arg(long, global = true)]
    project_root: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the iteration loop.
    Start {
        /// Run exactly one iteration and stop.
        #[arg(long)]
        once: bool,
        /// Stop after this many completed iterations.
        #[arg(long)]
        max: Option<u64>,
        /// Run the pipeline without committing, pushing, or recording.
        #[arg(long)]
        dry_run: bool,
        /// Override the configured cooldown between iterations, in seconds.
        #[arg(long)]
        cooldown: Option<u64>,
        /// Emit debug-level tracing.
        #[arg(long)]
        verbose: bool,
        /// Suppress all but warnings and errors.
        #[arg(long)]
        quiet: bool,
    },
    /// Prints current state and module health.
    Status,
    /// Clears the failure streak and wakes the driver from sleep.
    Reset,
    /// Lists recent iteration records.
    Log {
        /// Number of most recent records to show.
        #[arg(long, default_value_t = 10)]
        last: usize,
    },
    /// Clears a pending risk gate and allows the next execute to proceed.
    Approve,
    /// Appends a timestamped instruction to the inbox for the next analyze.
    Instruct {
        message: String,
    },
}

fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn project_root(cli: &Cli) -> std::path::PathBuf {
    cli.project_root.clone().unwrap_or_else(driver::default_project_root)
}

fn build_context(
    config: AnimaConfig,
    root: std::path::PathBuf,
    cancel: CancellationToken,
) -> Arc<DriverContext> {
    let agent_timeout = Duration::from_secs(config.timeouts.agent_seconds);
    let agent_name = config.agent.clone();
    let fs: Arc<dyn anima_core::domain::ports::FileSystemPort> = Arc::new(LocalFileSystem::new(&root));
    let vcs: Arc<dyn anima_core::domain::ports::VersionControlPort> = Arc::new(GitVersionControl::new(&root));
    let agent: Arc<dyn anima_core::domain::ports::AgentPort> =
        Arc::new(SubprocessAgent::for_agent_name(&agent_name, &root, agent_timeout, cancel));

    Arc::new(DriverContext::new(
        config,
        root,
        StageRegistry::new(),
        fs,
        vcs,
        agent,
        None,
        None,
    ))
}

fn report_line(report: &IterationOutcomeReport) {
    if report.slept {
        info!("no gaps found, going to sleep");
        return;
    }
    if report.gated {
        info!(iteration_id = ?report.iteration_id, "risk gate pending human approval");
        return;
    }
    match &report.outcome {
        Some(outcome) => info!(iteration_id = ?report.iteration_id, outcome = ?outcome, "iteration complete"),
        None => info!(iteration_id = ?report.iteration_id, "dry run complete"),
    }
}

async fn cmd_start(
    ctx: Arc<DriverContext>,
    once: bool,
    max: Option<u64>,
    dry_run: bool,
    cooldown: Option<u64>,
    cancel: CancellationToken,
) -> ExitCode {
    if !dry_run {
        match ctx.vcs.has_uncommitted_changes().await {
            Ok(true) => {
                error!("refusing to start: working tree has uncommitted changes");
                return ExitCode::from(1);
            }
            Ok(false) => {}
            Err(e) => info!(error = %e, "could not determine working tree state, continuing"),
        }
    }

    let state = match ctx.state_store.load() {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to load state");
            return ExitCode::from(1);
        }
    };
    if state.status == AnimaStatus::Paused {
        error!("refusing to start: driver is paused, run `anima reset` first");
        return ExitCode::from(1);
    }

    let cooldown = cooldown.map(Duration::from_secs);
    match driver::run_continuous(ctx, once, max, dry_run, cooldown, cancel, |report| report_line(report)).await {
        Ok(StopReason::Paused) => {
            error!("driver paused after repeated failures");
            ExitCode::from(1)
        }
        Ok(StopReason::Interrupted) => {
            warn!("interrupted, state persisted and lock released");
            ExitCode::from(130)
        }
        Ok(reason) => {
            info!(?reason, "driver stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "iteration failed");
            ExitCode::from(1)
        }
    }
}

fn cmd_status(ctx: &DriverContext) -> ExitCode {
    let state = match ctx.state_store.load() {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to load state");
            return ExitCode::from(1);
        }
    };
    println!("status: {}", state.status);
    println!("iteration_count: {}", state.iteration_count);
    println!("consecutive_failures: {}", state.consecutive_failures);
    println!("current_milestone: {}", state.current_milestone);
    println!(
        "last_iteration_id: {}",
        state.last_iteration_id.as_deref().unwrap_or("-")
    );
    println!(
        "cumulative: ${:.2}, {} tokens, {:.0}s",
        state.cumulative_cost_usd, state.cumulative_tokens, state.cumulative_seconds
    );
    if ctx.gate.is_gate_pending() {
        if let Some((summary, indicators, timestamp)) = ctx.gate.read_gate() {
            println!("gate: PENDING ({timestamp}) — {summary}");
            println!("  indicators: {}", indicators.join(", "));
        }
    }

    let monitor = HealthMonitor::load(health::default_health_path(&ctx.anima_dir()));
    let stats = monitor.read_stats();
    for (step, tally) in &stats.module_stats {
        println!("health[{step}]: {} calls, {} fallbacks", tally.calls, tally.fallbacks);
    }
    ExitCode::SUCCESS
}

fn cmd_reset(ctx: &DriverContext) -> ExitCode {
    let mut state = match ctx.state_store.load() {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to load state");
            return ExitCode::from(1);
        }
    };
    state.consecutive_failures = 0;
    state.status = AnimaStatus::Sleep;
    match ctx.state_store.save(&state) {
        Ok(()) => {
            info!("driver reset: consecutive_failures cleared, status set to sleep");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "failed to persist reset state");
            ExitCode::from(1)
        }
    }
}

fn cmd_log(history: &HistoryStore, last: usize) -> ExitCode {
    let records = history.load_recent(last);
    if records.is_empty() {
        println!("no iteration records yet");
        return ExitCode::SUCCESS;
    }
    for record in records {
        println!(
            "{} [{}] {} — {}",
            record.iteration_id,
            record.timestamp.to_rfc3339(),
            format!("{:?}", record.outcome).to_lowercase(),
            record.plan_summary.lines().next().unwrap_or("")
        );
    }
    ExitCode::SUCCESS
}

fn cmd_approve(gate: &GateState) -> ExitCode {
    if !gate.is_gate_pending() {
        println!("no gate is pending");
        return ExitCode::SUCCESS;
    }
    match gate.clear_gate() {
        Ok(()) => {
            info!("gate cleared, next execute will proceed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "failed to clear gate");
            ExitCode::from(1)
        }
    }
}

async fn cmd_instruct(root: &std::path::Path, message: &str) -> ExitCode {
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let filename = format!("inbox/{timestamp}.md");
    let full_path = root.join(&filename);
    if let Some(parent) = full_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            error!(error = %e, "failed to create inbox directory");
            return ExitCode::from(1);
        }
    }
    match tokio::fs::write(&full_path, message).await {
        Ok(()) => {
            info!(path = %filename, "instruction recorded for the next analyze pass");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "failed to write inbox entry");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let root = project_root(&cli);

    match &cli.command {
        Command::Start { verbose, quiet, .. } => init_tracing(*verbose, *quiet),
        _ => init_tracing(false, false),
    }

    let config = match ConfigLoader::load_default(&root) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Command::Start { once, max, dry_run, cooldown, .. } => {
            let cancel = CancellationToken::new();
            let listener_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("received interrupt, terminating in-flight agent and stopping after this iteration");
                    listener_cancel.cancel();
                }
            });
            let ctx = build_context(config, root, cancel.clone());
            cmd_start(ctx, once, max, dry_run, cooldown, cancel).await
        }
        Command::Status => {
            let ctx = build_context(config, root, CancellationToken::new());
            cmd_status(&ctx)
        }
        Command::Reset => {
            let ctx = build_context(config, root, CancellationToken::new());
            cmd_reset(&ctx)
        }
        Command::Log { last } => {
            let history = HistoryStore::new(root.join(driver::HISTORY_DIR_NAME));
            cmd_log(&history, last)
        }
        Command::Approve => {
            let gate = GateState::new(driver::anima_dir_for(&root));
            cmd_approve(&gate)
        }
        Command::Instruct { message } => cmd_instruct(&root, &message).await,
    }
}
