//! The Iteration Driver — sequences the six dispatch-table calls into one
//! iteration, owns the continuous-mode loop, and holds the process-exclusive
//! lock for the duration of a run.
//!
//! Every long-lived collaborator an iteration needs (filesystem, VCS, agent,
//! stores) is gathered into one explicit `DriverContext` value rather than
//! reached for as process-wide state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AnimaConfig;
use crate::dispatch::{
    dispatch_plan, dispatch_record, dispatch_scan, run_analyze_wrapper, run_execute_wrapper,
    run_verify_wrapper, StageRegistry,
};
use crate::domain::models::{AnimaStatus, ExecutionResult, IterationOutcome};
use crate::domain::ports::{AgentPort, FileSystemPort, LinterPort, TestRunnerPort, VersionControlPort};
use crate::error::Result;
use crate::gate::GateState;
use crate::health::HealthMonitor;
use crate::history::HistoryStore;
use crate::lock::DriverLock;
use crate::quota::QuotaPolicy;
use crate::roadmap;
use crate::stages::analyze::AnalyzeInputs;
use crate::stages::execute::ExecuteInputs;
use crate::stages::plan::PlanInputs;
use crate::stages::record::RecordInputs;
use crate::stages::scan::ScanInputs;
use crate::stages::verify::VerifyInputs;
use crate::stages::NO_GAPS;

/// On-disk layout constants shared by the CLI and the driver.
pub const STATE_DIR_NAME: &str = ".anima";
pub const HISTORY_DIR_NAME: &str = "iterations";
pub const VISION_PATH: &str = "VISION.md";
pub const ROADMAP_DIR: &str = "roadmap";

/// Every long-lived collaborator an iteration needs, gathered into one
/// explicit value rather than reached for as process-wide state (section
/// 9's resolved design note). Constructed once at driver startup; the
/// mutable pieces (`health`, `last_execution`) live behind a `Mutex` only
/// because `run_iteration` takes `&self` so the CLI can hold one
/// `Arc<DriverContext>` across a continuous-mode loop.
pub struct DriverContext {
    pub config: AnimaConfig,
    pub project_root: PathBuf,
    pub registry: StageRegistry,
    pub fs: Arc<dyn FileSystemPort>,
    pub vcs: Arc<dyn VersionControlPort>,
    pub agent: Arc<dyn AgentPort>,
    pub linter: Option<Arc<dyn LinterPort>>,
    pub test_runner: Option<Arc<dyn TestRunnerPort>>,
    pub state_store: crate::state::StateStore,
    pub history: HistoryStore,
    pub gate: GateState,
    pub quota_policy: QuotaPolicy,
    health: Mutex<HealthMonitor>,
    last_execution: Mutex<Option<ExecutionResult>>,
}

impl DriverContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AnimaConfig,
        project_root: impl Into<PathBuf>,
        registry: StageRegistry,
        fs: Arc<dyn FileSystemPort>,
        vcs: Arc<dyn VersionControlPort>,
        agent: Arc<dyn AgentPort>,
        linter: Option<Arc<dyn LinterPort>>,
        test_runner: Option<Arc<dyn TestRunnerPort>>,
    ) -> Self {
        let project_root = project_root.into();
        let anima_dir = project_root.join(STATE_DIR_NAME);
        let quota_policy = QuotaPolicy::new(
            config.quota.sleep_rate_limited_seconds,
            config.quota.sleep_exhausted_seconds,
            config.quota.sleep_max_seconds,
        );
        Self {
            state_store: crate::state::StateStore::new(crate::state::default_state_path(&anima_dir)),
            history: HistoryStore::new(project_root.join(HISTORY_DIR_NAME)),
            gate: GateState::new(&anima_dir),
            health: Mutex::new(HealthMonitor::load(crate::health::default_health_path(&anima_dir))),
            last_execution: Mutex::new(None),
            quota_policy,
            config,
            project_root,
            registry,
            fs,
            vcs,
            agent,
            linter,
            test_runner,
        }
    }

    pub fn anima_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR_NAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        crate::lock::default_lock_path(&self.anima_dir())
    }

    fn protected_paths(&self) -> &[String] {
        &self.config.protected_paths
    }

    fn debug_dir(&self) -> PathBuf {
        self.anima_dir()
    }
}

/// Why the driver stopped running iterations; the CLI maps each variant
/// to a process exit code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopReason {
    /// Reached the caller-supplied iteration cap.
    MaxIterationsReached,
    /// `analyze` returned `NO_GAPS`; nothing left to do this pass.
    Sleeping,
    /// `consecutive_failures` hit `max_consecutive_failures`.
    Paused,
    /// A human approval gate is now pending.
    Gated,
    /// The caller asked for a single iteration (`--once`) and got one.
    SingleShotComplete,
    /// An external interrupt (e.g. `SIGINT`) was observed between
    /// iterations or during cooldown.
    Interrupted,
}

/// The outcome of a single `run_iteration` call, reported back to the CLI.
#[derive(Clone, Debug)]
pub struct IterationOutcomeReport {
    pub iteration_id: Option<String>,
    pub outcome: Option<IterationOutcome>,
    pub slept: bool,
    pub gated: bool,
    pub summary: Option<String>,
}

/// Runs exactly one iteration of the scan/analyze/plan/execute/verify/record
/// pipeline. Returns once the iteration either went to sleep (no gaps), produced a
/// gated result, finished a dry run, or fully completed verify+record.
pub async fn run_iteration(ctx: &DriverContext, dry_run: bool) -> Result<IterationOutcomeReport> {
    let mut state = ctx.state_store.load()?;
    let iteration_number = state.iteration_count + 1;
    let mut health = ctx.health.lock().await;

    // 2. scan -> pre_state.
    let scan_inputs = ScanInputs {
        project_root: &ctx.project_root,
        state_dir_name: STATE_DIR_NAME,
        history_dir_name: HISTORY_DIR_NAME,
        protected_paths: ctx.protected_paths(),
        linter: ctx.linter.as_deref(),
        test_runner: ctx.test_runner.as_deref(),
    };
    let pre_state = dispatch_scan(&ctx.registry, &mut health, &scan_inputs).await?;

    // 3. vision + history.
    let vision = roadmap::load_vision(ctx.fs.as_ref(), VISION_PATH, ROADMAP_DIR).await?;
    let history = ctx.history.load_recent(HISTORY_WINDOW_FOR_PLAN);

    // 4. analyze -> gaps. NO_GAPS puts the system to sleep without
    //    incrementing iteration_count (the one documented exception to
    //    incrementing the counter on every pass).
    let health_report = crate::health::module_health(&pre_state.modules, &health.read_stats());
    let analyze_inputs = AnalyzeInputs {
        vision: &vision,
        state: &pre_state,
        history: &history,
        health: &health_report,
        history_window_for_stuck: ctx.config.history_window_for_stuck,
    };
    let gaps = run_analyze_wrapper(&ctx.registry, &mut health, &ctx.gate, &analyze_inputs).await?;
    if gaps.summary == NO_GAPS {
        state.status = AnimaStatus::Sleep;
        ctx.state_store.save(&state)?;
        return Ok(IterationOutcomeReport {
            iteration_id: None,
            outcome: None,
            slept: true,
            gated: false,
            summary: Some(NO_GAPS.to_string()),
        });
    }

    let (_achieved, target_version) = roadmap::detect_current_milestone(&vision);
    let target_version = target_version.unwrap_or_else(|| state.current_milestone.clone());

    // 5. plan -> prompt.
    let plan_inputs = PlanInputs {
        state: &pre_state,
        gaps: &gaps,
        history: &history,
        iteration_number,
        target_version: &target_version,
        protected_paths: ctx.protected_paths(),
    };
    let plan = dispatch_plan(&ctx.registry, &mut health, &plan_inputs).await?;

    // 6. pre-iteration VCS snapshot.
    let snapshot_ref = ctx
        .vcs
        .create_snapshot(&format!("pre-iteration snapshot {}", plan.iteration_id))
        .await
        .map_err(|e| crate::error::AnimaError::Other(e.to_string()))?;

    let started = Instant::now();

    // 7. execute -> exec_result.
    let execute_inputs = ExecuteInputs {
        plan: &plan,
        agent: ctx.agent.as_ref(),
        protected_paths: ctx.protected_paths(),
        dry_run,
        debug_dir: &ctx.debug_dir(),
    };
    let exec_result =
        run_execute_wrapper(&ctx.registry, &mut health, &ctx.gate, &ctx.quota_policy, &execute_inputs).await?;
    *ctx.last_execution.lock().await = Some(exec_result.clone());

    if !dry_run && ctx.gate.is_gate_pending() {
        return Ok(IterationOutcomeReport {
            iteration_id: Some(plan.iteration_id.clone()),
            outcome: None,
            slept: false,
            gated: true,
            summary: Some(exec_result.output),
        });
    }

    if dry_run {
        return Ok(IterationOutcomeReport {
            iteration_id: Some(plan.iteration_id.clone()),
            outcome: None,
            slept: false,
            gated: false,
            summary: Some(exec_result.output),
        });
    }

    // 8. scan -> post_state.
    let post_state = dispatch_scan(&ctx.registry, &mut health, &scan_inputs).await?;

    // 9. verify(pre, post) -> verification.
    let last_execution = ctx.last_execution.lock().await;
    let verify_inputs = VerifyInputs {
        pre: &pre_state,
        post: &post_state,
        last_execution: last_execution.as_ref(),
    };
    let verification = run_verify_wrapper(&ctx.registry, &mut health, &verify_inputs).await?;
    drop(last_execution);

    // 10. record -> report. Accumulate cost/tokens/elapsed.
    let elapsed = started.elapsed().as_secs_f64();
    let gaps_addressed = plan
        .gap
        .as_ref()
        .map(|g| g.description.clone())
        .unwrap_or_else(|| plan.gaps_summary.clone());
    let record_inputs = RecordInputs {
        iteration_id: &plan.iteration_id,
        gaps_addressed: &gaps_addressed,
        plan_summary: &plan.prompt,
        execution: &exec_result,
        verification: &verification,
        duration_seconds: elapsed,
        history: &ctx.history,
    };
    let report = dispatch_record(&ctx.registry, &mut health, &record_inputs).await?;

    state.cumulative_cost_usd += report.cost_usd;
    state.cumulative_tokens += report.total_tokens;
    state.cumulative_seconds += report.elapsed_seconds;

    let outcome = if verification.all_passed {
        // 11. success path.
        if ctx.config.auto_push {
            let _ = ctx.vcs.commit_and_push(&report.summary).await;
        }
        state.consecutive_failures = 0;
        state.completed_items.extend(report.improvements.clone());
        if let Ok(Some(milestone)) =
            roadmap::tag_milestone_if_advanced(ctx.vcs.as_ref(), &vision, &state.current_milestone).await
        {
            state.current_milestone = milestone;
        }
        IterationOutcome::Success
    } else {
        // 12. rollback + failure accounting.
        let _ = ctx.vcs.rollback_to(&snapshot_ref).await;
        state.consecutive_failures += 1;
        if state.consecutive_failures >= ctx.config.max_consecutive_failures {
            state.status = AnimaStatus::Paused;
        }
        IterationOutcome::Failure
    };

    // 13. persist.
    state.iteration_count = iteration_number;
    state.last_iteration_id = Some(report.iteration_id.clone());
    ctx.state_store.save(&state)?;

    Ok(IterationOutcomeReport {
        iteration_id: Some(report.iteration_id),
        outcome: Some(outcome),
        slept: false,
        gated: false,
        summary: Some(report.summary),
    })
}

/// Historically `4.7.3`'s stuck-gap lookback; `plan` also consults history
/// for its own stuck-gap escalation, but only needs a small recent window.
const HISTORY_WINDOW_FOR_PLAN: usize = 10;

/// Runs iterations back to back with a cooldown sleep between each,
/// stopping once the configured continuous-mode condition is met. `max` of
/// `None` means unbounded; `once` forces exactly one iteration regardless
/// of `max`. `cancel` is checked between iterations and races the cooldown
/// sleep, so an external interrupt stops the loop promptly instead of
/// waiting out the remaining cooldown.
pub async fn run_continuous(
    ctx: Arc<DriverContext>,
    once: bool,
    max: Option<u64>,
    dry_run: bool,
    cooldown_override: Option<Duration>,
    cancel: CancellationToken,
    mut on_iteration: impl FnMut(&IterationOutcomeReport),
) -> Result<StopReason> {
    let _lock = DriverLock::acquire(ctx.lock_path())?;
    let cooldown = cooldown_override.unwrap_or(Duration::from_secs(ctx.config.iteration_cooldown_seconds));

    let mut completed: u64 = 0;
    loop {
        let report = run_iteration(&ctx, dry_run).await?;
        on_iteration(&report);

        if cancel.is_cancelled() {
            return Ok(StopReason::Interrupted);
        }
        if report.gated {
            return Ok(StopReason::Gated);
        }
        if report.slept {
            return Ok(StopReason::Sleeping);
        }
        completed += 1;

        if once || dry_run {
            return Ok(StopReason::SingleShotComplete);
        }

        let state = ctx.state_store.load()?;
        if state.status == AnimaStatus::Paused {
            return Ok(StopReason::Paused);
        }
        if let Some(max) = max {
            if completed >= max {
                return Ok(StopReason::MaxIterationsReached);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(cooldown) => {}
            _ = cancel.cancelled() => return Ok(StopReason::Interrupted),
        }
    }
}

pub fn default_project_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn anima_dir_for(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR_NAME)
}
