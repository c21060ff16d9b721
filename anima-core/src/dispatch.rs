//! Dispatch Table — the mutable registry binding each of the six pipeline
//! step names to its current implementation, the uniform fallback wrapper,
//! and the three wrapper specializations (*execute*'s gate+quota
//! composition, *verify*'s execution-issue merge, *analyze*'s gate
//! short-circuit).
//!
//! Each step name maps to a boxed trait object; a replacement implementation
//! is swapped in by rebuilding a `StageRegistry` at driver startup rather
//! than hot-swapped mid-run — only the choice of which implementation runs
//! is data-driven.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::models::{ExecutionResult, GapReport, IterationPlan, ProjectState, VerificationReport};
use crate::error::{AnimaError, ErrorClass, Result, RetryClassifiable};
use crate::gate::{classify_risk, GateState};
use crate::health::HealthMonitor;
use crate::quota::QuotaPolicy;
use crate::stages::record::{record, RecordInputs, RecordSummary};
use crate::stages::{self, analyze::AnalyzeInputs, execute::ExecuteInputs, plan::PlanInputs, scan::ScanInputs, verify::VerifyInputs};
use crate::stages::{ANALYZE, EXECUTE, NO_GAPS, PLAN, RECORD, SCAN, VERIFY};

#[async_trait]
pub trait ScanStage: Send + Sync {
    async fn call(&self, inputs: &ScanInputs<'_>) -> Result<ProjectState>;
}

#[async_trait]
pub trait AnalyzeStage: Send + Sync {
    async fn call(&self, inputs: &AnalyzeInputs<'_>) -> Result<GapReport>;
}

#[async_trait]
pub trait PlanStage: Send + Sync {
    async fn call(&self, inputs: &PlanInputs<'_>) -> Result<IterationPlan>;
}

#[async_trait]
pub trait ExecuteStage: Send + Sync {
    async fn call(&self, inputs: &ExecuteInputs<'_>) -> Result<ExecutionResult>;
}

#[async_trait]
pub trait VerifyStage: Send + Sync {
    async fn call(&self, inputs: &VerifyInputs<'_>) -> Result<VerificationReport>;
}

#[async_trait]
pub trait RecordStage: Send + Sync {
    async fn call(&self, inputs: &RecordInputs<'_>) -> Result<RecordSummary>;
}

/// Binds each of the six step names to an optional replacement
/// implementation. `None` means "use the baseline", which is also what a
/// freshly constructed registry defaults to.
#[derive(Default, Clone)]
pub struct StageRegistry {
    scan: Option<Arc<dyn ScanStage>>,
    analyze: Option<Arc<dyn AnalyzeStage>>,
    plan: Option<Arc<dyn PlanStage>>,
    execute: Option<Arc<dyn ExecuteStage>>,
    verify: Option<Arc<dyn VerifyStage>>,
    record: Option<Arc<dyn RecordStage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scan(mut self, stage: Arc<dyn ScanStage>) -> Self {
        self.scan = Some(stage);
        self
    }

    pub fn with_analyze(mut self, stage: Arc<dyn AnalyzeStage>) -> Self {
        self.analyze = Some(stage);
        self
    }

    pub fn with_plan(mut self, stage: Arc<dyn PlanStage>) -> Self {
        self.plan = Some(stage);
        self
    }

    pub fn with_execute(mut self, stage: Arc<dyn ExecuteStage>) -> Self {
        self.execute = Some(stage);
        self
    }

    pub fn with_verify(mut self, stage: Arc<dyn VerifyStage>) -> Self {
        self.verify = Some(stage);
        self
    }

    pub fn with_record(mut self, stage: Arc<dyn RecordStage>) -> Self {
        self.record = Some(stage);
        self
    }
}

/// "import-time unavailable" vs. "runtime" classification, reusing
/// `AnimaError`'s variant shape rather than re-parsing strings.
fn error_kind(e: &AnimaError) -> &'static str {
    match e.classify() {
        ErrorClass::Retryable => "runtime-retryable",
        ErrorClass::Permanent => "runtime-permanent",
        ErrorClass::Degraded => "runtime-degraded",
    }
}

pub async fn dispatch_scan(
    registry: &StageRegistry,
    health: &mut HealthMonitor,
    inputs: &ScanInputs<'_>,
) -> Result<ProjectState> {
    match registry.scan.as_ref() {
        None => {
            health.record_fallback(SCAN, "unavailable", "impl missing");
            stages::scan(inputs).await
        }
        Some(stage) => match stage.call(inputs).await {
            Ok(out) => {
                health.record_success(SCAN);
                Ok(out)
            }
            Err(e) => {
                health.record_fallback(SCAN, error_kind(&e), &e.to_string());
                stages::scan(inputs).await
            }
        },
    }
}

pub async fn dispatch_analyze(
    registry: &StageRegistry,
    health: &mut HealthMonitor,
    inputs: &AnalyzeInputs<'_>,
) -> Result<GapReport> {
    match registry.analyze.as_ref() {
        None => {
            health.record_fallback(ANALYZE, "unavailable", "impl missing");
            stages::analyze(inputs).await
        }
        Some(stage) => match stage.call(inputs).await {
            Ok(out) => {
                health.record_success(ANALYZE);
                Ok(out)
            }
            Err(e) => {
                health.record_fallback(ANALYZE, error_kind(&e), &e.to_string());
                stages::analyze(inputs).await
            }
        },
    }
}

pub async fn dispatch_plan(
    registry: &StageRegistry,
    health: &mut HealthMonitor,
    inputs: &PlanInputs<'_>,
) -> Result<IterationPlan> {
    match registry.plan.as_ref() {
        None => {
            health.record_fallback(PLAN, "unavailable", "impl missing");
            stages::plan(inputs).await
        }
        Some(stage) => match stage.call(inputs).await {
            Ok(out) => {
                health.record_success(PLAN);
                Ok(out)
            }
            Err(e) => {
                health.record_fallback(PLAN, error_kind(&e), &e.to_string());
                stages::plan(inputs).await
            }
        },
    }
}

async fn dispatch_execute_inner(
    registry: &StageRegistry,
    health: &mut HealthMonitor,
    inputs: &ExecuteInputs<'_>,
) -> Result<ExecutionResult> {
    match registry.execute.as_ref() {
        None => {
            health.record_fallback(EXECUTE, "unavailable", "impl missing");
            stages::execute(inputs).await
        }
        Some(stage) => match stage.call(inputs).await {
            Ok(out) => {
                health.record_success(EXECUTE);
                Ok(out)
            }
            Err(e) => {
                health.record_fallback(EXECUTE, error_kind(&e), &e.to_string());
                stages::execute(inputs).await
            }
        },
    }
}

async fn dispatch_verify_inner(
    registry: &StageRegistry,
    health: &mut HealthMonitor,
    inputs: &VerifyInputs<'_>,
) -> Result<VerificationReport> {
    match registry.verify.as_ref() {
        None => {
            health.record_fallback(VERIFY, "unavailable", "impl missing");
            stages::verify(inputs).await
        }
        Some(stage) => match stage.call(inputs).await {
            Ok(out) => {
                health.record_success(VERIFY);
                Ok(out)
            }
            Err(e) => {
                health.record_fallback(VERIFY, error_kind(&e), &e.to_string());
                stages::verify(inputs).await
            }
        },
    }
}

pub async fn dispatch_record(
    registry: &StageRegistry,
    health: &mut HealthMonitor,
    inputs: &RecordInputs<'_>,
) -> Result<RecordSummary> {
    match registry.record.as_ref() {
        None => {
            health.record_fallback(RECORD, "unavailable", "impl missing");
            record(inputs).await
        }
        Some(stage) => match stage.call(inputs).await {
            Ok(out) => {
                health.record_success(RECORD);
                Ok(out)
            }
            Err(e) => {
                health.record_fallback(RECORD, error_kind(&e), &e.to_string());
                record(inputs).await
            }
        },
    }
}

fn gate_haystack(plan: &IterationPlan) -> String {
    let mut haystack = plan.prompt.clone();
    for action in &plan.actions {
        haystack.push('\n');
        haystack.push_str(&action.target_files.join("\n"));
    }
    haystack
}

fn gated_result() -> ExecutionResult {
    ExecutionResult {
        success: true,
        output: "GATED: awaiting human approval".to_string(),
        errors: String::new(),
        exit_code: 0,
        elapsed_seconds: 0.0,
        cost_usd: 0.0,
        total_tokens: 0,
        dry_run: true,
        files_changed: vec![],
        quota_state: None,
    }
}

/// The *execute* wrapper: risk-gate classification, then the dispatch
/// table call, then a single capped sleep-and-retry on a quota signal.
pub async fn run_execute_wrapper(
    registry: &StageRegistry,
    health: &mut HealthMonitor,
    gate: &GateState,
    quota_policy: &QuotaPolicy,
    inputs: &ExecuteInputs<'_>,
) -> Result<ExecutionResult> {
    if !inputs.dry_run {
        let decision = classify_risk(&gate_haystack(inputs.plan));
        if decision.gated {
            if gate.consume_bypass() {
                tracing::info!(iteration_id = %inputs.plan.iteration_id, "risk gate bypassed, proceeding");
            } else {
                gate.write_gate(&inputs.plan.gaps_summary, &decision.indicators)
                    .map_err(|source| AnimaError::PersistenceFailure {
                        what: "risk gate marker".to_string(),
                        path: std::path::PathBuf::from("gate_pending.json"),
                        source,
                    })?;
                tracing::warn!(
                    iteration_id = %inputs.plan.iteration_id,
                    indicators = ?decision.indicators,
                    "iteration gated, awaiting human approval"
                );
                return Ok(gated_result());
            }
        }
    }

    let mut result = dispatch_execute_inner(registry, health, inputs).await?;

    if !result.success {
        if let Some(quota) = result.quota_state.clone() {
            let sleep_secs = quota_policy.sleep_seconds(&quota);
            tracing::warn!(sleep_secs, status = %quota.status, "quota limited, sleeping before single retry");
            tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
            result = dispatch_execute_inner(registry, health, inputs).await?;
        }
    }

    Ok(result)
}

/// The *verify* wrapper: after the dispatched verifier runs, guarantees
/// an EXECUTION issue is present whenever the last
/// execution result failed, even if a replacement verifier omitted the
/// check the baseline performs natively.
pub async fn run_verify_wrapper(
    registry: &StageRegistry,
    health: &mut HealthMonitor,
    inputs: &VerifyInputs<'_>,
) -> Result<VerificationReport> {
    let mut report = dispatch_verify_inner(registry, health, inputs).await?;

    if let Some(exec) = inputs.last_execution {
        if !exec.success && !report.issues.iter().any(|i| i.starts_with("EXECUTION:")) {
            report.issues.push(format!("EXECUTION: agent execution failed: {}", exec.errors));
            report.all_passed = false;
            if !report.stages.iter().any(|s| s.stage == "execution") {
                report.stages.push(crate::domain::models::StageResult {
                    stage: "execution".to_string(),
                    status: crate::domain::models::StageStatus::Failed,
                    output: exec.errors.clone(),
                });
            }
            let failed: Vec<&str> = report
                .stages
                .iter()
                .filter(|s| s.status == crate::domain::models::StageStatus::Failed)
                .map(|s| s.stage.as_str())
                .collect();
            report.summary = format!(
                "{} of {} verification stages failed: {}.",
                failed.len(),
                report.stages.len(),
                failed.join(", ")
            );
        }
    }

    Ok(report)
}

/// The *analyze* wrapper: short-circuits to `NO_GAPS` whenever a
/// human-approval gate is pending, putting the system to sleep until
/// `approve` clears it.
pub async fn run_analyze_wrapper(
    registry: &StageRegistry,
    health: &mut HealthMonitor,
    gate: &GateState,
    inputs: &AnalyzeInputs<'_>,
) -> Result<GapReport> {
    if gate.is_gate_pending() {
        return Ok(GapReport {
            gaps: Vec::new(),
            most_critical: None,
            summary: NO_GAPS.to_string(),
        });
    }
    dispatch_analyze(registry, health, inputs).await
}

/// Baseline-equivalence smoke tests for the fallback wrapper. Exercises
/// the "a dispatched stage that raises produces the baseline's output"
/// testable property.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ProjectState;

    struct AlwaysFailsScan;

    #[async_trait]
    impl ScanStage for AlwaysFailsScan {
        async fn call(&self, _inputs: &ScanInputs<'_>) -> Result<ProjectState> {
            Err(AnimaError::Other("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn missing_implementation_falls_back_and_records_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut health = HealthMonitor::load(dir.path().join("health.json"));
        let registry = StageRegistry::new();
        let inputs = ScanInputs {
            project_root: dir.path(),
            state_dir_name: ".anima",
            history_dir_name: "iterations",
            protected_paths: &[],
            linter: None,
            test_runner: None,
        };
        let result = dispatch_scan(&registry, &mut health, &inputs).await;
        assert!(result.is_ok());
        let stats = health.read_stats();
        assert_eq!(stats.module_stats[SCAN].fallbacks, 1);
        assert_eq!(stats.module_stats[SCAN].calls, 0);
    }

    #[tokio::test]
    async fn raising_implementation_falls_back_to_baseline_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut health = HealthMonitor::load(dir.path().join("health.json"));
        let registry = StageRegistry::new().with_scan(Arc::new(AlwaysFailsScan));
        let inputs = ScanInputs {
            project_root: dir.path(),
            state_dir_name: ".anima",
            history_dir_name: "iterations",
            protected_paths: &[],
            linter: None,
            test_runner: None,
        };
        let via_fallback = dispatch_scan(&registry, &mut health, &inputs).await.expect("fallback");
        let baseline = stages::scan(&inputs).await.expect("baseline");
        assert_eq!(via_fallback, baseline);

        let stats = health.read_stats();
        assert_eq!(stats.module_stats[SCAN].fallbacks, 1);
    }

    #[tokio::test]
    async fn successful_dispatch_never_increments_both_counters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut health = HealthMonitor::load(dir.path().join("health.json"));
        let registry = StageRegistry::new();
        let inputs = PlanInputs {
            state: &ProjectState::default(),
            gaps: &GapReport::default(),
            history: &[],
            iteration_number: 1,
            target_version: "v0.1",
            protected_paths: &[],
        };
        dispatch_plan(&registry, &mut health, &inputs).await.expect("plan");
        let stats = health.read_stats();
        let tally = &stats.module_stats[PLAN];
        assert!(tally.calls == 0 || tally.fallbacks == 0);
        assert_eq!(tally.calls + tally.fallbacks, 1);
    }

    #[tokio::test]
    async fn gated_execute_never_invokes_the_agent() {
        use crate::domain::models::{ActionType, IterationPlan, PlannedAction, RiskLevel};
        use crate::domain::ports::test_doubles::StubAgent;

        let dir = tempfile::tempdir().expect("tempdir");
        let mut health = HealthMonitor::load(dir.path().join("health.json"));
        let registry = StageRegistry::new();
        let gate = GateState::new(dir.path());
        let quota_policy = QuotaPolicy::new(60, 3600, 7200);
        let agent = StubAgent(ExecutionResult {
            success: false,
            output: String::new(),
            errors: "should never run".to_string(),
            exit_code: 1,
            elapsed_seconds: 0.0,
            cost_usd: 0.0,
            total_tokens: 0,
            dry_run: false,
            files_changed: vec![],
            quota_state: None,
        });
        let plan = IterationPlan {
            iteration_id: "iter-0001-20260101-000000".to_string(),
            iteration_number: 1,
            target_version: "v0.1".to_string(),
            gaps_summary: "gaps".to_string(),
            prompt: "please update domain/models.rs".to_string(),
            gap: None,
            actions: vec![PlannedAction {
                description: "d".to_string(),
                target_files: vec![],
                action_type: ActionType::Modify,
            }],
            acceptance_criteria: vec![],
            estimated_risk: RiskLevel::Low,
        };
        let exec_inputs = ExecuteInputs {
            plan: &plan,
            agent: &agent,
            protected_paths: &[],
            dry_run: false,
            debug_dir: dir.path(),
        };
        let result = run_execute_wrapper(&registry, &mut health, &gate, &quota_policy, &exec_inputs)
            .await
            .expect("wrapper");
        assert_eq!(result.output, "GATED: awaiting human approval");
        assert!(gate.is_gate_pending());
    }

    #[tokio::test]
    async fn analyze_wrapper_short_circuits_when_gate_pending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut health = HealthMonitor::load(dir.path().join("health.json"));
        let registry = StageRegistry::new();
        let gate = GateState::new(dir.path());
        gate.write_gate("summary", &["modifies domain types".to_string()]).expect("write");

        let vision = crate::domain::models::Vision::default();
        let state = ProjectState::default();
        let health_report = crate::domain::models::HealthReport::default();
        let inputs = AnalyzeInputs {
            vision: &vision,
            state: &state,
            history: &[],
            health: &health_report,
            history_window_for_stuck: 3,
        };
        let report = run_analyze_wrapper(&registry, &mut health, &gate, &inputs).await.expect("analyze");
        assert_eq!(report.summary, NO_GAPS);
    }

    #[tokio::test]
    async fn verify_wrapper_adds_execution_issue_when_baseline_replacement_omits_it() {
        struct NaiveVerify;
        #[async_trait]
        impl VerifyStage for NaiveVerify {
            async fn call(&self, _inputs: &VerifyInputs<'_>) -> Result<VerificationReport> {
                Ok(VerificationReport {
                    stages: vec![],
                    all_passed: true,
                    issues: vec![],
                    improvements: vec![],
                    summary: "All 0 verification stages passed.".to_string(),
                })
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let mut health = HealthMonitor::load(dir.path().join("health.json"));
        let registry = StageRegistry::new().with_verify(Arc::new(NaiveVerify));
        let pre = ProjectState::default();
        let post = ProjectState::default();
        let exec = ExecutionResult {
            success: false,
            output: String::new(),
            errors: "agent crashed".to_string(),
            exit_code: 1,
            elapsed_seconds: 1.0,
            cost_usd: 0.0,
            total_tokens: 0,
            dry_run: false,
            files_changed: vec![],
            quota_state: None,
        };
        let inputs = VerifyInputs {
            pre: &pre,
            post: &post,
            last_execution: Some(&exec),
        };
        let report = run_verify_wrapper(&registry, &mut health, &inputs).await.expect("verify");
        assert!(!report.all_passed);
        assert!(report.issues.iter().any(|i| i.starts_with("EXECUTION:")));
    }
}
