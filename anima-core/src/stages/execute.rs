//! Baseline *execute* — dispatches a planned prompt to the agent.
//!
//! Handles the dry-run branch and protected-path enforcement; retries on
//! quota signals are handled by the outer dispatch wrapper (`crate::quota`),
//! not here.

use crate::domain::models::{ActionType, ExecutionResult, IterationPlan};
use crate::domain::ports::AgentPort;
use crate::error::Result;

const DEBUG_PROMPT_PATH: &str = "last_prompt.txt";

pub struct ExecuteInputs<'a> {
    pub plan: &'a IterationPlan,
    pub agent: &'a dyn AgentPort,
    pub protected_paths: &'a [String],
    pub dry_run: bool,
    pub debug_dir: &'a std::path::Path,
}

fn is_protected(path: &str, protected_paths: &[String]) -> bool {
    protected_paths.iter().any(|p| {
        let trimmed = p.trim_end_matches('/');
        path == trimmed || path.starts_with(&format!("{trimmed}/"))
    })
}

fn persist_prompt(debug_dir: &std::path::Path, prompt: &str) {
    if std::fs::create_dir_all(debug_dir).is_ok() {
        let _ = std::fs::write(debug_dir.join(DEBUG_PROMPT_PATH), prompt);
    }
}

fn dry_run_result(prompt: &str) -> ExecutionResult {
    ExecutionResult {
        success: true,
        output: format!("DRY RUN — prompt persisted, agent not invoked:\n{prompt}"),
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

fn protected_violation_result(path: &str) -> ExecutionResult {
    ExecutionResult {
        success: false,
        output: String::new(),
        errors: format!("refusing to execute: planned action targets protected path {path}"),
        exit_code: 1,
        elapsed_seconds: 0.0,
        cost_usd: 0.0,
        total_tokens: 0,
        dry_run: false,
        files_changed: vec![],
        quota_state: None,
    }
}

pub async fn execute(inputs: &ExecuteInputs<'_>) -> Result<ExecutionResult> {
    persist_prompt(inputs.debug_dir, &inputs.plan.prompt);

    if inputs.dry_run {
        return Ok(dry_run_result(&inputs.plan.prompt));
    }

    for action in &inputs.plan.actions {
        if matches!(action.action_type, ActionType::Delete | ActionType::Modify | ActionType::Create) {
            if let Some(path) = action.target_files.iter().find(|f| is_protected(f, inputs.protected_paths)) {
                return Ok(protected_violation_result(path));
            }
        }
    }

    let result = inputs.agent.execute(&inputs.plan.prompt).await;

    if let Some(path) = result
        .files_changed
        .iter()
        .find(|c| is_protected(&c.path, inputs.protected_paths))
    {
        return Ok(protected_violation_result(&path.path));
    }

    Ok(result.tail_truncated())
}
