//! Baseline *plan* — turns a gap report into a prompt and a structured
//! `IterationPlan`.
//!
//! Escalates to a different gap (or a high-risk warning action) once the
//! current one has failed too many times consecutively.

use chrono::Utc;

use crate::domain::models::{
    ActionType, Gap, GapReport, IterationOutcome, IterationPlan, IterationRecord, PlannedAction,
    ProjectState, RiskLevel,
};
use crate::error::Result;

use super::analyze::consecutive_failures;

const GAPS_SUMMARY_LIMIT: usize = 200;
const STUCK_FAILURE_THRESHOLD: usize = 3;
const RECENT_ITERATIONS_SHOWN: usize = 3;

pub struct PlanInputs<'a> {
    pub state: &'a ProjectState,
    pub gaps: &'a GapReport,
    pub history: &'a [IterationRecord],
    pub iteration_number: u64,
    pub target_version: &'a str,
    pub protected_paths: &'a [String],
}

fn ellipsised(summary: &str, limit: usize) -> String {
    if summary.chars().count() <= limit {
        return summary.to_string();
    }
    let truncated: String = summary.chars().take(limit.saturating_sub(1)).collect();
    format!("{truncated}…")
}

fn state_summary(state: &ProjectState) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Layers present: domain={} adapters={} kernel={}",
        state.domain_exists, state.adapters_exist, state.kernel_exists
    ));
    lines.push(format!("Inbox items: {}", state.inbox.len()));
    if state.modules.is_empty() {
        lines.push("Modules: (none scanned)".to_string());
    } else {
        lines.push("Modules:".to_string());
        for module in &state.modules {
            lines.push(format!(
                "- {}: contract={} spec={} core={} tests={}",
                module.name, module.has_contract, module.has_spec, module.has_core, module.has_tests
            ));
        }
    }
    lines.join("\n")
}

fn recent_iterations_section(history: &[IterationRecord]) -> Option<String> {
    if history.is_empty() {
        return None;
    }
    let mut lines = vec!["RECENT ITERATIONS:".to_string()];
    for record in history.iter().rev().take(RECENT_ITERATIONS_SHOWN) {
        let marker = if record.outcome == IterationOutcome::Success {
            "PASS"
        } else {
            "FAIL"
        };
        lines.push(format!("- [{marker}] {}", record.gaps_addressed));
    }
    Some(lines.join("\n"))
}

fn is_protected(path: &str, protected_paths: &[String]) -> bool {
    protected_paths.iter().any(|p| {
        let trimmed = p.trim_end_matches('/');
        path == trimmed || path.starts_with(&format!("{trimmed}/"))
    })
}

/// Picks the gap to work this iteration, applying stuck-gap escalation
/// (4.7.3): if the most critical gap has failed 3 times consecutively,
/// try to find a fresher one; if none exists, proceed anyway at `high`
/// risk with a warning action.
fn select_gap(gaps: &GapReport, history: &[IterationRecord]) -> (Option<Gap>, RiskLevel, Option<PlannedAction>) {
    let Some(candidate) = &gaps.most_critical else {
        return (None, RiskLevel::Low, None);
    };

    if consecutive_failures(&candidate.description, history) < STUCK_FAILURE_THRESHOLD {
        return (Some(candidate.clone()), RiskLevel::Low, None);
    }

    let alternative = gaps
        .gaps
        .iter()
        .find(|g| g.description != candidate.description && consecutive_failures(&g.description, history) < STUCK_FAILURE_THRESHOLD);

    match alternative {
        Some(alt) => (Some(alt.clone()), RiskLevel::Low, None),
        None => {
            let warning = PlannedAction {
                description: format!(
                    "WARNING: '{}' has failed {} times consecutively; proceeding anyway",
                    candidate.description, STUCK_FAILURE_THRESHOLD
                ),
                target_files: vec![],
                action_type: ActionType::Modify,
            };
            (Some(candidate.clone()), RiskLevel::High, Some(warning))
        }
    }
}

pub async fn plan(inputs: &PlanInputs<'_>) -> Result<IterationPlan> {
    let now = Utc::now();
    let iteration_id = format!(
        "iter-{:04}-{}",
        inputs.iteration_number,
        now.format("%Y%m%d-%H%M%S")
    );

    let (gap, estimated_risk, warning_action) = select_gap(inputs.gaps, inputs.history);

    let mut actions = vec![PlannedAction {
        description: gap
            .as_ref()
            .map(|g| g.description.clone())
            .unwrap_or_else(|| "address the highest-priority gap".to_string()),
        target_files: vec![],
        action_type: ActionType::Modify,
    }];
    actions.retain(|a| !a.target_files.iter().any(|f| is_protected(f, inputs.protected_paths)));
    if let Some(warning) = warning_action {
        actions.push(warning);
    }

    let mut acceptance_criteria = vec![
        "lint passes".to_string(),
        "typecheck passes".to_string(),
        "tests pass".to_string(),
    ];
    if let Some(gap) = &gap {
        acceptance_criteria.push(format!("addresses: {}", gap.description));
    }

    let gaps_summary = ellipsised(&gaps_summary_text(&inputs.gaps.summary), GAPS_SUMMARY_LIMIT);

    let mut prompt = String::new();
    prompt.push_str(&format!(
        "## Iteration #{} — target version {}\n\n",
        inputs.iteration_number, inputs.target_version
    ));
    prompt.push_str("Before making any change, read VISION.md, SOUL.md, and the current roadmap file for this version.\n\n");
    prompt.push_str("STATE:\n");
    prompt.push_str(&state_summary(inputs.state));
    prompt.push_str("\n\n");
    prompt.push_str("GAPS TO ADDRESS:\n");
    prompt.push_str(&inputs.gaps.summary);
    prompt.push_str("\n\n");
    if let Some(recent) = recent_iterations_section(inputs.history) {
        prompt.push_str(&recent);
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "Address the single most important next step above, not multiple unrelated gaps. \
         After making changes, run the full verification suite (lint, typecheck, tests) before finishing.\n",
    );

    Ok(IterationPlan {
        iteration_id,
        iteration_number: inputs.iteration_number,
        target_version: inputs.target_version.to_string(),
        gaps_summary,
        prompt,
        gap,
        actions,
        acceptance_criteria,
        estimated_risk,
    })
}

fn gaps_summary_text(summary: &str) -> String {
    summary.lines().next().unwrap_or(summary).to_string()
}
