//! Baseline *verify* — compares pre and post scans into a
//! `VerificationReport`.
//!
//! Every check runs regardless of whether an earlier one already failed, so
//! a single report always reflects the full picture rather than stopping at
//! the first problem.

use std::collections::BTreeMap;

use crate::domain::models::{ExecutionResult, ProjectState, StageResult, StageStatus, VerificationReport};
use crate::error::Result;

pub struct VerifyInputs<'a> {
    pub pre: &'a ProjectState,
    pub post: &'a ProjectState,
    /// The last execution result recorded by the *execute* wrapper's
    /// process-wide slot, so verify can cross-check even though it never
    /// calls the agent itself.
    pub last_execution: Option<&'a ExecutionResult>,
}

fn protected_integrity(pre: &ProjectState, post: &ProjectState) -> (StageResult, Vec<String>) {
    let pre_map: BTreeMap<&str, Option<&str>> = pre
        .protected_hashes
        .iter()
        .map(|(p, h)| (p.as_str(), h.as_deref()))
        .collect();
    let post_map: BTreeMap<&str, Option<&str>> = post
        .protected_hashes
        .iter()
        .map(|(p, h)| (p.as_str(), h.as_deref()))
        .collect();

    let mut paths: Vec<&str> = pre_map.keys().chain(post_map.keys()).copied().collect();
    paths.sort();
    paths.dedup();

    let mut issues = Vec::new();
    for path in paths {
        let pre_hash = pre_map.get(path).copied().flatten();
        let post_hash = post_map.get(path).copied().flatten();
        match (pre_hash, post_hash) {
            (Some(_), None) => issues.push(format!("CRITICAL: {path} was deleted")),
            (Some(a), Some(b)) if a != b => issues.push(format!("CRITICAL: {path} was modified")),
            (None, Some(_)) => issues.push(format!("CRITICAL: {path} appeared unexpectedly")),
            _ => {}
        }
    }

    let status = if issues.is_empty() {
        StageStatus::Passed
    } else {
        StageStatus::Failed
    };
    let result = StageResult {
        stage: "protected_integrity".to_string(),
        status,
        output: issues.join("\n"),
    };
    (result, issues)
}

fn quality_gates(post: &ProjectState) -> (StageResult, Vec<String>) {
    let mut issues = Vec::new();
    let mut output_lines = Vec::new();
    let mut any_present = false;

    if let Some(quality) = &post.quality {
        if let Some(lint) = &quality.lint {
            any_present = true;
            if !lint.passed {
                issues.push("QUALITY: lint failing".to_string());
                output_lines.push(lint.output.clone());
            }
        }
        if let Some(typecheck) = &quality.typecheck {
            any_present = true;
            if !typecheck.passed {
                issues.push("QUALITY: typecheck failing".to_string());
                output_lines.push(typecheck.output.clone());
            }
        }
        if let Some(format) = &quality.format {
            any_present = true;
            if !format.passed {
                issues.push("QUALITY: format failing".to_string());
                output_lines.push(format.output.clone());
            }
        }
    }

    let status = if !any_present {
        StageStatus::Skipped
    } else if issues.is_empty() {
        StageStatus::Passed
    } else {
        StageStatus::Failed
    };
    let result = StageResult {
        stage: "quality".to_string(),
        status,
        output: output_lines.join("\n"),
    };
    (result, issues)
}

fn test_gate(post: &ProjectState) -> (StageResult, Vec<String>) {
    let Some(tests) = &post.tests else {
        return (
            StageResult {
                stage: "tests".to_string(),
                status: StageStatus::Skipped,
                output: String::new(),
            },
            Vec::new(),
        );
    };
    if tests.passed {
        (
            StageResult {
                stage: "tests".to_string(),
                status: StageStatus::Passed,
                output: tests.stdout_tail.clone(),
            },
            Vec::new(),
        )
    } else {
        (
            StageResult {
                stage: "tests".to_string(),
                status: StageStatus::Failed,
                output: tests.stdout_tail.clone(),
            },
            vec!["QUALITY: tests failing".to_string()],
        )
    }
}

fn execution_gate(last_execution: Option<&ExecutionResult>) -> (StageResult, Vec<String>) {
    let Some(exec) = last_execution else {
        return (
            StageResult {
                stage: "execution".to_string(),
                status: StageStatus::Skipped,
                output: String::new(),
            },
            Vec::new(),
        );
    };
    if exec.success {
        (
            StageResult {
                stage: "execution".to_string(),
                status: StageStatus::Passed,
                output: String::new(),
            },
            Vec::new(),
        )
    } else {
        (
            StageResult {
                stage: "execution".to_string(),
                status: StageStatus::Failed,
                output: exec.errors.clone(),
            },
            vec![format!("EXECUTION: agent execution failed: {}", exec.errors)],
        )
    }
}

fn improvements(pre: &ProjectState, post: &ProjectState) -> Vec<String> {
    let delta = post.files.len() as i64 - pre.files.len() as i64;
    if delta > 0 {
        vec![format!("New files: {delta}")]
    } else {
        Vec::new()
    }
}

pub async fn verify(inputs: &VerifyInputs<'_>) -> Result<VerificationReport> {
    let mut stages = Vec::new();
    let mut issues = Vec::new();

    let (stage, mut stage_issues) = protected_integrity(inputs.pre, inputs.post);
    stages.push(stage);
    issues.append(&mut stage_issues);

    let (stage, mut stage_issues) = quality_gates(inputs.post);
    stages.push(stage);
    issues.append(&mut stage_issues);

    let (stage, mut stage_issues) = test_gate(inputs.post);
    stages.push(stage);
    issues.append(&mut stage_issues);

    let (stage, mut stage_issues) = execution_gate(inputs.last_execution);
    stages.push(stage);
    issues.append(&mut stage_issues);

    let improvements = improvements(inputs.pre, inputs.post);

    let all_passed = issues.is_empty();
    let summary = if all_passed {
        format!("All {} verification stages passed.", stages.len())
    } else {
        let failed: Vec<&str> = stages
            .iter()
            .filter(|s| s.status == StageStatus::Failed)
            .map(|s| s.stage.as_str())
            .collect();
        format!(
            "{} of {} verification stages failed: {}.",
            failed.len(),
            stages.len(),
            failed.join(", ")
        )
    };

    Ok(VerificationReport {
        stages,
        all_passed,
        issues,
        improvements,
        summary,
    })
}
