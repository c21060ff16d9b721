//! Baseline *analyze* — turns a scan snapshot, the vision/roadmap, and
//! iteration history into a gap report.
//!
//! Emits one section per gap category, in a fixed order, annotating any
//! item that has repeatedly failed as "stuck" so planning can route around
//! it.

use std::collections::BTreeMap;

use crate::domain::models::{tail, Gap, GapCategory, GapReport, IterationOutcome, IterationRecord, Priority, ProjectState, Vision};
use crate::error::Result;
use crate::health::HealthReport;

use super::NO_GAPS;

const QUALITY_OUTPUT_LIMIT: usize = 500;

pub struct AnalyzeInputs<'a> {
    pub vision: &'a Vision,
    pub state: &'a ProjectState,
    pub history: &'a [IterationRecord],
    pub health: &'a HealthReport,
    pub history_window_for_stuck: usize,
}

/// How many of the last `window` history records addressed `description`,
/// and how many of those failed.
fn stuck_stats(description: &str, history: &[IterationRecord], window: usize) -> (usize, usize) {
    let recent = history.iter().rev().take(window);
    let mut appearances = 0;
    let mut failures = 0;
    for record in recent {
        if record.gaps_addressed == description {
            appearances += 1;
            if record.outcome != IterationOutcome::Success {
                failures += 1;
            }
        }
    }
    (appearances, failures)
}

fn stuck_annotation(description: &str, history: &[IterationRecord], window: usize) -> Option<&'static str> {
    let (appearances, failures) = stuck_stats(description, history, window);
    if appearances < 2 {
        return None;
    }
    if failures >= 2 {
        Some("[STUCK — skip]")
    } else {
        Some("[STUCK — try different approach]")
    }
}

/// First version's uncompleted checklist items, in document order, where
/// "first version" is the first `version_label` group (by order of first
/// appearance) that still has at least one incomplete item.
pub(crate) fn current_version_items(vision: &Vision) -> (Option<String>, Vec<&crate::domain::models::RoadmapItem>) {
    let mut order: Vec<String> = Vec::new();
    for item in &vision.items {
        if !order.contains(&item.version_label) {
            order.push(item.version_label.clone());
        }
    }
    for version in order {
        let items: Vec<_> = vision
            .items
            .iter()
            .filter(|i| i.version_label == version && !i.completed)
            .collect();
        if !items.is_empty() {
            return (Some(version), items);
        }
    }
    (None, Vec::new())
}

fn emit_roadmap_section(
    vision: &Vision,
    history: &[IterationRecord],
    window: usize,
) -> (Vec<String>, Vec<Gap>) {
    let mut lines = Vec::new();
    let mut gaps = Vec::new();
    let (version, items) = current_version_items(vision);
    let Some(version) = version else {
        return (lines, gaps);
    };
    lines.push(format!("UNCOMPLETED ROADMAP ITEMS ({version}):"));
    for item in items {
        let annotation = stuck_annotation(&item.description, history, window);
        match annotation {
            Some(a) => lines.push(format!("- {} {}", item.description, a)),
            None => lines.push(format!("- {}", item.description)),
        }
        gaps.push(Gap {
            category: GapCategory::Roadmap,
            description: item.description.clone(),
            priority: Priority::High,
            roadmap_version: version.clone(),
            evidence: format!("unchecked item in {version}"),
        });
    }
    (lines, gaps)
}

fn emit_infrastructure_section(vision: &Vision, state: &ProjectState) -> (Vec<String>, Vec<Gap>) {
    let mut lines = Vec::new();
    let mut gaps = Vec::new();
    let (version, _items) = current_version_items(vision);
    let Some(version) = version else {
        return (lines, gaps);
    };
    let roadmap_text = vision
        .roadmap_texts
        .iter()
        .find(|(label, _)| *label == version)
        .map(|(_, text)| text.to_lowercase())
        .unwrap_or_default();
    let mentions = |needle: &str| roadmap_text.contains(needle);

    let mut missing = Vec::new();
    if mentions("domain") && !state.domain_exists {
        missing.push("domain layer");
    }
    if mentions("pyproject") && !state.has_pyproject {
        missing.push("project-config file (pyproject.toml)");
    }
    if mentions("pyright") && !state.has_pyrightconfig {
        missing.push("type-checker config file (pyrightconfig.json)");
    }

    if !missing.is_empty() {
        lines.push("MISSING INFRASTRUCTURE:".to_string());
        for item in &missing {
            lines.push(format!("- {item}"));
            gaps.push(Gap {
                category: GapCategory::Infrastructure,
                description: format!("missing {item}"),
                priority: Priority::High,
                roadmap_version: version.clone(),
                evidence: "mentioned in roadmap, absent from scan".to_string(),
            });
        }
    }
    (lines, gaps)
}

fn emit_quality_section(state: &ProjectState) -> (Vec<String>, Vec<Gap>) {
    let mut lines = Vec::new();
    let mut gaps = Vec::new();
    let Some(quality) = &state.quality else {
        return (lines, gaps);
    };
    let mut failures: Vec<(&str, &str)> = Vec::new();
    if let Some(lint) = &quality.lint {
        if !lint.passed {
            failures.push(("lint", &lint.output));
        }
    }
    if let Some(typecheck) = &quality.typecheck {
        if !typecheck.passed {
            failures.push(("typecheck", &typecheck.output));
        }
    }
    if failures.is_empty() {
        return (lines, gaps);
    }
    lines.push("QUALITY FAILURES:".to_string());
    for (tool, output) in failures {
        lines.push(format!("- {tool}: {}", tail(output, QUALITY_OUTPUT_LIMIT)));
        gaps.push(Gap {
            category: GapCategory::Quality,
            description: format!("{tool} is failing"),
            priority: Priority::Urgent,
            roadmap_version: String::new(),
            evidence: tail(output, QUALITY_OUTPUT_LIMIT),
        });
    }
    (lines, gaps)
}

fn emit_tests_section(state: &ProjectState) -> (Vec<String>, Vec<Gap>) {
    let mut lines = Vec::new();
    let mut gaps = Vec::new();
    let Some(tests) = &state.tests else {
        return (lines, gaps);
    };
    if tests.passed {
        return (lines, gaps);
    }
    lines.push("FAILING TESTS:".to_string());
    lines.push(tail(&tests.stdout_tail, QUALITY_OUTPUT_LIMIT));
    if !tests.stderr_tail.is_empty() {
        lines.push(tail(&tests.stderr_tail, QUALITY_OUTPUT_LIMIT));
    }
    gaps.push(Gap {
        category: GapCategory::Tests,
        description: "test suite is failing".to_string(),
        priority: Priority::Urgent,
        roadmap_version: String::new(),
        evidence: tail(&tests.stdout_tail, QUALITY_OUTPUT_LIMIT),
    });
    (lines, gaps)
}

fn emit_inbox_section(state: &ProjectState) -> (Vec<String>, Vec<Gap>) {
    let mut lines = Vec::new();
    let mut gaps = Vec::new();
    if state.inbox.is_empty() {
        return (lines, gaps);
    }
    lines.push("HUMAN REQUESTS:".to_string());
    for item in &state.inbox {
        lines.push(format!("- {}: {}", item.filename, item.content));
        gaps.push(Gap {
            category: GapCategory::Inbox,
            description: format!("human request: {}", item.filename),
            priority: Priority::Urgent,
            roadmap_version: String::new(),
            evidence: item.content.clone(),
        });
    }
    (lines, gaps)
}

fn emit_health_section(health: &HealthReport) -> (Vec<String>, Vec<Gap>) {
    let mut lines = Vec::new();
    let mut gaps = Vec::new();
    let mut degraded: Vec<_> = health
        .modules
        .iter()
        .filter(|m| m.status != crate::domain::models::HealthStatus::Healthy)
        .collect();
    if degraded.is_empty() {
        return (lines, gaps);
    }
    degraded.sort_by(|a, b| a.module.cmp(&b.module));
    lines.push("AUTO-REWRITE TRIGGER:".to_string());
    for module in degraded {
        let issue = module.leading_issue.as_deref().unwrap_or("no leading issue recorded");
        lines.push(format!(
            "- {} is {} (score {:.2}): {}",
            module.module, module.status, module.composite, issue
        ));
        gaps.push(Gap {
            category: GapCategory::Rewrite,
            description: format!("rewrite module {} ({})", module.module, module.status),
            priority: Priority::Medium,
            roadmap_version: String::new(),
            evidence: issue.to_string(),
        });
    }
    (lines, gaps)
}

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::Urgent => 0,
        Priority::High => 1,
        Priority::Medium => 2,
        Priority::Low => 3,
    }
}

pub async fn analyze(inputs: &AnalyzeInputs<'_>) -> Result<GapReport> {
    let mut lines = Vec::new();
    let mut gaps = Vec::new();

    let sections: Vec<(Vec<String>, Vec<Gap>)> = vec![
        emit_roadmap_section(inputs.vision, inputs.history, inputs.history_window_for_stuck),
        emit_infrastructure_section(inputs.vision, inputs.state),
        emit_quality_section(inputs.state),
        emit_tests_section(inputs.state),
        emit_inbox_section(inputs.state),
        emit_health_section(inputs.health),
    ];

    for (section_lines, section_gaps) in sections {
        if !section_lines.is_empty() {
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.extend(section_lines);
        }
        gaps.extend(section_gaps);
    }

    if gaps.is_empty() {
        return Ok(GapReport {
            gaps: Vec::new(),
            most_critical: None,
            summary: NO_GAPS.to_string(),
        });
    }

    let most_critical = gaps
        .iter()
        .min_by_key(|g| priority_rank(g.priority))
        .cloned();

    Ok(GapReport {
        gaps,
        most_critical,
        summary: lines.join("\n"),
    })
}

/// Count of the most recent history entries (scanning at most the first
/// five, most-recent-first, stopping at the first non-matching record)
/// that failed while addressing `description`. Used by *plan*'s
/// stuck-gap escalation (4.7.3), not by *analyze* itself.
pub fn consecutive_failures(description: &str, history: &[IterationRecord]) -> usize {
    let mut count = 0;
    for record in history.iter().rev().take(5) {
        if record.gaps_addressed == description && record.outcome != IterationOutcome::Success {
            count += 1;
        } else {
            break;
        }
    }
    count
}

/// Per-version-label grouping is shared with `plan`'s prompt rendering;
/// exposed so it isn't recomputed with a subtly different implementation.
pub fn group_by_version(vision: &Vision) -> BTreeMap<String, Vec<&crate::domain::models::RoadmapItem>> {
    let mut grouped: BTreeMap<String, Vec<&crate::domain::models::RoadmapItem>> = BTreeMap::new();
    for item in &vision.items {
        grouped.entry(item.version_label.clone()).or_default().push(item);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RoadmapItem;

    fn vision_with_items(items: Vec<RoadmapItem>) -> Vision {
        Vision {
            identity: "test".to_string(),
            principles: vec![],
            items,
            roadmap_texts: vec![],
        }
    }

    #[tokio::test]
    async fn empty_project_with_no_gaps_returns_no_gaps() {
        let vision = vision_with_items(vec![]);
        let state = ProjectState::default();
        let health = HealthReport::default();
        let inputs = AnalyzeInputs {
            vision: &vision,
            state: &state,
            history: &[],
            health: &health,
            history_window_for_stuck: 3,
        };
        let report = analyze(&inputs).await.expect("analyze");
        assert_eq!(report.summary, NO_GAPS);
        assert!(report.gaps.is_empty());
    }

    #[tokio::test]
    async fn uncompleted_roadmap_item_becomes_a_gap() {
        let vision = vision_with_items(vec![RoadmapItem {
            version_label: "v0.1".to_string(),
            description: "add CLI entrypoint".to_string(),
            completed: false,
        }]);
        let state = ProjectState::default();
        let health = HealthReport::default();
        let inputs = AnalyzeInputs {
            vision: &vision,
            state: &state,
            history: &[],
            health: &health,
            history_window_for_stuck: 3,
        };
        let report = analyze(&inputs).await.expect("analyze");
        assert_ne!(report.summary, NO_GAPS);
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].category, GapCategory::Roadmap);
        assert!(report.summary.contains("add CLI entrypoint"));
    }

    #[tokio::test]
    async fn repeated_failing_gap_is_annotated_stuck_skip() {
        let description = "add CLI entrypoint".to_string();
        let vision = vision_with_items(vec![RoadmapItem {
            version_label: "v0.1".to_string(),
            description: description.clone(),
            completed: false,
        }]);
        let state = ProjectState::default();
        let health = HealthReport::default();
        let history = vec![failed_record(&description), failed_record(&description)];
        let inputs = AnalyzeInputs {
            vision: &vision,
            state: &state,
            history: &history,
            health: &health,
            history_window_for_stuck: 3,
        };
        let report = analyze(&inputs).await.expect("analyze");
        assert!(report.summary.contains("[STUCK — skip]"));
    }

    #[test]
    fn infrastructure_section_scans_full_roadmap_text_not_just_unchecked_items() {
        let vision = Vision {
            identity: "test".to_string(),
            principles: vec![],
            items: vec![RoadmapItem {
                version_label: "v0.1".to_string(),
                description: "wire up the CLI".to_string(),
                completed: false,
            }],
            roadmap_texts: vec![(
                "v0.1".to_string(),
                "## v0.1\n\nBuild out the domain layer first.\n\n- [x] add pyproject.toml\n- [ ] wire up the CLI\n".to_string(),
            )],
        };
        let mut state = ProjectState::default();
        state.domain_exists = false;
        state.has_pyproject = false;
        let (lines, gaps) = emit_infrastructure_section(&vision, &state);
        assert!(lines.iter().any(|l| l.contains("domain layer")));
        assert!(gaps.iter().any(|g| g.description.contains("domain layer")));
        assert!(lines.iter().any(|l| l.contains("pyproject.toml")));
    }

    fn failed_record(description: &str) -> IterationRecord {
        use crate::domain::models::{ExecutionResult, StageResult, StageStatus, VerificationReport};
        IterationRecord {
            iteration_id: "iter-0001-20260101-000000".to_string(),
            timestamp: chrono::Utc::now(),
            gaps_addressed: description.to_string(),
            plan_summary: String::new(),
            execution: ExecutionResult {
                success: false,
                output: String::new(),
                errors: String::new(),
                exit_code: 1,
                elapsed_seconds: 1.0,
                cost_usd: 0.0,
                total_tokens: 0,
                dry_run: false,
                files_changed: vec![],
                quota_state: None,
            },
            verification: VerificationReport {
                stages: vec![StageResult {
                    stage: "tests".to_string(),
                    status: StageStatus::Failed,
                    output: String::new(),
                }],
                all_passed: false,
                issues: vec!["QUALITY: tests failing".to_string()],
                improvements: vec![],
                summary: "1 verification stage failed.".to_string(),
            },
            outcome: IterationOutcome::Failure,
            duration_seconds: 1.0,
            notes: String::new(),
        }
    }
}
