//! Baseline *record* — builds an `IterationRecord` from the iteration's
//! execution and verification results and persists it via the History
//! Store.

use chrono::Utc;

use crate::domain::models::{tail, ExecutionResult, IterationOutcome, IterationRecord, VerificationReport};
use crate::error::Result;
use crate::history::HistoryStore;

pub struct RecordInputs<'a> {
    pub iteration_id: &'a str,
    pub gaps_addressed: &'a str,
    pub plan_summary: &'a str,
    pub execution: &'a ExecutionResult,
    pub verification: &'a VerificationReport,
    pub duration_seconds: f64,
    pub history: &'a HistoryStore,
}

/// The compact summary the driver consumes after a record is written.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSummary {
    pub iteration_id: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub success: bool,
    pub summary: String,
    pub improvements: Vec<String>,
    pub issues: Vec<String>,
    pub cost_usd: f64,
    pub total_tokens: u64,
    pub elapsed_seconds: f64,
    pub file_path: std::path::PathBuf,
}

pub async fn record(inputs: &RecordInputs<'_>) -> Result<RecordSummary> {
    let timestamp = Utc::now();
    let outcome = if inputs.verification.all_passed {
        IterationOutcome::Success
    } else {
        IterationOutcome::Failure
    };

    let record = IterationRecord {
        iteration_id: inputs.iteration_id.to_string(),
        timestamp,
        gaps_addressed: tail(inputs.gaps_addressed, IterationRecord::GAPS_LIMIT),
        plan_summary: inputs.plan_summary.to_string(),
        execution: inputs.execution.clone(),
        verification: inputs.verification.clone(),
        outcome,
        duration_seconds: inputs.duration_seconds,
        notes: tail(&inputs.execution.output, IterationRecord::EXCERPT_LIMIT),
    };

    let file_path = inputs.history.save(&record)?;

    Ok(RecordSummary {
        iteration_id: record.iteration_id,
        timestamp: record.timestamp,
        success: outcome == IterationOutcome::Success,
        summary: inputs.verification.summary.clone(),
        improvements: inputs.verification.improvements.clone(),
        issues: inputs.verification.issues.clone(),
        cost_usd: inputs.execution.cost_usd,
        total_tokens: inputs.execution.total_tokens,
        elapsed_seconds: inputs.duration_seconds,
        file_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FileChange, ActionType};

    fn passing_execution() -> ExecutionResult {
        ExecutionResult {
            success: true,
            output: "did the thing".to_string(),
            errors: String::new(),
            exit_code: 0,
            elapsed_seconds: 2.0,
            cost_usd: 0.05,
            total_tokens: 500,
            dry_run: false,
            files_changed: vec![FileChange {
                path: "b.py".to_string(),
                action: ActionType::Create,
            }],
            quota_state: None,
        }
    }

    fn passing_verification() -> VerificationReport {
        VerificationReport {
            stages: vec![],
            all_passed: true,
            issues: vec![],
            improvements: vec!["New files: 1".to_string()],
            summary: "All 4 verification stages passed.".to_string(),
        }
    }

    #[tokio::test]
    async fn passing_verification_yields_success_outcome() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = HistoryStore::new(dir.path());
        let execution = passing_execution();
        let verification = passing_verification();
        let inputs = RecordInputs {
            iteration_id: "iter-0001-20260101-000000",
            gaps_addressed: "add CLI entrypoint",
            plan_summary: "add CLI entrypoint",
            execution: &execution,
            verification: &verification,
            duration_seconds: 3.5,
            history: &history,
        };
        let summary = record(&inputs).await.expect("record");
        assert!(summary.success);
        assert_eq!(summary.improvements, vec!["New files: 1".to_string()]);
        assert!(summary.file_path.exists());
    }

    #[tokio::test]
    async fn failing_verification_yields_failure_outcome() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = HistoryStore::new(dir.path());
        let execution = passing_execution();
        let mut verification = passing_verification();
        verification.all_passed = false;
        verification.issues = vec!["QUALITY: tests failing".to_string()];
        let inputs = RecordInputs {
            iteration_id: "iter-0002-20260101-000000",
            gaps_addressed: "fix failing tests",
            plan_summary: "fix failing tests",
            execution: &execution,
            verification: &verification,
            duration_seconds: 1.0,
            history: &history,
        };
        let summary = record(&inputs).await.expect("record");
        assert!(!summary.success);
    }

    #[tokio::test]
    async fn gaps_addressed_is_truncated_to_the_configured_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = HistoryStore::new(dir.path());
        let execution = passing_execution();
        let verification = passing_verification();
        let long_gap = "x".repeat(IterationRecord::GAPS_LIMIT + 500);
        let inputs = RecordInputs {
            iteration_id: "iter-0003-20260101-000000",
            gaps_addressed: &long_gap,
            plan_summary: "plan",
            execution: &execution,
            verification: &verification,
            duration_seconds: 1.0,
            history: &history,
        };
        record(&inputs).await.expect("record");
        let persisted = history.load_recent(1);
        assert_eq!(persisted[0].gaps_addressed.chars().count(), IterationRecord::GAPS_LIMIT);
    }

    #[tokio::test]
    async fn saving_the_same_iteration_id_twice_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = HistoryStore::new(dir.path());
        let execution = passing_execution();
        let verification = passing_verification();
        let inputs = RecordInputs {
            iteration_id: "iter-0004-20260101-000000",
            gaps_addressed: "gap",
            plan_summary: "plan",
            execution: &execution,
            verification: &verification,
            duration_seconds: 1.0,
            history: &history,
        };
        record(&inputs).await.expect("first record");
        let second = record(&inputs).await;
        assert!(second.is_err());
    }
}
