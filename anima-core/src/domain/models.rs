//! Value types shared by every pipeline stage.
//!
//! All entities here are immutable value records: a stage builds one, hands
//! it to the next stage or to the history store, and never mutates it in
//! place.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scan snapshot of the project tree, produced by the `scan` stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub files: Vec<String>,
    pub modules: Vec<ModuleInfo>,
    pub domain_exists: bool,
    pub adapters_exist: bool,
    pub kernel_exists: bool,
    pub has_tests: bool,
    pub has_pyproject: bool,
    pub has_pyrightconfig: bool,
    pub inbox: Vec<InboxItem>,
    pub quality: Option<QualityReport>,
    pub tests: Option<TestResult>,
    /// `(path, content hash)` for every file under a protected path. `hash`
    /// is `None` only transiently; on disk a missing entry means the file
    /// did not exist at scan time.
    pub protected_hashes: Vec<(String, Option<String>)>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub has_contract: bool,
    pub has_spec: bool,
    pub has_core: bool,
    pub has_tests: bool,
    pub files: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboxItem {
    pub filename: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckResult {
    pub passed: bool,
    pub output: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub lint: Option<QualityCheckResult>,
    pub format: Option<QualityCheckResult>,
    pub typecheck: Option<QualityCheckResult>,
}

impl QualityReport {
    pub fn is_empty(&self) -> bool {
        self.lint.is_none() && self.format.is_none() && self.typecheck.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub exit_code: i32,
    pub passed: bool,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// A single `(version_label, description, completed)` checklist entry
/// parsed out of a roadmap document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadmapItem {
    pub version_label: String,
    pub description: String,
    pub completed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vision {
    pub identity: String,
    pub principles: Vec<String>,
    pub items: Vec<RoadmapItem>,
    /// Raw `(version_label, document text)` pairs, one per `roadmap/v*.md`
    /// file, kept alongside the parsed checklist items so a gap-analysis
    /// pass can scan prose and headers, not just unchecked lines.
    pub roadmap_texts: Vec<(String, String)>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapCategory {
    Roadmap,
    Infrastructure,
    Quality,
    Tests,
    Inbox,
    Rewrite,
}

impl GapCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Roadmap => "roadmap",
            Self::Infrastructure => "infrastructure",
            Self::Quality => "quality",
            Self::Tests => "tests",
            Self::Inbox => "inbox",
            Self::Rewrite => "rewrite",
        }
    }
}

impl std::fmt::Display for GapCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub category: GapCategory,
    pub description: String,
    pub priority: Priority,
    pub roadmap_version: String,
    pub evidence: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
    pub gaps: Vec<Gap>,
    pub most_critical: Option<Gap>,
    pub summary: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Modify,
    Delete,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub description: String,
    pub target_files: Vec<String>,
    pub action_type: ActionType,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prompt text plus the structured planning artefacts the driver needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationPlan {
    pub iteration_id: String,
    pub iteration_number: u64,
    pub target_version: String,
    /// Gaps summary, bounded to 200 characters and ellipsised for the
    /// short-form prompt banner; the full text lives in `prompt`.
    pub gaps_summary: String,
    pub prompt: String,
    pub gap: Option<Gap>,
    pub actions: Vec<PlannedAction>,
    pub acceptance_criteria: Vec<String>,
    pub estimated_risk: RiskLevel,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaStatus {
    Ok,
    RateLimited,
    QuotaExhausted,
}

impl QuotaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
        }
    }
}

impl std::fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    pub status: QuotaStatus,
    pub retry_after_seconds: Option<u64>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: ActionType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub errors: String,
    pub exit_code: i32,
    pub elapsed_seconds: f64,
    pub cost_usd: f64,
    pub total_tokens: u64,
    pub dry_run: bool,
    pub files_changed: Vec<FileChange>,
    pub quota_state: Option<QuotaState>,
}

impl ExecutionResult {
    pub const OUTPUT_LIMIT: usize = 5000;
    pub const ERRORS_LIMIT: usize = 2000;

    /// Truncates `output`/`errors` to their configured bounds, keeping the tail
    /// (the most recent output is the most diagnostic).
    pub fn tail_truncated(mut self) -> Self {
        self.output = tail(&self.output, Self::OUTPUT_LIMIT);
        self.errors = tail(&self.errors, Self::ERRORS_LIMIT);
        self
    }
}

pub(crate) fn tail(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let skip = s.chars().count() - limit;
    s.chars().skip(skip).collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub gated: bool,
    pub risk_level: RiskLevel,
    pub indicators: Vec<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub status: StageStatus,
    pub output: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub stages: Vec<StageResult>,
    pub all_passed: bool,
    pub issues: Vec<String>,
    pub improvements: Vec<String>,
    pub summary: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Success,
    Partial,
    Failure,
    Rollback,
}

impl IterationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
            Self::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration_id: String,
    pub timestamp: DateTime<Utc>,
    pub gaps_addressed: String,
    pub plan_summary: String,
    pub execution: ExecutionResult,
    pub verification: VerificationReport,
    pub outcome: IterationOutcome,
    pub duration_seconds: f64,
    pub notes: String,
}

impl IterationRecord {
    pub const GAPS_LIMIT: usize = 1000;
    pub const EXCERPT_LIMIT: usize = 1000;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimaStatus {
    Alive,
    Sleep,
    Paused,
}

impl AnimaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Sleep => "sleep",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for AnimaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnimaState {
    pub iteration_count: u64,
    pub consecutive_failures: u32,
    pub last_iteration_id: Option<String>,
    pub status: AnimaStatus,
    pub completed_items: Vec<String>,
    pub current_milestone: String,
    pub cumulative_cost_usd: f64,
    pub cumulative_tokens: u64,
    pub cumulative_seconds: f64,
}

impl Default for AnimaState {
    fn default() -> Self {
        Self {
            iteration_count: 0,
            consecutive_failures: 0,
            last_iteration_id: None,
            status: AnimaStatus::Alive,
            completed_items: Vec::new(),
            current_milestone: String::new(),
            cumulative_cost_usd: 0.0,
            cumulative_tokens: 0,
            cumulative_seconds: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StepTally {
    pub calls: u64,
    pub fallbacks: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub step: String,
    pub error_kind: String,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStats {
    pub module_stats: std::collections::BTreeMap<String, StepTally>,
    pub fallback_events: std::collections::VecDeque<FallbackEvent>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleHealthScore {
    pub module: String,
    pub structural_score: f64,
    pub reliability_score: f64,
    pub composite: f64,
    pub status: HealthStatus,
    pub leading_issue: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub modules: Vec<ModuleHealthScore>,
}

/// Normalizes a path into the forward-slash relative form used throughout
/// `ProjectState` and `FileChange`, regardless of host path separator.
pub fn relpath(p: impl Into<PathBuf>) -> String {
    p.into().to_string_lossy().replace('\\', "/")
}
