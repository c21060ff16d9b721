//! Health Monitor — per-step call/fallback tallies, a bounded fallback-event
//! ring, and the `module_health` derivation consumed by `analyze` as an
//! auto-rewrite trigger.
//!
//! The fallback-event ring is a `VecDeque` capped by entry count, evicting
//! the oldest entry once it overflows.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::models::{
    FallbackEvent, HealthStats, HealthStatus, ModuleHealthScore, ModuleInfo, StepTally,
};

pub use crate::domain::models::HealthReport;

/// The fallback-event ring never exceeds this many entries (invariant 7).
pub const FALLBACK_RING_CAPACITY: usize = 100;

const STRUCTURAL_WEIGHT: f64 = 0.6;
const RELIABILITY_WEIGHT: f64 = 0.4;
const HEALTHY_THRESHOLD: f64 = 0.7;
const DEGRADED_THRESHOLD: f64 = 0.4;

/// Maps a module's directory name to the dispatch-table step name its
/// reliability score should be read from. Non-pipeline modules (anything
/// not in this table) are assumed perfectly reliable — there's no runtime
/// tally for them.
fn step_for_module(module_name: &str) -> Option<&'static str> {
    match module_name {
        "scanner" => Some("scan"),
        "gap_analyzer" => Some("analyze"),
        "planner" => Some("plan"),
        "executor" => Some("execute"),
        "verifier" => Some("verify"),
        "reporter" => Some("record"),
        _ => None,
    }
}

/// Persistent tracker for per-step reliability, backed by a JSON file
/// (`.anima/health.json`). Every write swallows I/O errors — monitoring
/// must never fail the core pipeline.
#[derive(Debug)]
pub struct HealthMonitor {
    path: PathBuf,
    stats: HealthStats,
}

impl HealthMonitor {
    /// Loads health stats from `path`, or starts from an empty `HealthStats`
    /// if the file is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stats = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<HealthStats>(&s).ok())
            .unwrap_or_default();
        Self { path, stats }
    }

    fn persist(&self) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, path = ?self.path, "health: failed to create parent directory");
                return;
            }
        }
        match serde_json::to_string_pretty(&self.stats) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!(error = %e, path = ?self.path, "health: failed to persist health stats");
                }
            }
            Err(e) => warn!(error = %e, "health: failed to serialize health stats"),
        }
    }

    /// Records a successful dispatch call for `step`. Increments `calls`,
    /// never `fallbacks` (invariant 6).
    pub fn record_success(&mut self, step: &str) {
        self.stats.module_stats.entry(step.to_string()).or_default().calls += 1;
        self.persist();
    }

    /// Records a fallen-back dispatch call for `step`, pushing a bounded
    /// event onto the ring (invariant 7: oldest evicted past 100 entries).
    pub fn record_fallback(&mut self, step: &str, error_kind: &str, error_message: &str) {
        self.stats
            .module_stats
            .entry(step.to_string())
            .or_default()
            .fallbacks += 1;

        self.stats.fallback_events.push_back(FallbackEvent {
            step: step.to_string(),
            error_kind: error_kind.to_string(),
            error_message: error_message.to_string(),
            timestamp: Utc::now(),
        });
        while self.stats.fallback_events.len() > FALLBACK_RING_CAPACITY {
            self.stats.fallback_events.pop_front();
        }
        self.persist();
    }

    pub fn read_stats(&self) -> HealthStats {
        self.stats.clone()
    }
}

fn classify(composite: f64) -> HealthStatus {
    if composite >= HEALTHY_THRESHOLD {
        HealthStatus::Healthy
    } else if composite >= DEGRADED_THRESHOLD {
        HealthStatus::Degraded
    } else {
        HealthStatus::Critical
    }
}

fn structural_score(module: &ModuleInfo) -> f64 {
    let mut score = 0.0;
    if module.has_contract {
        score += 0.25;
    }
    if module.has_spec {
        score += 0.25;
    }
    if module.has_core {
        score += 0.25;
    }
    if module.has_tests {
        score += 0.25;
    }
    score
}

fn missing_components(module: &ModuleInfo) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if !module.has_contract {
        missing.push("CONTRACT.md");
    }
    if !module.has_spec {
        missing.push("SPEC.md");
    }
    if !module.has_core {
        missing.push("core");
    }
    if !module.has_tests {
        missing.push("tests");
    }
    missing
}

fn reliability(module_name: &str, stats: &std::collections::BTreeMap<String, StepTally>) -> (f64, Option<String>) {
    let Some(step) = step_for_module(module_name) else {
        return (1.0, None);
    };
    let Some(tally) = stats.get(step) else {
        return (1.0, None);
    };
    let total = tally.calls + tally.fallbacks;
    if total == 0 {
        return (1.0, None);
    }
    let fallback_rate = tally.fallbacks as f64 / total as f64;
    let reliability = 1.0 - fallback_rate;
    let issue = if fallback_rate > 0.0 {
        Some(format!(
            "fallback rate: {:.0}% ({}/{})",
            fallback_rate * 100.0,
            tally.fallbacks,
            total
        ))
    } else {
        None
    };
    (reliability, issue)
}

/// Computes the per-module health derivation from scanned module metadata
/// plus the current health stats.
pub fn module_health(modules: &[ModuleInfo], stats: &HealthStats) -> HealthReport {
    let mut scores = Vec::with_capacity(modules.len());
    for module in modules {
        let structural = structural_score(module);
        let (rel, rel_issue) = reliability(&module.name, &stats.module_stats);
        let composite = STRUCTURAL_WEIGHT * structural + RELIABILITY_WEIGHT * rel;
        let status = classify(composite);

        let missing = missing_components(module);
        let leading_issue = rel_issue.or_else(|| {
            if missing.is_empty() {
                None
            } else {
                Some(format!("missing: {}", missing.join(", ")))
            }
        });

        scores.push(ModuleHealthScore {
            module: module.name.clone(),
            structural_score: structural,
            reliability_score: rel,
            composite,
            status,
            leading_issue,
        });
    }
    HealthReport { modules: scores }
}

/// A filesystem-free copy of the gate-state file shapes used elsewhere;
/// kept here only as a serde smoke-test anchor for `HealthStats`.
#[derive(Debug, Serialize, Deserialize)]
struct _HealthStatsShapeCheck(HealthStats);

pub fn default_health_path(anima_dir: &Path) -> PathBuf {
    anima_dir.join("health.json")
}
