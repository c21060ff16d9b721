//! History Store — one JSON file per completed iteration under a
//! well-known directory (`iterations/<iteration_id>.json`). Refuses to
//! overwrite an existing record; `load_recent` reads newest-first.

use std::path::{Path, PathBuf};

use crate::domain::models::IterationRecord;
use crate::error::{AnimaError, Result};

/// Append-only store of `IterationRecord`s, one file per `iteration_id`.
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, iteration_id: &str) -> PathBuf {
        self.dir.join(format!("{iteration_id}.json"))
    }

    /// Persists `record`, failing loudly (invariant 3) if a record for the
    /// same `iteration_id` already exists.
    pub fn save(&self, record: &IterationRecord) -> Result<PathBuf> {
        let path = self.path_for(&record.iteration_id);
        if path.exists() {
            return Err(AnimaError::Other(format!(
                "iteration record {} already exists at {path:?}",
                record.iteration_id
            )));
        }
        std::fs::create_dir_all(&self.dir).map_err(|source| AnimaError::PersistenceFailure {
            what: "history directory".to_string(),
            path: self.dir.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(record).map_err(AnimaError::Json)?;
        std::fs::write(&path, json).map_err(|source| AnimaError::PersistenceFailure {
            what: "iteration record".to_string(),
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// All `iteration_id`s with a persisted record, ordered by on-disk
    /// file name (which sorts chronologically given the `NNNN-...` id
    /// shape).
    fn sorted_record_paths(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();
        paths
    }

    fn load_path(path: &Path) -> Option<IterationRecord> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// All records in on-disk order (oldest first).
    pub fn load_all(&self) -> Vec<IterationRecord> {
        self.sorted_record_paths()
            .iter()
            .filter_map(|p| Self::load_path(p))
            .collect()
    }

    /// The `count` most recent records, newest-first. `count = 0` yields
    /// an empty sequence.
    pub fn load_recent(&self, count: usize) -> Vec<IterationRecord> {
        if count == 0 {
            return Vec::new();
        }
        let mut paths = self.sorted_record_paths();
        paths.reverse();
        paths
            .into_iter()
            .take(count)
            .filter_map(|p| Self::load_path(&p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        ExecutionResult, IterationOutcome, StageResult, StageStatus, VerificationReport,
    };

    fn record(id: &str) -> IterationRecord {
        IterationRecord {
            iteration_id: id.to_string(),
            timestamp: chrono::Utc::now(),
            gaps_addressed: "gap".to_string(),
            plan_summary: "plan".to_string(),
            execution: ExecutionResult {
                success: true,
                output: String::new(),
                errors: String::new(),
                exit_code: 0,
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
                    status: StageStatus::Passed,
                    output: String::new(),
                }],
                all_passed: true,
                issues: vec![],
                improvements: vec![],
                summary: "All 1 verification stages passed.".to_string(),
            },
            outcome: IterationOutcome::Success,
            duration_seconds: 1.0,
            notes: String::new(),
        }
    }

    #[test]
    fn save_then_load_recent_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(dir.path());
        store.save(&record("0001-20260101-000000")).expect("save");
        store.save(&record("0002-20260101-000100")).expect("save");

        let recent = store.load_recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].iteration_id, "0002-20260101-000100");
    }

    #[test]
    fn saving_the_same_id_twice_fails_loudly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(dir.path());
        store.save(&record("0001-20260101-000000")).expect("save");
        let second = store.save(&record("0001-20260101-000000"));
        assert!(second.is_err());
    }

    #[test]
    fn load_recent_zero_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(dir.path());
        store.save(&record("0001-20260101-000000")).expect("save");
        assert!(store.load_recent(0).is_empty());
    }

    #[test]
    fn load_recent_bounds_to_available_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(dir.path());
        store.save(&record("0001-20260101-000000")).expect("save");
        let recent = store.load_recent(10);
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn load_all_is_ordered_oldest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(dir.path());
        store.save(&record("0002-20260101-000100")).expect("save");
        store.save(&record("0001-20260101-000000")).expect("save");
        let all = store.load_all();
        assert_eq!(all[0].iteration_id, "0001-20260101-000000");
        assert_eq!(all[1].iteration_id, "0002-20260101-000100");
    }

    #[test]
    fn missing_directory_yields_empty_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(dir.path().join("nonexistent"));
        assert!(store.load_all().is_empty());
        assert!(store.load_recent(5).is_empty());
    }
}
