//! State Store — persists the single `AnimaState` document at a
//! well-known path (`.anima/state.json`). Loads missing files as defaults
//! and writes via a temp-file-then-rename so a crash mid-write never leaves
//! a half-written document behind.

use std::path::{Path, PathBuf};

use crate::domain::models::AnimaState;
use crate::error::{AnimaError, Result};

/// No caching: every call re-reads/re-writes the backing file, so an
/// external edit (a human running `anima reset`) is always observed.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads `AnimaState` from disk, returning `AnimaState::default()` if
    /// the file is missing.
    pub fn load(&self) -> Result<AnimaState> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map_err(AnimaError::Json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AnimaState::default()),
            Err(source) => Err(AnimaError::PersistenceFailure {
                what: "anima state".to_string(),
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Writes `state`, creating the parent directory if needed. Writes to
    /// a sibling temp file and renames over the target so a crash mid-write
    /// never leaves a half-written `state.json` behind.
    pub fn save(&self, state: &AnimaState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AnimaError::PersistenceFailure {
                what: "state directory".to_string(),
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(state).map_err(AnimaError::Json)?;
        let tmp_path = self.tmp_path();
        std::fs::write(&tmp_path, json).map_err(|source| AnimaError::PersistenceFailure {
            what: "anima state (tmp)".to_string(),
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| AnimaError::PersistenceFailure {
            what: "anima state".to_string(),
            path: self.path.clone(),
            source,
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "state.json".to_string());
        name.push_str(".tmp");
        self.path.with_file_name(name)
    }
}

pub fn default_state_path(anima_dir: &Path) -> PathBuf {
    anima_dir.join("state.json")
}
