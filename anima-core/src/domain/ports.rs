//! Port contracts for every external collaborator the kernel depends on.
//!
//! The core ships no concrete adapters: subprocess agents, linters, test
//! runners, and the filesystem/VCS backing a working tree are all
//! implemented outside this crate. Each trait here is the full interface
//! the driver and pipeline stages are allowed to call.

use async_trait::async_trait;
use thiserror::Error;

use super::models::{ExecutionResult, QualityCheckResult, TestResult};

#[derive(Debug, Error)]
pub enum PortError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("{0}")]
    Other(String),
}

pub type PortResult<T> = Result<T, PortError>;

/// One entry from `FileSystemPort::list_files`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mtime_unix: i64,
}

/// Abstraction over file system operations.
#[async_trait]
pub trait FileSystemPort: Send + Sync {
    /// Reads a file's contents as text. Fails with `PortError::NotFound`
    /// when the file does not exist.
    async fn read_file(&self, path: &str) -> PortResult<String>;

    /// Writes `content` to `path`, creating parent directories as needed.
    async fn write_file(&self, path: &str, content: &str) -> PortResult<()>;

    /// Lists files matching `glob` under `root`.
    async fn list_files(&self, root: &str, glob: &str) -> PortResult<Vec<FileInfo>>;

    /// Returns `true` iff `path` exists.
    async fn file_exists(&self, path: &str) -> bool;

    /// Deletes a file.
    async fn delete_file(&self, path: &str) -> PortResult<()>;

    /// Creates a directory and its parents if they don't already exist.
    async fn make_directory(&self, path: &str) -> PortResult<()>;
}

/// Abstraction over version-control operations (e.g. git).
///
/// Lifecycle responsibilities beyond basic VCS: `commit_and_push` is the
/// only path by which a successful iteration's changes reach a remote, and
/// `tag_milestone` is how roadmap progress becomes a durable, idempotent
/// git tag.
#[async_trait]
pub trait VersionControlPort: Send + Sync {
    async fn current_commit(&self) -> PortResult<String>;
    async fn current_branch(&self) -> PortResult<String>;

    /// Stages all changes and commits. Returns the new commit id.
    async fn create_snapshot(&self, message: &str) -> PortResult<String>;

    /// Stages all changes, commits, and pushes to the configured remote.
    /// Returns `true` iff the push succeeded; a failed push is not itself
    /// an error (see `DESIGN.md` open-question decision #2).
    async fn commit_and_push(&self, message: &str) -> PortResult<bool>;

    /// Resets the working tree to `commit_id`, discarding all changes
    /// made since, including untracked files.
    async fn rollback_to(&self, commit_id: &str) -> PortResult<()>;

    /// Creates an annotated tag `label` and pushes it. Idempotent: returns
    /// `false` without error if the tag already exists.
    async fn tag_milestone(&self, label: &str) -> PortResult<bool>;

    async fn has_uncommitted_changes(&self) -> PortResult<bool>;

    /// Tracked and untracked paths that differ from the last commit.
    async fn diff_summary(&self) -> PortResult<Vec<String>>;
}

/// Abstraction over linting and type checking.
#[async_trait]
pub trait LinterPort: Send + Sync {
    async fn run_lint(&self) -> PortResult<QualityCheckResult>;
    async fn run_typecheck(&self) -> PortResult<QualityCheckResult>;
}

/// Abstraction over test execution.
#[async_trait]
pub trait TestRunnerPort: Send + Sync {
    async fn run_tests(&self) -> PortResult<TestResult>;
}

/// Abstraction over AI coding agent backends (Claude Code, Codex, Gemini, …).
///
/// Must never raise: every failure mode — missing binary, timeout, non-zero
/// exit, quota rejection — is encoded in the returned `ExecutionResult`.
#[async_trait]
pub trait AgentPort: Send + Sync {
    async fn execute(&self, prompt: &str) -> ExecutionResult;
}

/// Null/in-memory test doubles for each port, used only by this crate's
/// own test suite.
#[cfg(test)]
pub mod test_doubles {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryFileSystem {
        files: Mutex<std::collections::BTreeMap<String, String>>,
    }

    impl InMemoryFileSystem {
        pub fn with_file(path: &str, content: &str) -> Self {
            let fs = Self::default();
            fs.files.lock().expect("lock").insert(path.to_string(), content.to_string());
            fs
        }
    }

    #[async_trait]
    impl FileSystemPort for InMemoryFileSystem {
        async fn read_file(&self, path: &str) -> PortResult<String> {
            self.files
                .lock()
                .expect("lock")
                .get(path)
                .cloned()
                .ok_or_else(|| PortError::NotFound(path.to_string()))
        }

        async fn write_file(&self, path: &str, content: &str) -> PortResult<()> {
            self.files.lock().expect("lock").insert(path.to_string(), content.to_string());
            Ok(())
        }

        async fn list_files(&self, root: &str, _glob: &str) -> PortResult<Vec<FileInfo>> {
            Ok(self
                .files
                .lock()
                .expect("lock")
                .keys()
                .filter(|p| p.starts_with(root))
                .map(|p| FileInfo {
                    path: p.clone(),
                    size: 0,
                    mtime_unix: 0,
                })
                .collect())
        }

        async fn file_exists(&self, path: &str) -> bool {
            self.files.lock().expect("lock").contains_key(path)
        }

        async fn delete_file(&self, path: &str) -> PortResult<()> {
            self.files
                .lock()
                .expect("lock")
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| PortError::NotFound(path.to_string()))
        }

        async fn make_directory(&self, _path: &str) -> PortResult<()> {
            Ok(())
        }
    }

    /// Always reports a clean tree at a fixed commit and never fails.
    pub struct NullVersionControl;

    #[async_trait]
    impl VersionControlPort for NullVersionControl {
        async fn current_commit(&self) -> PortResult<String> {
            Ok("0000000".to_string())
        }
        async fn current_branch(&self) -> PortResult<String> {
            Ok("main".to_string())
        }
        async fn create_snapshot(&self, _message: &str) -> PortResult<String> {
            Ok("0000000".to_string())
        }
        async fn commit_and_push(&self, _message: &str) -> PortResult<bool> {
            Ok(true)
        }
        async fn rollback_to(&self, _commit_id: &str) -> PortResult<()> {
            Ok(())
        }
        async fn tag_milestone(&self, _label: &str) -> PortResult<bool> {
            Ok(true)
        }
        async fn has_uncommitted_changes(&self) -> PortResult<bool> {
            Ok(false)
        }
        async fn diff_summary(&self) -> PortResult<Vec<String>> {
            Ok(vec![])
        }
    }

    /// Always returns the same canned result, ignoring the prompt.
    pub struct StubAgent(pub ExecutionResult);

    #[async_trait]
    impl AgentPort for StubAgent {
        async fn execute(&self, _prompt: &str) -> ExecutionResult {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn in_memory_filesystem_round_trips() {
        let fs = InMemoryFileSystem::default();
        fs.write_file("a.txt", "hello").await.expect("write");
        assert!(fs.file_exists("a.txt").await);
        assert_eq!(fs.read_file("a.txt").await.expect("read"), "hello");
        fs.delete_file("a.txt").await.expect("delete");
        assert!(!fs.file_exists("a.txt").await);
    }

    #[tokio::test]
    async fn null_version_control_never_fails() {
        let vcs = NullVersionControl;
        assert!(!vcs.has_uncommitted_changes().await.expect("check"));
        assert!(vcs.commit_and_push("msg").await.expect("push"));
    }
}
