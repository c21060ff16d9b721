//! A real `VersionControlPort` that shells out to `git`.
//!
//! Refuses any subcommand not on a fixed allowlist, and invokes `git`
//! asynchronously through `tokio::process::Command`.

use std::path::PathBuf;

use anima_core::domain::ports::{PortError, PortResult, VersionControlPort};
use async_trait::async_trait;
use tokio::process::Command;

const ALLOWED_SUBCOMMANDS: &[&str] = &[
    "rev-parse", "branch", "add", "commit", "push", "reset", "tag", "status", "diff", "stash",
];

pub struct GitVersionControl {
    root: PathBuf,
    remote: String,
}

impl GitVersionControl {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote: "origin".to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> PortResult<std::process::Output> {
        let subcommand = *args.first().ok_or_else(|| PortError::Other("empty git args".to_string()))?;
        if !ALLOWED_SUBCOMMANDS.contains(&subcommand) {
            return Err(PortError::Other(format!(
                "git subcommand '{subcommand}' is not in the driver's allowlist"
            )));
        }
        Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| PortError::ToolUnavailable(format!("git: {e}")))
    }

    async fn run_ok(&self, args: &[&str]) -> PortResult<String> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(PortError::Other(String::from_utf8_lossy(&output.stderr).trim().to_string()))
        }
    }
}

#[async_trait]
impl VersionControlPort for GitVersionControl {
    async fn current_commit(&self) -> PortResult<String> {
        self.run_ok(&["rev-parse", "HEAD"]).await
    }

    async fn current_branch(&self) -> PortResult<String> {
        self.run_ok(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn create_snapshot(&self, message: &str) -> PortResult<String> {
        self.run(&["add", "-A"]).await?;
        let _ = self.run(&["commit", "-m", message, "--allow-empty"]).await;
        self.current_commit().await
    }

    async fn commit_and_push(&self, message: &str) -> PortResult<bool> {
        self.run(&["add", "-A"]).await?;
        let _ = self.run(&["commit", "-m", message]).await;
        let branch = self.current_branch().await?;
        let pushed = self
            .run(&["push", &self.remote, &branch])
            .await
            .map(|output| output.status.success())
            .unwrap_or(false);
        Ok(pushed)
    }

    async fn rollback_to(&self, commit_id: &str) -> PortResult<()> {
        self.run(&["reset", "--hard", commit_id]).await?;
        self.run(&["clean", "-fd"]).await.ok();
        Ok(())
    }

    async fn tag_milestone(&self, label: &str) -> PortResult<bool> {
        let output = self.run(&["tag", "-a", label, "-m", label]).await?;
        if !output.status.success() {
            // git exits non-zero for "tag already exists" too; treat as idempotent no-op.
            return Ok(false);
        }
        let _ = self.run(&["push", &self.remote, label]).await;
        Ok(true)
    }

    async fn has_uncommitted_changes(&self) -> PortResult<bool> {
        let status = self.run_ok(&["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    async fn diff_summary(&self) -> PortResult<Vec<String>> {
        let status = self.run_ok(&["status", "--porcelain"]).await?;
        Ok(status.lines().map(|l| l.trim().to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn init_repo(dir: &std::path::Path) {
        Command::new("git").arg("init").current_dir(dir).output().await.expect("init");
        Command::new("git")
            .args(["config", "user.email", "anima@example.com"])
            .current_dir(dir)
            .output()
            .await
            .expect("config email");
        Command::new("git")
            .args(["config", "user.name", "anima"])
            .current_dir(dir)
            .output()
            .await
            .expect("config name");
    }

    #[tokio::test]
    async fn disallowed_subcommand_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vcs = GitVersionControl::new(dir.path());
        let err = vcs.run(&["rm", "-rf", "."]).await.unwrap_err();
        assert!(matches!(err, PortError::Other(_)));
    }

    #[tokio::test]
    async fn snapshot_then_rollback_restores_a_clean_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_repo(dir.path()).await;
        std::fs::write(dir.path().join("a.txt"), "first").expect("write");
        let vcs = GitVersionControl::new(dir.path());
        let snapshot = vcs.create_snapshot("seed").await.expect("snapshot");

        std::fs::write(dir.path().join("a.txt"), "second").expect("write");
        assert!(vcs.has_uncommitted_changes().await.expect("dirty"));

        vcs.rollback_to(&snapshot).await.expect("rollback");
        assert!(!vcs.has_uncommitted_changes().await.expect("clean"));
        let content = std::fs::read_to_string(dir.path().join("a.txt")).expect("read");
        assert_eq!(content, "first");
    }
}
