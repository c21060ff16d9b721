//! A real `FileSystemPort` rooted at the project directory.
//!
//! Treats `std::io::Error` as the only failure mode worth distinguishing
//! (not found vs. everything else); relative paths are always resolved
//! against the configured project root.

use std::path::{Path, PathBuf};

use anima_core::domain::ports::{FileInfo, FileSystemPort, PortError, PortResult};
use async_trait::async_trait;

pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

fn io_error_to_port(path: &str, err: std::io::Error) -> PortError {
    if err.kind() == std::io::ErrorKind::NotFound {
        PortError::NotFound(path.to_string())
    } else {
        PortError::Other(err.to_string())
    }
}

#[async_trait]
impl FileSystemPort for LocalFileSystem {
    async fn read_file(&self, path: &str) -> PortResult<String> {
        tokio::fs::read_to_string(self.resolve(path))
            .await
            .map_err(|e| io_error_to_port(path, e))
    }

    async fn write_file(&self, path: &str, content: &str) -> PortResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error_to_port(path, e))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| io_error_to_port(path, e))
    }

    async fn list_files(&self, root: &str, glob: &str) -> PortResult<Vec<FileInfo>> {
        let dir = self.resolve(root);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error_to_port(root, e)),
        };

        let suffix = glob.trim_start_matches('*');
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error_to_port(root, e))? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !suffix.is_empty() && !file_name.ends_with(suffix) {
                continue;
            }
            let metadata = entry.metadata().await.map_err(|e| io_error_to_port(root, e))?;
            if !metadata.is_file() {
                continue;
            }
            let relative = Path::new(root).join(&file_name);
            let mtime_unix = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            files.push(FileInfo {
                path: relative.to_string_lossy().replace('\\', "/"),
                size: metadata.len(),
                mtime_unix,
            });
        }
        Ok(files)
    }

    async fn file_exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.resolve(path)).await.is_ok()
    }

    async fn delete_file(&self, path: &str) -> PortResult<()> {
        tokio::fs::remove_file(self.resolve(path))
            .await
            .map_err(|e| io_error_to_port(path, e))
    }

    async fn make_directory(&self, path: &str) -> PortResult<()> {
        tokio::fs::create_dir_all(self.resolve(path))
            .await
            .map_err(|e| io_error_to_port(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_file_relative_to_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new(dir.path());
        fs.write_file("roadmap/v0.1.md", "- [ ] thing\n").await.expect("write");
        assert!(fs.file_exists("roadmap/v0.1.md").await);
        let content = fs.read_file("roadmap/v0.1.md").await.expect("read");
        assert_eq!(content, "- [ ] thing\n");
    }

    #[tokio::test]
    async fn missing_file_is_reported_as_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new(dir.path());
        let err = fs.read_file("nope.md").await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_files_filters_by_suffix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new(dir.path());
        fs.write_file("roadmap/v0.1.md", "a").await.expect("write");
        fs.write_file("roadmap/notes.txt", "b").await.expect("write");
        let files = fs.list_files("roadmap", "*.md").await.expect("list");
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("v0.1.md"));
    }
}
