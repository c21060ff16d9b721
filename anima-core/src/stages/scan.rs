//! Baseline *scan* — walks the project tree once into a `ProjectState`.
//!
//! A file-tree walk that builds a structural snapshot of a project
//! (traversal pruning, module flag derivation, protected-hash walk).

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::domain::models::{relpath, InboxItem, ModuleInfo, ProjectState, QualityReport};
use crate::domain::ports::{LinterPort, TestRunnerPort};
use crate::error::Result;

use super::PRUNED_DIR_NAMES;

/// Everything `scan` needs that isn't itself discovered by walking the
/// tree: which directories are off-limits to traversal, and the optional
/// quality/test ports (unavailability degrades to `None`, per 4.7.1).
pub struct ScanInputs<'a> {
    pub project_root: &'a Path,
    pub state_dir_name: &'a str,
    pub history_dir_name: &'a str,
    pub protected_paths: &'a [String],
    pub linter: Option<&'a dyn LinterPort>,
    pub test_runner: Option<&'a dyn TestRunnerPort>,
}

fn is_pruned(entry_name: &str, state_dir_name: &str, history_dir_name: &str) -> bool {
    PRUNED_DIR_NAMES.contains(&entry_name) || entry_name == state_dir_name || entry_name == history_dir_name
}

fn walk_relative_files(root: &Path, state_dir_name: &str, history_dir_name: &str) -> Vec<String> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        if e.depth() == 0 {
            return true;
        }
        let name = e.file_name().to_string_lossy();
        if e.file_type().is_dir() && is_pruned(&name, state_dir_name, history_dir_name) {
            return false;
        }
        true
    });
    for entry in walker.filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                files.push(relpath(rel));
            }
        }
    }
    files.sort();
    files
}

fn is_test_file(relative_path: &str) -> bool {
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    stem.starts_with("test_") || stem.ends_with("_test")
}

fn layer_exists(root: &Path, layer: &str) -> bool {
    let dir = root.join(layer);
    if !dir.is_dir() {
        return false;
    }
    WalkDir::new(&dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}

fn scan_modules(root: &Path) -> Vec<ModuleInfo> {
    let modules_dir = root.join("modules");
    let mut modules = Vec::new();
    let Ok(entries) = std::fs::read_dir(&modules_dir) else {
        return modules;
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let has_contract = dir.join("CONTRACT.md").is_file();
        let has_spec = dir.join("SPEC.md").is_file();
        let has_core = dir.join("core.rs").is_file() || dir.join("core").join("mod.rs").is_file();
        let tests_dir = dir.join("tests");
        let has_tests = tests_dir.is_dir()
            && std::fs::read_dir(&tests_dir)
                .map(|it| it.filter_map(|e| e.ok()).any(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false)))
                .unwrap_or(false);
        let files = walk_relative_files(&dir, "", "");
        modules.push(ModuleInfo {
            name,
            has_contract,
            has_spec,
            has_core,
            has_tests,
            files,
        });
    }
    modules
}

fn read_inbox(root: &Path) -> Vec<InboxItem> {
    let inbox_dir = root.join("inbox");
    let Ok(entries) = std::fs::read_dir(&inbox_dir) else {
        return Vec::new();
    };
    let mut names: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
        .collect();
    names.sort();

    names
        .into_iter()
        .filter_map(|path| {
            let content = std::fs::read_to_string(&path).ok()?;
            let filename = path.file_name()?.to_string_lossy().to_string();
            Some(InboxItem { filename, content })
        })
        .collect()
}

fn hash_file(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(format!("{:x}", hasher.finalize()))
}

/// For every declared protected path (a file, or a directory suffixed
/// `/`), returns `(relative_path, hash)` for each file found, `None` for
/// a hash only when the declared path itself does not exist.
fn compute_protected_hashes(root: &Path, protected_paths: &[String]) -> Vec<(String, Option<String>)> {
    let mut out = Vec::new();
    for declared in protected_paths {
        let is_dir_marker = declared.ends_with('/');
        let abs = root.join(declared.trim_end_matches('/'));
        if is_dir_marker {
            if !abs.is_dir() {
                continue;
            }
            let mut files: Vec<PathBuf> = WalkDir::new(&abs)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.path().to_path_buf())
                .collect();
            files.sort();
            for file in files {
                if let Ok(rel) = file.strip_prefix(root) {
                    out.push((relpath(rel), hash_file(&file)));
                }
            }
        } else if abs.is_file() {
            out.push((declared.clone(), hash_file(&abs)));
        } else {
            out.push((declared.clone(), None));
        }
    }
    out
}

pub async fn scan(inputs: &ScanInputs<'_>) -> Result<ProjectState> {
    let root = inputs.project_root;

    let files = walk_relative_files(root, inputs.state_dir_name, inputs.history_dir_name);
    let modules = scan_modules(root);
    let domain_exists = layer_exists(root, "domain");
    let adapters_exist = layer_exists(root, "adapters");
    let kernel_exists = layer_exists(root, "kernel");
    let has_tests = files.iter().any(|f| is_test_file(f));
    let has_pyproject = root.join("pyproject.toml").is_file();
    let has_pyrightconfig = root.join("pyrightconfig.json").is_file();
    let inbox = read_inbox(root);

    let quality = match inputs.linter {
        Some(linter) => {
            let lint = linter.run_lint().await.ok();
            let typecheck = linter.run_typecheck().await.ok();
            let report = QualityReport {
                lint,
                format: None,
                typecheck,
            };
            if report.is_empty() { None } else { Some(report) }
        }
        None => None,
    };

    let tests = match inputs.test_runner {
        Some(runner) => runner.run_tests().await.ok(),
        None => None,
    };

    let protected_hashes = compute_protected_hashes(root, inputs.protected_paths);

    Ok(ProjectState {
        files,
        modules,
        domain_exists,
        adapters_exist,
        kernel_exists,
        has_tests,
        has_pyproject,
        has_pyrightconfig,
        inbox,
        quality,
        tests,
        protected_hashes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_prunes_git_and_detects_layers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join(".git")).expect("mkdir");
        std::fs::write(root.join(".git").join("HEAD"), "ref: refs/heads/main").expect("write");
        std::fs::create_dir_all(root.join("domain")).expect("mkdir");
        std::fs::write(root.join("domain").join("models.rs"), "// models").expect("write");
        std::fs::write(root.join("VISION.md"), "identity").expect("write");

        let inputs = ScanInputs {
            project_root: root,
            state_dir_name: ".anima",
            history_dir_name: "iterations",
            protected_paths: &["VISION.md".to_string()],
            linter: None,
            test_runner: None,
        };
        let state = scan(&inputs).await.expect("scan");

        assert!(state.domain_exists);
        assert!(!state.adapters_exist);
        assert!(!state.files.iter().any(|f| f.starts_with(".git/")));
        assert_eq!(state.protected_hashes.len(), 1);
        assert!(state.protected_hashes[0].1.is_some());
    }

    #[tokio::test]
    async fn scan_reads_sorted_inbox_items() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("inbox")).expect("mkdir");
        std::fs::write(root.join("inbox").join("b.md"), "second").expect("write");
        std::fs::write(root.join("inbox").join("a.md"), "first").expect("write");

        let inputs = ScanInputs {
            project_root: root,
            state_dir_name: ".anima",
            history_dir_name: "iterations",
            protected_paths: &[],
            linter: None,
            test_runner: None,
        };
        let state = scan(&inputs).await.expect("scan");
        assert_eq!(state.inbox.len(), 2);
        assert_eq!(state.inbox[0].filename, "a.md");
        assert_eq!(state.inbox[0].content, "first");
    }

    #[tokio::test]
    async fn missing_protected_file_reports_none_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inputs = ScanInputs {
            project_root: dir.path(),
            state_dir_name: ".anima",
            history_dir_name: "iterations",
            protected_paths: &["VISION.md".to_string()],
            linter: None,
            test_runner: None,
        };
        let state = scan(&inputs).await.expect("scan");
        assert_eq!(state.protected_hashes, vec![("VISION.md".to_string(), None)]);
    }
}
