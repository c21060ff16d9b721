//! Roadmap parsing, current-version/milestone detection, and the
//! tag-on-advance + README badge update the driver runs after a success.
//!
//! Version labels compare as numeric tuples (so `v0.10` sorts after `v0.9`,
//! not before), and the README update replaces a marker-delimited block with
//! a freshly rendered shields.io badge.

use std::path::Path;

use crate::domain::models::{RoadmapItem, Vision};
use crate::domain::ports::{FileSystemPort, VersionControlPort};
use crate::error::Result;

const README_MARKER_START: &str = "<!-- ANIMA:MILESTONE -->";
const README_MARKER_END: &str = "<!-- /ANIMA:MILESTONE -->";

/// Parses a roadmap checklist document: one item per `- [ ] text` /
/// `- [x] text` line, in document order. Non-checklist lines are ignored.
pub fn parse_roadmap_items(version_label: &str, content: &str) -> Vec<RoadmapItem> {
    let mut items = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        let (completed, rest) = if let Some(rest) = trimmed.strip_prefix("- [x]") {
            (true, rest)
        } else if let Some(rest) = trimmed.strip_prefix("- [X]") {
            (true, rest)
        } else if let Some(rest) = trimmed.strip_prefix("- [ ]") {
            (false, rest)
        } else {
            continue;
        };
        items.push(RoadmapItem {
            version_label: version_label.to_string(),
            description: rest.trim().to_string(),
            completed,
        });
    }
    items
}

/// Splits a `vN.N.N`-shaped label into a comparable numeric key, so
/// `v0.10` sorts after `v0.9`. Non-numeric labels sort lexicographically
/// after every numeric one.
fn version_key(label: &str) -> Option<Vec<u64>> {
    let trimmed = label.strip_prefix('v').unwrap_or(label);
    let parts: Option<Vec<u64>> = trimmed.split('.').map(|p| p.parse::<u64>().ok()).collect();
    parts
}

/// Sorts version labels ascending by numeric key when possible, falling
/// back to lexicographic order for labels that don't parse.
pub fn sorted_versions(labels: &[String]) -> Vec<String> {
    let mut sorted = labels.to_vec();
    sorted.sort_by(|a, b| match (version_key(a), version_key(b)) {
        (Some(ka), Some(kb)) => ka.cmp(&kb),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
    sorted
}

/// Reads `VISION.md` for identity/principles and every `roadmap/v*.md`
/// file (sorted by filename) into a single `Vision`, via the filesystem
/// port.
pub async fn load_vision(
    fs: &dyn FileSystemPort,
    vision_path: &str,
    roadmap_dir: &str,
) -> Result<Vision> {
    let identity = fs.read_file(vision_path).await.unwrap_or_default();
    let principles: Vec<String> = identity
        .lines()
        .filter(|l| l.trim_start().starts_with('-'))
        .map(|l| l.trim_start().trim_start_matches('-').trim().to_string())
        .collect();

    let mut files = fs
        .list_files(roadmap_dir, "*.md")
        .await
        .unwrap_or_default();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let mut items = Vec::new();
    let mut roadmap_texts = Vec::new();
    for file in files {
        let Some(version_label) = version_label_from_path(&file.path) else {
            continue;
        };
        if let Ok(content) = fs.read_file(&file.path).await {
            items.extend(parse_roadmap_items(&version_label, &content));
            roadmap_texts.push((version_label, content));
        }
    }

    Ok(Vision {
        identity,
        principles,
        items,
        roadmap_texts,
    })
}

fn version_label_from_path(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.strip_suffix(".md")?;
    if stem.starts_with('v') {
        Some(stem.to_string())
    } else {
        None
    }
}

/// First version (in ascending order) whose checklist still has at least
/// one incomplete item; the achieved milestone is the version strictly
/// preceding it among versions that appear in the vision at all.
pub fn detect_current_milestone(vision: &Vision) -> (Option<String>, Option<String>) {
    let mut labels: Vec<String> = Vec::new();
    for item in &vision.items {
        if !labels.contains(&item.version_label) {
            labels.push(item.version_label.clone());
        }
    }
    let ordered = sorted_versions(&labels);

    let mut target = None;
    for (i, version) in ordered.iter().enumerate() {
        let has_incomplete = vision
            .items
            .iter()
            .any(|it| &it.version_label == version && !it.completed);
        if has_incomplete {
            target = Some((i, version.clone()));
            break;
        }
    }

    match target {
        Some((0, version)) => (None, Some(version)),
        Some((i, version)) => (Some(ordered[i - 1].clone()), Some(version)),
        None => (ordered.last().cloned(), None),
    }
}

/// `true` iff `candidate` is a strictly later version than `current`
/// (an empty `current` milestone always counts as behind).
pub fn is_advance(current_milestone: &str, candidate: &str) -> bool {
    if current_milestone.is_empty() {
        return true;
    }
    match (version_key(current_milestone), version_key(candidate)) {
        (Some(cur), Some(cand)) => cand > cur,
        _ => candidate != current_milestone,
    }
}

fn shields_badge(label: &str) -> String {
    let encoded = label.replace('-', "--").replace(' ', "_");
    format!(
        "![milestone](https://img.shields.io/badge/milestone-{encoded}-brightgreen)"
    )
}

/// Replaces the marker-delimited milestone block in a README's contents
/// with a freshly rendered shields.io badge for `milestone`. If the
/// markers aren't present, the content is returned unchanged.
pub fn render_readme_block(readme_content: &str, milestone: &str) -> String {
    let Some(start) = readme_content.find(README_MARKER_START) else {
        return readme_content.to_string();
    };
    let Some(end_rel) = readme_content[start..].find(README_MARKER_END) else {
        return readme_content.to_string();
    };
    let end = start + end_rel + README_MARKER_END.len();

    let mut out = String::with_capacity(readme_content.len() + 64);
    out.push_str(&readme_content[..start]);
    out.push_str(README_MARKER_START);
    out.push('\n');
    out.push_str(&shields_badge(milestone));
    out.push('\n');
    out.push_str(README_MARKER_END);
    out.push_str(&readme_content[end..]);
    out
}

/// Writes the updated README block via the filesystem port. A no-op
/// (returns `Ok(false)`) if the README has no marker block to replace.
pub async fn update_readme(
    fs: &dyn FileSystemPort,
    readme_path: &str,
    milestone: &str,
) -> Result<bool> {
    let Ok(content) = fs.read_file(readme_path).await else {
        return Ok(false);
    };
    let updated = render_readme_block(&content, milestone);
    if updated == content {
        return Ok(false);
    }
    fs.write_file(readme_path, &updated)
        .await
        .map_err(|e| crate::error::AnimaError::Other(e.to_string()))?;
    Ok(true)
}

/// After a successful iteration: re-derives the achieved milestone from
/// the current vision and, if it strictly advances past
/// `current_milestone`, tags it (idempotent at the VCS layer) and returns
/// the new milestone label. Never downgrades (per the open-question
/// decision in `DESIGN.md`).
pub async fn tag_milestone_if_advanced(
    vcs: &dyn VersionControlPort,
    vision: &Vision,
    current_milestone: &str,
) -> Result<Option<String>> {
    let (achieved, _target) = detect_current_milestone(vision);
    let Some(achieved) = achieved else {
        return Ok(None);
    };
    if !is_advance(current_milestone, &achieved) {
        return Ok(None);
    }
    vcs.tag_milestone(&achieved)
        .await
        .map_err(|e| crate::error::AnimaError::Other(e.to_string()))?;
    Ok(Some(achieved))
}

pub fn default_readme_path(project_root: &Path) -> String {
    project_root.join("README.md").to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::test_doubles::{InMemoryFileSystem, NullVersionControl};

    #[test]
    fn parses_checked_and_unchecked_items() {
        let content = "- [x] done thing\n- [ ] todo thing\nnot a checklist line\n";
        let items = parse_roadmap_items("v0.1", content);
        assert_eq!(items.len(), 2);
        assert!(items[0].completed);
        assert!(!items[1].completed);
        assert_eq!(items[1].description, "todo thing");
    }

    #[test]
    fn version_sort_is_numeric_not_lexicographic() {
        let labels = vec!["v0.9".to_string(), "v0.10".to_string(), "v0.2".to_string()];
        let sorted = sorted_versions(&labels);
        assert_eq!(sorted, vec!["v0.2".to_string(), "v0.9".to_string(), "v0.10".to_string()]);
    }

    #[test]
    fn current_milestone_targets_first_incomplete_version() {
        let vision = Vision {
            identity: String::new(),
            principles: vec![],
            items: vec![
                RoadmapItem {
                    version_label: "v0.1".to_string(),
                    description: "a".to_string(),
                    completed: true,
                },
                RoadmapItem {
                    version_label: "v0.2".to_string(),
                    description: "b".to_string(),
                    completed: false,
                },
            ],
            roadmap_texts: vec![],
        };
        let (achieved, target) = detect_current_milestone(&vision);
        assert_eq!(achieved, Some("v0.1".to_string()));
        assert_eq!(target, Some("v0.2".to_string()));
    }

    #[test]
    fn all_versions_complete_has_no_target_and_last_achieved() {
        let vision = Vision {
            identity: String::new(),
            principles: vec![],
            items: vec![RoadmapItem {
                version_label: "v0.1".to_string(),
                description: "a".to_string(),
                completed: true,
            }],
            roadmap_texts: vec![],
        };
        let (achieved, target) = detect_current_milestone(&vision);
        assert_eq!(achieved, Some("v0.1".to_string()));
        assert_eq!(target, None);
    }

    #[test]
    fn is_advance_rejects_downgrades() {
        assert!(!is_advance("v0.3", "v0.2"));
        assert!(is_advance("v0.1", "v0.2"));
        assert!(is_advance("", "v0.1"));
    }

    #[test]
    fn readme_block_is_replaced_between_markers() {
        let readme = format!(
            "# Project\n\n{}\nold badge\n{}\n\nMore text.",
            README_MARKER_START, README_MARKER_END
        );
        let updated = render_readme_block(&readme, "v0.2");
        assert!(updated.contains("v0.2"));
        assert!(!updated.contains("old badge"));
        assert!(updated.contains("More text."));
    }

    #[test]
    fn readme_without_markers_is_unchanged() {
        let readme = "# Project\nno markers here\n";
        assert_eq!(render_readme_block(readme, "v0.2"), readme);
    }

    #[tokio::test]
    async fn tag_milestone_if_advanced_tags_only_on_strict_advance() {
        let vcs = NullVersionControl;
        let vision = Vision {
            identity: String::new(),
            principles: vec![],
            items: vec![
                RoadmapItem {
                    version_label: "v0.1".to_string(),
                    description: "a".to_string(),
                    completed: true,
                },
                RoadmapItem {
                    version_label: "v0.2".to_string(),
                    description: "b".to_string(),
                    completed: false,
                },
            ],
            roadmap_texts: vec![],
        };
        let tagged = tag_milestone_if_advanced(&vcs, &vision, "").await.expect("tag");
        assert_eq!(tagged, Some("v0.1".to_string()));

        let not_tagged = tag_milestone_if_advanced(&vcs, &vision, "v0.1").await.expect("tag");
        assert_eq!(not_tagged, None);
    }

    #[tokio::test]
    async fn load_vision_reads_identity_and_roadmap_files() {
        let fs = InMemoryFileSystem::with_file("VISION.md", "Build great software\n- be honest\n");
        fs.write_file("roadmap/v0.1.md", "- [ ] add CLI entrypoint\n")
            .await
            .expect("write");
        let vision = load_vision(&fs, "VISION.md", "roadmap").await.expect("load");
        assert!(vision.identity.contains("Build great software"));
        assert_eq!(vision.principles, vec!["be honest".to_string()]);
        assert_eq!(vision.items.len(), 1);
        assert_eq!(vision.items[0].version_label, "v0.1");
        assert_eq!(vision.roadmap_texts.len(), 1);
        assert_eq!(vision.roadmap_texts[0].0, "v0.1");
        assert!(vision.roadmap_texts[0].1.contains("add CLI entrypoint"));
    }
}
