use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use codeboard_core::{normalize_path, AnalysisInsights};
use codeboard_store::AnalysisManifest;

/// Rewrite renamed paths across assigned files, file methods, and key
/// entities. Pure data, no collaborator involved.
pub fn patch_paths_in_analysis(analysis: &mut AnalysisInsights, renames: &BTreeMap<String, String>) {
    if renames.is_empty() {
        return;
    }
    info!("patching {} renamed paths in analysis", renames.len());

    for component in &mut analysis.components {
        for file in &mut component.assigned_files {
            if let Some(new_path) = renames.get(file) {
                *file = new_path.clone();
            }
        }
        for group in &mut component.file_methods {
            if let Some(new_path) = renames.get(&group.file_path) {
                group.file_path = new_path.clone();
            }
        }
        for entity in &mut component.key_entities {
            if let Some(file) = &entity.reference_file {
                if let Some(new_path) = renames.get(file) {
                    debug!("patched key entity path: {file} -> {new_path}");
                    entity.reference_file = Some(new_path.clone());
                }
            }
        }
    }
}

/// Apply renames to the manifest's file index.
pub fn patch_paths_in_manifest(manifest: &mut AnalysisManifest, renames: &BTreeMap<String, String>) {
    for (old_path, new_path) in renames {
        manifest.update_file_path(old_path, new_path);
    }
}

/// Matches paths against a set of patterns, tolerating a repository prefix on
/// either side (`repos/X/a/b.py` vs `a/b.py`).
struct PathMatcher {
    deleted: BTreeSet<String>,
    renames: BTreeMap<String, String>,
}

impl PathMatcher {
    fn new(deleted_files: &[String], renames: &BTreeMap<String, String>) -> Self {
        let mut deleted = BTreeSet::new();
        for file in deleted_files {
            deleted.insert(file.clone());
            deleted.insert(strip_repo_prefix(file));
        }
        let mut rename_map = BTreeMap::new();
        for (old, new) in renames {
            rename_map.insert(old.clone(), new.clone());
            rename_map.insert(strip_repo_prefix(old), new.clone());
        }
        Self {
            deleted,
            renames: rename_map,
        }
    }

    /// A path counts as deleted unless it is the old side of a rename; a
    /// rename source reported as deleted is a move, not a removal.
    fn is_deleted(&self, path: &str) -> bool {
        if self.renamed_to(path).is_some() {
            return false;
        }
        let normalized = normalize_path(path);
        if self.deleted.contains(path) || self.deleted.contains(&normalized) {
            return true;
        }
        self.deleted
            .iter()
            .any(|pattern| suffix_matches(path, &normalized, pattern))
    }

    fn renamed_to(&self, path: &str) -> Option<String> {
        let normalized = normalize_path(path);
        if let Some(new_path) = self
            .renames
            .get(path)
            .or_else(|| self.renames.get(&normalized))
        {
            return Some(new_path.clone());
        }
        self.renames
            .iter()
            .find(|(old, _)| suffix_matches(path, &normalized, old))
            .map(|(_, new)| new.clone())
    }
}

fn suffix_matches(path: &str, normalized: &str, pattern: &str) -> bool {
    path.ends_with(pattern) || normalized.ends_with(pattern)
}

fn strip_repo_prefix(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.strip_prefix("repos/") {
        Some(rest) => rest
            .split_once('/')
            .map(|(_, tail)| tail.to_string())
            .unwrap_or(normalized),
        None => normalized,
    }
}

/// Patch a sub-analysis in place: drop entries for deleted files and apply
/// renames. Returns true iff anything changed.
pub fn patch_sub_analysis(
    sub_analysis: &mut AnalysisInsights,
    deleted_files: &[String],
    renames: &BTreeMap<String, String>,
) -> bool {
    let matcher = PathMatcher::new(deleted_files, renames);
    let mut changed = false;

    for component in &mut sub_analysis.components {
        let original_len = component.assigned_files.len();
        component
            .assigned_files
            .retain(|file| !matcher.is_deleted(file));
        changed |= component.assigned_files.len() < original_len;

        for file in &mut component.assigned_files {
            if let Some(new_path) = matcher.renamed_to(file) {
                *file = new_path;
                changed = true;
            }
        }

        let original_len = component.file_methods.len();
        component
            .file_methods
            .retain(|group| !matcher.is_deleted(&group.file_path));
        changed |= component.file_methods.len() < original_len;

        for group in &mut component.file_methods {
            if let Some(new_path) = matcher.renamed_to(&group.file_path) {
                group.file_path = new_path;
                changed = true;
            }
        }

        let original_len = component.key_entities.len();
        component.key_entities.retain(|entity| {
            entity
                .reference_file
                .as_deref()
                .is_none_or(|file| !matcher.is_deleted(file))
        });
        changed |= component.key_entities.len() < original_len;

        for entity in &mut component.key_entities {
            if let Some(file) = &entity.reference_file {
                if let Some(new_path) = matcher.renamed_to(file) {
                    entity.reference_file = Some(new_path);
                    changed = true;
                }
            }
        }
    }

    changed
}
