use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use tracing::debug;

use codeboard_core::config::IncrementalConfig;
use codeboard_core::should_skip_file;
use codeboard_static::StaticAnalysis;
use codeboard_store::AnalysisManifest;

use crate::changes::{ChangeKind, ChangeSet};

/// Recommended update action based on impact analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateAction {
    /// No changes detected.
    #[default]
    None,
    /// Renames only, patched without any collaborator call.
    PatchPaths,
    /// Re-run the details collaborator for specific components.
    UpdateComponents,
    /// The top architecture level needs a refresh.
    UpdateArchitecture,
    /// Too many changes, start fresh.
    FullReanalysis,
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdateAction::None => "none",
            UpdateAction::PatchPaths => "patch_paths",
            UpdateAction::UpdateComponents => "update_components",
            UpdateAction::UpdateArchitecture => "update_architecture",
            UpdateAction::FullReanalysis => "full",
        };
        write!(f, "{label}")
    }
}

/// Result of analyzing the impact of a change set.
#[derive(Debug, Clone, Default)]
pub struct ChangeImpact {
    pub renames: BTreeMap<String, String>,
    pub modified_files: Vec<String>,
    pub added_files: Vec<String>,
    pub deleted_files: Vec<String>,

    pub dirty_components: BTreeSet<String>,
    /// Components whose sub-analysis must be regenerated (structural changes).
    pub components_needing_reexpansion: BTreeSet<String>,

    /// Modified files whose call-graph edges cross component boundaries.
    pub cross_boundary_changes: Vec<String>,
    pub architecture_dirty: bool,
    /// New files without an owning component yet.
    pub unassigned_files: Vec<String>,

    pub action: UpdateAction,
    pub reason: String,
}

impl ChangeImpact {
    /// Human-readable summary of the impact.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Action: {}", self.action),
            format!("Reason: {}", self.reason),
            format!("Renames: {}", self.renames.len()),
            format!("Modified: {}", self.modified_files.len()),
            format!("Added: {}", self.added_files.len()),
            format!("Deleted: {}", self.deleted_files.len()),
            format!("Dirty components: {:?}", self.dirty_components),
        ];
        if !self.components_needing_reexpansion.is_empty() {
            lines.push(format!(
                "Components needing re-expansion: {:?}",
                self.components_needing_reexpansion
            ));
        }
        if self.architecture_dirty {
            lines.push("Architecture refresh needed".to_string());
        }
        if !self.unassigned_files.is_empty() {
            lines.push(format!("Unassigned files: {:?}", self.unassigned_files));
        }
        lines.join("\n")
    }

    fn has_any_changes(&self) -> bool {
        !self.renames.is_empty()
            || !self.modified_files.is_empty()
            || !self.added_files.is_empty()
            || !self.deleted_files.is_empty()
    }
}

/// Analyze the impact of a change set and determine the update action.
pub fn analyze_impact(
    changes: &ChangeSet,
    manifest: &AnalysisManifest,
    static_analysis: Option<&StaticAnalysis>,
    config: &IncrementalConfig,
) -> ChangeImpact {
    let mut impact = ChangeImpact::default();

    if changes.is_empty() {
        impact.action = UpdateAction::None;
        impact.reason = "No changes detected".to_string();
        return impact;
    }

    // Categorize changes, filtering non-source files upfront. Renames are
    // filtered on the new path.
    impact.renames = changes
        .renames()
        .into_iter()
        .filter(|(_, new)| !should_skip_file(new))
        .collect();
    impact.modified_files = changes
        .modified_files()
        .into_iter()
        .filter(|f| !should_skip_file(f))
        .collect();
    impact.added_files = changes
        .added_files()
        .into_iter()
        .filter(|f| !should_skip_file(f))
        .collect();
    impact.deleted_files = changes
        .deleted_files()
        .into_iter()
        .filter(|f| !should_skip_file(f))
        .collect();

    map_changes_to_components(&mut impact, manifest);

    if let Some(static_analysis) = static_analysis {
        check_cross_boundary_impact(&mut impact, manifest, static_analysis);
    }

    determine_action(&mut impact, manifest, config);
    impact
}

/// Map changed files to their owning components. Components with modified or
/// deleted files are flagged for potential re-expansion, because code edits
/// shift static-analysis nodes; the patch-vs-reexpand decision is made at
/// execution time when the sub-analysis can be inspected.
fn map_changes_to_components(impact: &mut ChangeImpact, manifest: &AnalysisManifest) {
    let mut structural: BTreeSet<String> = BTreeSet::new();

    // Renames resolve through the OLD path.
    for (old_path, new_path) in &impact.renames {
        match manifest.get_component_for_file(old_path) {
            Some(component) => {
                impact.dirty_components.insert(component.to_string());
            }
            None => impact.unassigned_files.push(new_path.clone()),
        }
    }

    for file_path in &impact.modified_files {
        if let Some(component) = manifest.get_component_for_file(file_path) {
            impact.dirty_components.insert(component.to_string());
            structural.insert(component.to_string());
        }
        // Modified files not in the manifest were never tracked; ignore.
    }

    // Additions are assigned later by the file manager.
    for file_path in &impact.added_files {
        impact.unassigned_files.push(file_path.clone());
    }

    for file_path in &impact.deleted_files {
        if let Some(component) = manifest.get_component_for_file(file_path) {
            impact.dirty_components.insert(component.to_string());
            structural.insert(component.to_string());
        }
    }

    impact.components_needing_reexpansion = structural;
}

/// Record modified files whose call-graph edges reach into other components.
fn check_cross_boundary_impact(
    impact: &mut ChangeImpact,
    manifest: &AnalysisManifest,
    static_analysis: &StaticAnalysis,
) {
    for language in static_analysis.get_languages() {
        let Ok(cfg) = static_analysis.get_cfg(&language) else {
            continue;
        };
        for file_path in &impact.modified_files {
            if impact.cross_boundary_changes.contains(file_path) {
                continue;
            }
            if file_has_cross_boundary_refs(file_path, manifest, cfg) {
                impact.cross_boundary_changes.push(file_path.clone());
                impact.architecture_dirty = true;
            }
        }
    }
}

fn file_has_cross_boundary_refs(
    file_path: &str,
    manifest: &AnalysisManifest,
    cfg: &codeboard_static::CallGraph,
) -> bool {
    let Some(owning_component) = manifest.get_component_for_file(file_path) else {
        return false;
    };

    let file_nodes: BTreeSet<&str> = cfg
        .nodes_in_file(file_path)
        .into_iter()
        .map(|n| n.qualified_name.as_str())
        .collect();
    if file_nodes.is_empty() {
        return false;
    }

    for (src, dst) in cfg.edges() {
        let other = if file_nodes.contains(src) {
            dst
        } else if file_nodes.contains(dst) {
            src
        } else {
            continue;
        };
        let Some(other_node) = cfg.node(other) else {
            continue;
        };
        if let Some(other_component) = manifest.get_component_for_file(&other_node.file_path) {
            if other_component != owning_component {
                debug!(
                    "cross-boundary edge: {file_path} ({owning_component}) <-> {} ({other_component})",
                    other_node.file_path
                );
                return true;
            }
        }
    }
    false
}

/// Pick the coarsest correct action; first match wins.
fn determine_action(
    impact: &mut ChangeImpact,
    manifest: &AnalysisManifest,
    config: &IncrementalConfig,
) {
    if !impact.has_any_changes() {
        impact.action = UpdateAction::None;
        impact.reason = "No changes detected".to_string();
        return;
    }

    if !impact.renames.is_empty()
        && impact.modified_files.is_empty()
        && impact.added_files.is_empty()
        && impact.deleted_files.is_empty()
    {
        impact.action = UpdateAction::PatchPaths;
        impact.reason = format!("Pure rename: {} file(s)", impact.renames.len());
        return;
    }

    let total_files = manifest.file_to_component.len();
    let structural_count = impact.added_files.len() + impact.deleted_files.len();
    if total_files > 0
        && structural_count as f64 / total_files as f64 > config.structural_change_threshold
    {
        impact.action = UpdateAction::FullReanalysis;
        impact.reason = format!(
            "Structural changes exceed threshold: {structural_count}/{total_files} files"
        );
        return;
    }

    if impact.dirty_components.len() > config.max_dirty_components {
        impact.action = UpdateAction::UpdateArchitecture;
        impact.reason = format!(
            "Too many affected components: {}",
            impact.dirty_components.len()
        );
        return;
    }

    if impact.architecture_dirty {
        impact.action = UpdateAction::UpdateArchitecture;
        impact.reason = format!(
            "Cross-boundary changes in: {:?}",
            impact.cross_boundary_changes
        );
        return;
    }

    if !impact.dirty_components.is_empty() {
        impact.action = UpdateAction::UpdateComponents;
        impact.reason = format!("Update components: {:?}", impact.dirty_components);
        return;
    }

    impact.action = UpdateAction::FullReanalysis;
    impact.reason = "Unable to determine minimal update path".to_string();
}

/// Restrict a change set to files inside a scope. A change is in scope when
/// its path is a scoped file or its parent directory holds one, which catches
/// added files landing next to existing scoped files.
pub fn filter_changes_for_scope(changes: &ChangeSet, scope_files: &BTreeSet<String>) -> ChangeSet {
    if changes.is_empty() || scope_files.is_empty() {
        return ChangeSet::default();
    }

    let scope_dirs: BTreeSet<String> = scope_files
        .iter()
        .map(|f| parent_dir(f))
        .collect();
    let in_scope = |path: &str| -> bool {
        scope_files.contains(path) || scope_dirs.contains(&parent_dir(path))
    };

    let scoped = changes
        .changes
        .iter()
        .filter(|change| {
            if change.kind == ChangeKind::Renamed {
                let old = change.old_path.as_deref().unwrap_or("");
                in_scope(&change.file_path) || in_scope(old)
            } else {
                in_scope(&change.file_path)
            }
        })
        .cloned()
        .collect();

    ChangeSet {
        changes: scoped,
        base_ref: changes.base_ref.clone(),
        target_ref: changes.target_ref.clone(),
    }
}

fn parent_dir(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}
