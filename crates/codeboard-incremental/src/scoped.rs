use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use codeboard_core::config::IncrementalConfig;
use codeboard_core::AnalysisInsights;
use codeboard_static::StaticAnalysis;
use codeboard_store::{AnalysisManifest, AnalysisStore};

use crate::changes::ChangeSet;
use crate::checker::component_store_key;
use crate::collab::{sanitize_collaborator_output, ComponentExpander};
use crate::impact::{analyze_impact, filter_changes_for_scope, ChangeImpact, UpdateAction};
use crate::patch::patch_sub_analysis;

/// A manifest view restricted to one component's files, sharing the real
/// manifest's commit and hash.
fn scoped_manifest_for(
    manifest: &AnalysisManifest,
    component_name: &str,
    component_files: &BTreeSet<String>,
) -> AnalysisManifest {
    let mut scoped = AnalysisManifest::new(
        manifest.repo_state_hash.clone(),
        manifest.base_commit.clone(),
    );
    scoped.expanded_components = vec![component_name.to_string()];
    for file in component_files {
        scoped.add_file(file, component_name);
    }
    scoped
}

/// Run the impact pipeline inside each expanded component's scope. Only
/// components actually touched by the change set get an entry.
pub fn analyze_expanded_component_impacts(
    changes: &ChangeSet,
    manifest: &AnalysisManifest,
    static_analysis: Option<&StaticAnalysis>,
    config: &IncrementalConfig,
) -> BTreeMap<String, ChangeImpact> {
    let mut component_impacts = BTreeMap::new();

    for component_name in &manifest.expanded_components {
        let component_files: BTreeSet<String> = manifest
            .get_files_for_component(component_name)
            .into_iter()
            .collect();
        if component_files.is_empty() {
            continue;
        }

        let scoped_changes = filter_changes_for_scope(changes, &component_files);
        if scoped_changes.is_empty() {
            continue;
        }

        let scoped_manifest = scoped_manifest_for(manifest, component_name, &component_files);
        component_impacts.insert(
            component_name.clone(),
            analyze_impact(&scoped_changes, &scoped_manifest, static_analysis, config),
        );
    }

    component_impacts
}

/// Apply a scoped impact to one expanded component's sub-analysis: patch paths
/// first, then re-run the details collaborator when the scoped action calls
/// for a component update. This is the recursive step that updates
/// sub-analyses with the same logic as the root.
#[allow(clippy::too_many_arguments)]
pub fn handle_scoped_component_update(
    component_name: &str,
    impact: &ChangeImpact,
    changes: &ChangeSet,
    analysis: &mut AnalysisInsights,
    manifest: &mut AnalysisManifest,
    store: &AnalysisStore,
    static_analysis: Option<&StaticAnalysis>,
    expander: Option<&dyn ComponentExpander>,
    config: &IncrementalConfig,
) -> anyhow::Result<()> {
    let key = component_store_key(Some(analysis), component_name);
    let Ok(Some(mut sub_analysis)) = store.read_sub(&key) else {
        return Ok(());
    };

    // Always patch renames and deletions at this scope first.
    let changed = patch_sub_analysis(&mut sub_analysis, &impact.deleted_files, &impact.renames);

    if impact.action == UpdateAction::PatchPaths {
        if changed {
            store.write_sub(&sub_analysis, &key, Some(&manifest.expanded_components))?;
        }
        return Ok(());
    }
    if impact.action != UpdateAction::UpdateComponents {
        return Ok(());
    }

    // Re-check inside the component scope with fresh inputs.
    let component_files: BTreeSet<String> = manifest
        .get_files_for_component(component_name)
        .into_iter()
        .collect();
    let scoped_manifest = scoped_manifest_for(manifest, component_name, &component_files);
    let scoped_changes = filter_changes_for_scope(changes, &component_files);
    let scoped_impact = analyze_impact(&scoped_changes, &scoped_manifest, static_analysis, config);

    match scoped_impact.action {
        UpdateAction::None | UpdateAction::PatchPaths => {
            if changed {
                store.write_sub(&sub_analysis, &key, Some(&manifest.expanded_components))?;
            }
            return Ok(());
        }
        _ => {}
    }

    let Some(expander) = expander else {
        info!("no details collaborator available for scoped re-expansion; skipping");
        return Ok(());
    };
    let Some(component) = analysis.find_component(component_name).cloned() else {
        return Ok(());
    };

    let (mut refreshed, _clusters) = expander.expand(&component)?;
    sanitize_collaborator_output(&mut refreshed);
    store.write_sub(&refreshed, &key, Some(&manifest.expanded_components))?;

    // Fold any new file assignments from the refreshed sub-analysis back into
    // the manifest and the parent component.
    let mut new_files: BTreeSet<String> = BTreeSet::new();
    for sub_component in &refreshed.components {
        for file in &sub_component.assigned_files {
            new_files.insert(file.clone());
            manifest.add_file(file, component_name);
        }
    }
    if let Some(parent) = analysis.find_component_mut(component_name) {
        for file in &new_files {
            if !parent.assigned_files.contains(file) {
                parent.assigned_files.push(file.clone());
            }
        }
    }

    store.write(
        analysis,
        &manifest.expanded_components,
        None,
        "",
        None,
    )?;
    manifest.save(store.output_dir())?;
    Ok(())
}

/// Apply scoped impacts to every changed expanded component, logging a
/// per-component summary.
#[allow(clippy::too_many_arguments)]
pub fn run_scoped_component_impacts(
    components: &BTreeSet<String>,
    component_impacts: &BTreeMap<String, ChangeImpact>,
    changes: &ChangeSet,
    analysis: &mut AnalysisInsights,
    manifest: &mut AnalysisManifest,
    store: &AnalysisStore,
    static_analysis: Option<&StaticAnalysis>,
    expander: Option<&dyn ComponentExpander>,
    config: &IncrementalConfig,
) {
    if components.is_empty() || component_impacts.is_empty() {
        return;
    }

    for component_name in components {
        let Some(impact) = component_impacts.get(component_name) else {
            continue;
        };
        info!(
            "[scoped impact] component `{component_name}` -> action={} dirty={} added={} deleted={}",
            impact.action,
            impact.dirty_components.len(),
            impact.added_files.len(),
            impact.deleted_files.len()
        );

        if matches!(
            impact.action,
            UpdateAction::UpdateComponents | UpdateAction::PatchPaths
        ) {
            if let Err(e) = handle_scoped_component_update(
                component_name,
                impact,
                changes,
                analysis,
                manifest,
                store,
                static_analysis,
                expander,
                config,
            ) {
                warn!("scoped update failed for `{component_name}`: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{ChangeKind, DetectedChange};
    use codeboard_core::{Component, ROOT_PARENT_ID};

    fn change(kind: ChangeKind, path: &str) -> DetectedChange {
        DetectedChange {
            kind,
            file_path: path.to_string(),
            old_path: None,
            similarity: None,
        }
    }

    fn rename(old: &str, new: &str) -> DetectedChange {
        DetectedChange {
            kind: ChangeKind::Renamed,
            file_path: new.to_string(),
            old_path: Some(old.to_string()),
            similarity: Some(100),
        }
    }

    fn manifest_with_expanded() -> AnalysisManifest {
        let mut manifest = AnalysisManifest::new("h", "c");
        manifest.add_file("a/x.py", "CompA");
        manifest.add_file("a/y.py", "CompA");
        manifest.add_file("b/z.py", "CompB");
        manifest.expanded_components = vec!["CompA".to_string()];
        manifest
    }

    #[test]
    fn test_scoped_impacts_only_cover_touched_components() {
        let manifest = manifest_with_expanded();
        let changes = ChangeSet {
            changes: vec![change(ChangeKind::Modified, "a/x.py")],
            base_ref: "c".to_string(),
            target_ref: String::new(),
        };

        let impacts = analyze_expanded_component_impacts(
            &changes,
            &manifest,
            None,
            &IncrementalConfig::default(),
        );

        assert_eq!(impacts.len(), 1);
        let impact = &impacts["CompA"];
        assert_eq!(impact.action, UpdateAction::UpdateComponents);
        assert!(impact.dirty_components.contains("CompA"));
    }

    #[test]
    fn test_untouched_expanded_component_has_no_entry() {
        let manifest = manifest_with_expanded();
        let changes = ChangeSet {
            changes: vec![change(ChangeKind::Modified, "b/z.py")],
            base_ref: "c".to_string(),
            target_ref: String::new(),
        };

        let impacts = analyze_expanded_component_impacts(
            &changes,
            &manifest,
            None,
            &IncrementalConfig::default(),
        );
        // CompB is not expanded; CompA is untouched.
        assert!(impacts.is_empty());
    }

    #[test]
    fn test_scoped_rename_patches_sub_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalysisStore::new(dir.path()).unwrap();

        let mut comp_a = Component::new(ROOT_PARENT_ID, "CompA", "A", Some(0));
        comp_a.assigned_files = vec!["a/x.py".to_string(), "a/y.py".to_string()];
        let mut analysis = AnalysisInsights {
            description: "root".to_string(),
            components: vec![comp_a],
            components_relations: vec![],
        };
        let comp_a_id = analysis.components[0].component_id.clone();
        store.write(&analysis, &[], None, "demo", None).unwrap();

        let mut inner = Component::new(&comp_a_id, "Inner", "inner", Some(0));
        inner.assigned_files = vec!["a/x.py".to_string()];
        let sub = AnalysisInsights {
            description: "sub".to_string(),
            components: vec![inner],
            components_relations: vec![],
        };
        store.write_sub(&sub, &comp_a_id, None).unwrap();

        let mut manifest = manifest_with_expanded();
        let changes = ChangeSet {
            changes: vec![rename("a/x.py", "a/x2.py")],
            base_ref: "c".to_string(),
            target_ref: String::new(),
        };
        let config = IncrementalConfig::default();
        let impacts = analyze_expanded_component_impacts(&changes, &manifest, None, &config);
        let impact = impacts["CompA"].clone();
        assert_eq!(impact.action, UpdateAction::PatchPaths);

        handle_scoped_component_update(
            "CompA",
            &impact,
            &changes,
            &mut analysis,
            &mut manifest,
            &store,
            None,
            None,
            &config,
        )
        .unwrap();

        let patched = store.read_sub(&comp_a_id).unwrap().unwrap();
        assert_eq!(patched.components[0].assigned_files, vec!["a/x2.py"]);
    }
}
