use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use tracing::{debug, info, warn};

use codeboard_core::{should_skip_file, AnalysisInsights, Component};
use codeboard_static::{ClusterResult, StaticAnalysis};
use codeboard_store::{AnalysisManifest, AnalysisStore};

use crate::checker::component_store_key;
use crate::collab::NewFileClassifier;

fn parent_dir(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Assign new files to components by directory affinity: each file goes to the
/// component owning the most files in the same directory. Files with no match
/// stay unassigned and are only logged. Returns the components that received
/// files.
pub fn assign_new_files(
    new_files: &[String],
    analysis: &mut AnalysisInsights,
    manifest: &mut AnalysisManifest,
) -> BTreeSet<String> {
    let mut assigned_count = 0usize;
    let mut skipped_count = 0usize;
    let mut components_with_new_files = BTreeSet::new();

    for file_path in new_files {
        if should_skip_file(file_path) {
            debug!("skipping non-source file: {file_path}");
            skipped_count += 1;
            continue;
        }

        let file_dir = parent_dir(file_path);
        let mut best: Option<(usize, usize)> = None; // (match count, component index)
        for (index, component) in analysis.components.iter().enumerate() {
            let match_count = component
                .assigned_files
                .iter()
                .filter(|f| parent_dir(f) == file_dir)
                .count();
            // Ties break toward the first-seen component.
            if match_count > 0 && best.is_none_or(|(count, _)| match_count > count) {
                best = Some((match_count, index));
            }
        }

        match best {
            Some((_, index)) => {
                let component = &mut analysis.components[index];
                component.assigned_files.push(file_path.clone());
                manifest.add_file(file_path, &component.name);
                components_with_new_files.insert(component.name.clone());
                assigned_count += 1;
                debug!(
                    "assigned new file `{file_path}` to component `{}`",
                    component.name
                );
            }
            None => {
                debug!("could not assign new file `{file_path}` to any component");
            }
        }
    }

    info!("file assignment: {assigned_count} assigned, {skipped_count} skipped (non-source)");
    components_with_new_files
}

/// Strip deleted files from the manifest and from the owning component's
/// assigned files and key entities.
pub fn remove_deleted_files(
    deleted_files: &[String],
    analysis: &mut AnalysisInsights,
    manifest: &mut AnalysisManifest,
) {
    for file_path in deleted_files {
        let Some(component_name) = manifest.remove_file(file_path) else {
            continue;
        };
        if let Some(component) = analysis
            .components
            .iter_mut()
            .find(|c| c.name == component_name)
        {
            component.assigned_files.retain(|f| f != file_path);
            component
                .key_entities
                .retain(|e| e.reference_file.as_deref() != Some(file_path.as_str()));
        }
        info!("removed deleted file `{file_path}` from component `{component_name}`");
    }
}

/// New files that landed inside a specific component, matching loosely on
/// path suffixes to tolerate prefix differences.
pub fn new_files_for_component(
    component_name: &str,
    added_files: &[String],
    analysis: &AnalysisInsights,
) -> Vec<String> {
    let Some(component) = analysis.component_by_name(component_name) else {
        return Vec::new();
    };
    let component_files: BTreeSet<&String> = component.assigned_files.iter().collect();

    added_files
        .iter()
        .filter(|file| {
            component_files.contains(file)
                || component_files
                    .iter()
                    .any(|cf| file.ends_with(*cf) || cf.ends_with(*file))
        })
        .cloned()
        .collect()
}

/// Cluster the component's own call-graph subgraph, per language. This is the
/// scoped view handed to the classifier collaborator.
pub fn component_cluster_results(
    component: &Component,
    static_analysis: &StaticAnalysis,
) -> BTreeMap<String, ClusterResult> {
    let mut cluster_results = BTreeMap::new();
    if component.assigned_files.is_empty() {
        return cluster_results;
    }
    let assigned: HashSet<String> = component.assigned_files.iter().cloned().collect();

    for language in static_analysis.get_languages() {
        let Ok(cfg) = static_analysis.get_cfg(&language) else {
            continue;
        };
        let sub_cfg = cfg.filter_by_files(&assigned);
        if sub_cfg.node_count() > 0 {
            cluster_results.insert(language, sub_cfg.cluster());
        }
    }
    cluster_results
}

/// Targeted re-classification: fold new files into an already-expanded
/// component by invoking the classifier collaborator on the component's
/// cluster subgraph, then persist the updated sub-analysis. Far cheaper than a
/// full re-expansion. Returns true on success.
#[allow(clippy::too_many_arguments)]
pub fn classify_new_files_in_component(
    component_name: &str,
    new_files: &[String],
    analysis: &AnalysisInsights,
    manifest: &AnalysisManifest,
    store: &AnalysisStore,
    static_analysis: &StaticAnalysis,
    classifier: &dyn NewFileClassifier,
) -> bool {
    let Some(component) = analysis.component_by_name(component_name) else {
        warn!("component `{component_name}` not found for new file classification");
        return false;
    };

    let key = component_store_key(Some(analysis), component_name);
    let Ok(Some(mut sub_analysis)) = store.read_sub(&key) else {
        warn!("no sub-analysis found for component `{component_name}`, cannot classify new files");
        return false;
    };

    info!(
        "running targeted file classification for {} new files in `{component_name}`",
        new_files.len()
    );

    let cluster_results = component_cluster_results(component, static_analysis);
    if cluster_results.is_empty() {
        warn!(
            "could not create cluster results for `{component_name}`, skipping targeted classification"
        );
        return false;
    }

    let scope_files: Vec<String> = component.assigned_files.clone();
    if let Err(e) = classifier.classify_files(&mut sub_analysis, &cluster_results, &scope_files) {
        warn!("failed to classify new files in `{component_name}`: {e}");
        return false;
    }

    match store.write_sub(&sub_analysis, &key, Some(&manifest.expanded_components)) {
        Ok(_) => true,
        Err(e) => {
            warn!("failed to persist classified sub-analysis for `{component_name}`: {e}");
            false
        }
    }
}
