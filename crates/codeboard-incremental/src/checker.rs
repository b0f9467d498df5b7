use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use codeboard_core::AnalysisInsights;
use codeboard_store::{AnalysisManifest, AnalysisStore};

use crate::impact::ChangeImpact;

/// The key a component's sub-analysis is stored under: its id when the loaded
/// analysis knows it, otherwise the name itself.
pub fn component_store_key(analysis: Option<&AnalysisInsights>, component_name: &str) -> String {
    analysis
        .and_then(|a| a.find_component(component_name))
        .filter(|c| !c.component_id.is_empty())
        .map(|c| c.component_id.clone())
        .unwrap_or_else(|| component_name.to_string())
}

/// True when a component has a materialized sub-analysis: listed in the
/// manifest, or present in the unified store.
pub fn is_expanded_component(
    component_name: &str,
    manifest: Option<&AnalysisManifest>,
    store: &AnalysisStore,
) -> bool {
    if let Some(manifest) = manifest {
        if manifest
            .expanded_components
            .iter()
            .any(|c| c == component_name)
        {
            return true;
        }
    }
    store
        .read_sub(component_name)
        .ok()
        .flatten()
        .is_some()
}

/// True iff the component's structural changes are purely file renames: every
/// deletion is the old side of a rename and every modification is the new
/// side. This distinguishes "the file moved" from "the file's content changed".
pub fn component_has_only_renames(
    component_name: &str,
    manifest: Option<&AnalysisManifest>,
    impact: Option<&ChangeImpact>,
) -> bool {
    let (Some(manifest), Some(impact)) = (manifest, impact) else {
        return false;
    };

    let component_files: BTreeSet<String> = manifest
        .get_files_for_component(component_name)
        .into_iter()
        .collect();

    only_renames_over(component_name, &component_files, impact)
}

/// The only-renames test evaluated over the files recorded inside a
/// sub-analysis rather than the manifest.
pub fn subcomponent_has_only_renames(
    component_name: &str,
    sub_analysis: &AnalysisInsights,
    impact: Option<&ChangeImpact>,
) -> bool {
    let Some(impact) = impact else {
        return false;
    };

    let subcomponent_files: BTreeSet<String> = sub_analysis
        .components
        .iter()
        .flat_map(|c| c.assigned_files.iter().cloned())
        .collect();

    only_renames_over(component_name, &subcomponent_files, impact)
}

fn only_renames_over(
    component_name: &str,
    files: &BTreeSet<String>,
    impact: &ChangeImpact,
) -> bool {
    let deleted_in_scope: BTreeSet<&String> = impact
        .deleted_files
        .iter()
        .filter(|f| files.contains(*f))
        .collect();
    let modified_in_scope: BTreeSet<&String> = impact
        .modified_files
        .iter()
        .filter(|f| files.contains(*f))
        .collect();
    let renames_in_scope: BTreeMap<&String, &String> = impact
        .renames
        .iter()
        .filter(|(old, new)| files.contains(*old) || files.contains(*new))
        .collect();

    debug!(
        "component `{component_name}` change analysis: deleted={deleted_in_scope:?}, \
         modified={modified_in_scope:?}, renames={renames_in_scope:?}"
    );

    // Nothing structural at all is not "only renames", it is nothing.
    if deleted_in_scope.is_empty() && modified_in_scope.is_empty() {
        return false;
    }

    let deleted_are_renames = deleted_in_scope
        .iter()
        .all(|f| renames_in_scope.contains_key(*f));
    let modified_are_renames = modified_in_scope
        .iter()
        .all(|f| renames_in_scope.values().any(|new| new == f));

    deleted_are_renames && modified_are_renames
}

/// True iff a component's sub-analysis can be brought up to date without any
/// collaborator call: the sub-analysis exists, the component is still in the
/// analysis, and no file inside the sub-analysis was deleted. Additions are
/// fine because they go through targeted classification instead.
pub fn can_patch_sub_analysis(
    component_name: &str,
    manifest: Option<&AnalysisManifest>,
    impact: Option<&ChangeImpact>,
    store: &AnalysisStore,
    analysis: Option<&AnalysisInsights>,
) -> bool {
    let (Some(_), Some(analysis)) = (manifest, analysis) else {
        return false;
    };
    if analysis.find_component(component_name).is_none() {
        return false;
    }

    let key = component_store_key(Some(analysis), component_name);
    let Ok(Some(sub_analysis)) = store.read_sub(&key) else {
        return false;
    };

    let subcomponent_files: BTreeSet<String> = sub_analysis
        .components
        .iter()
        .flat_map(|c| c.assigned_files.iter().cloned())
        .collect();

    let has_deletions = impact.is_some_and(|impact| {
        impact
            .deleted_files
            .iter()
            .any(|f| subcomponent_files.contains(f))
    });
    if has_deletions {
        info!("component `{component_name}` has deletions, needs re-expansion");
        return false;
    }
    true
}
