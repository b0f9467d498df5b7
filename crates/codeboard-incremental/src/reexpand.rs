use std::collections::BTreeSet;

use rayon::prelude::*;
use tracing::{error, info, warn};

use codeboard_core::AnalysisInsights;
use codeboard_store::{AnalysisManifest, AnalysisStore};

use crate::checker::{component_store_key, subcomponent_has_only_renames};
use crate::collab::{sanitize_collaborator_output, ComponentExpander};
use crate::impact::ChangeImpact;
use crate::patch::patch_sub_analysis;

/// Everything a re-expansion worker needs, shared read-only across the pool.
pub struct ReexpansionContext<'a> {
    pub analysis: &'a AnalysisInsights,
    pub manifest: &'a AnalysisManifest,
    pub store: &'a AnalysisStore,
    pub impact: Option<&'a ChangeImpact>,
}

/// Rebuild one component's sub-analysis, preferring a data-only patch when the
/// changes inside it are pure renames. Returns the component name on success.
fn reexpand_single_component(
    component_name: &str,
    expander: &dyn ComponentExpander,
    context: &ReexpansionContext<'_>,
) -> Option<String> {
    let Some(component) = context.analysis.find_component(component_name) else {
        warn!("component `{component_name}` not found for re-expansion");
        return None;
    };
    let key = component_store_key(Some(context.analysis), component_name);

    // Patch instead of rebuild when the existing sub-analysis only moved files.
    if let Ok(Some(mut existing)) = context.store.read_sub(&key) {
        if subcomponent_has_only_renames(component_name, &existing, context.impact) {
            info!(
                "component `{component_name}` sub-analysis has only renames, patching instead of re-expanding"
            );
            let impact = context.impact.expect("impact present for only-renames");
            if patch_sub_analysis(&mut existing, &impact.deleted_files, &impact.renames) {
                if let Err(e) = context.store.write_sub(
                    &existing,
                    &key,
                    Some(&context.manifest.expanded_components),
                ) {
                    error!("failed to persist patched sub-analysis for `{component_name}`: {e}");
                    return None;
                }
                info!("patched component `{component_name}` sub-analysis");
                return Some(component_name.to_string());
            }
        }
    }

    info!("re-expanding component: {component_name}");
    let (mut sub_analysis, _clusters) = match expander.expand(component) {
        Ok(result) => result,
        Err(e) => {
            error!("failed to re-expand component `{component_name}`: {e}");
            return None;
        }
    };
    sanitize_collaborator_output(&mut sub_analysis);

    if let Err(e) =
        context
            .store
            .write_sub(&sub_analysis, &key, Some(&context.manifest.expanded_components))
    {
        error!("failed to persist sub-analysis for `{component_name}`: {e}");
        return None;
    }
    info!("re-expanded component `{component_name}`");
    Some(component_name.to_string())
}

/// Re-run the details collaborator for the given components on a bounded
/// worker pool. A failure in one worker never aborts the others; the returned
/// list holds the components that succeeded.
pub fn reexpand_components(
    component_names: &BTreeSet<String>,
    expander: &dyn ComponentExpander,
    context: &ReexpansionContext<'_>,
    max_workers: usize,
) -> Vec<String> {
    if component_names.is_empty() {
        return Vec::new();
    }
    info!(
        "re-expanding {} components: {component_names:?}",
        component_names.len()
    );

    let workers = num_cpus::get().min(max_workers.max(1));
    let pool = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool,
        Err(e) => {
            error!("failed to build re-expansion pool: {e}");
            return Vec::new();
        }
    };

    let mut reexpanded: Vec<String> = pool.install(|| {
        component_names
            .par_iter()
            .filter_map(|name| reexpand_single_component(name, expander, context))
            .collect()
    });
    reexpanded.sort();

    info!(
        "successfully re-expanded {}/{} components",
        reexpanded.len(),
        component_names.len()
    );
    reexpanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeboard_core::{Component, ROOT_PARENT_ID};
    use codeboard_static::ClusterResult;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExpander {
        calls: AtomicUsize,
        fail_for: Option<String>,
    }

    impl CountingExpander {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_for: None,
            }
        }
    }

    impl ComponentExpander for CountingExpander {
        fn expand(
            &self,
            component: &Component,
        ) -> anyhow::Result<(AnalysisInsights, BTreeMap<String, ClusterResult>)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_for.as_deref() == Some(component.name.as_str()) {
                anyhow::bail!("expansion failed");
            }
            Ok((
                AnalysisInsights {
                    description: format!("Fresh sub-analysis for {}", component.name),
                    components: vec![Component::new(
                        &component.component_id,
                        format!("{}_Inner", component.name),
                        "inner",
                        Some(0),
                    )],
                    components_relations: vec![],
                },
                BTreeMap::new(),
            ))
        }
    }

    fn setup(dir: &std::path::Path) -> (AnalysisInsights, AnalysisManifest, AnalysisStore) {
        let mut comp_a = Component::new(ROOT_PARENT_ID, "CompA", "A", Some(0));
        comp_a.assigned_files = vec!["a/x.py".to_string()];
        let mut comp_b = Component::new(ROOT_PARENT_ID, "CompB", "B", Some(1));
        comp_b.assigned_files = vec!["b/y.py".to_string()];
        let analysis = AnalysisInsights {
            description: "root".to_string(),
            components: vec![comp_a, comp_b],
            components_relations: vec![],
        };
        let mut manifest = AnalysisManifest::from_analysis(&analysis, "h", "c", vec![]);
        manifest.expanded_components = vec!["CompA".to_string(), "CompB".to_string()];

        let store = AnalysisStore::new(dir).unwrap();
        store.write(&analysis, &[], None, "demo", None).unwrap();
        (analysis, manifest, store)
    }

    #[test]
    fn test_reexpands_components_in_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let (analysis, manifest, store) = setup(dir.path());
        let expander = CountingExpander::new();
        let context = ReexpansionContext {
            analysis: &analysis,
            manifest: &manifest,
            store: &store,
            impact: None,
        };

        let names = BTreeSet::from(["CompA".to_string(), "CompB".to_string()]);
        let done = reexpand_components(&names, &expander, &context, 8);

        assert_eq!(done, vec!["CompA".to_string(), "CompB".to_string()]);
        assert_eq!(expander.calls.load(Ordering::SeqCst), 2);
        let sub = store
            .read_sub(&analysis.components[0].component_id)
            .unwrap()
            .expect("sub persisted");
        assert_eq!(sub.components[0].name, "CompA_Inner");
    }

    #[test]
    fn test_one_failure_does_not_abort_others() {
        let dir = tempfile::tempdir().unwrap();
        let (analysis, manifest, store) = setup(dir.path());
        let expander = CountingExpander {
            calls: AtomicUsize::new(0),
            fail_for: Some("CompA".to_string()),
        };
        let context = ReexpansionContext {
            analysis: &analysis,
            manifest: &manifest,
            store: &store,
            impact: None,
        };

        let names = BTreeSet::from(["CompA".to_string(), "CompB".to_string()]);
        let done = reexpand_components(&names, &expander, &context, 2);

        assert_eq!(done, vec!["CompB".to_string()]);
        assert_eq!(expander.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_component_is_skipped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let (analysis, manifest, store) = setup(dir.path());
        let expander = CountingExpander::new();
        let context = ReexpansionContext {
            analysis: &analysis,
            manifest: &manifest,
            store: &store,
            impact: None,
        };

        let names = BTreeSet::from(["Ghost".to_string()]);
        let done = reexpand_components(&names, &expander, &context, 2);
        assert!(done.is_empty());
        assert_eq!(expander.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_only_renames_patches_without_collaborator_call() {
        let dir = tempfile::tempdir().unwrap();
        let (analysis, manifest, store) = setup(dir.path());

        // Materialize an existing sub-analysis holding the renamed file.
        let comp_a_id = analysis.components[0].component_id.clone();
        let mut inner = Component::new(&comp_a_id, "CompA_Inner", "inner", Some(0));
        inner.assigned_files = vec!["a/x.py".to_string()];
        let sub = AnalysisInsights {
            description: "existing".to_string(),
            components: vec![inner],
            components_relations: vec![],
        };
        store.write_sub(&sub, &comp_a_id, None).unwrap();

        let impact = ChangeImpact {
            renames: BTreeMap::from([("a/x.py".to_string(), "a/z.py".to_string())]),
            deleted_files: vec!["a/x.py".to_string()],
            ..Default::default()
        };
        let expander = CountingExpander::new();
        let context = ReexpansionContext {
            analysis: &analysis,
            manifest: &manifest,
            store: &store,
            impact: Some(&impact),
        };

        let names = BTreeSet::from(["CompA".to_string()]);
        let done = reexpand_components(&names, &expander, &context, 2);

        assert_eq!(done, vec!["CompA".to_string()]);
        assert_eq!(expander.calls.load(Ordering::SeqCst), 0, "no collaborator call");
        let patched = store.read_sub(&comp_a_id).unwrap().unwrap();
        assert_eq!(patched.components[0].assigned_files, vec!["a/z.py"]);
    }
}
