//! Concurrent writers to one analysis.json must not lose each other's changes.
//!
//! Each thread gets its own `AnalysisStore` instance (and thus its own
//! in-memory cache), matching the real scenario where every partial-component
//! invocation is a separate process coordinating only through the file lock.

use std::sync::Barrier;

use codeboard_core::{AnalysisInsights, Component, Relation, SourceCodeReference, ROOT_PARENT_ID};
use codeboard_store::AnalysisStore;

fn root_analysis() -> AnalysisInsights {
    let names = ["ComponentB", "ComponentC", "ComponentD"];
    let components = names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let mut component =
                Component::new(ROOT_PARENT_ID, *name, format!("{name} does things"), Some(index));
            component.assigned_files = vec![format!("src/module_{}.py", name.to_lowercase())];
            component.key_entities = vec![SourceCodeReference {
                qualified_name: format!("module.{name}"),
                reference_file: Some(format!("src/module_{}.py", name.to_lowercase())),
                reference_start_line: Some(1),
                reference_end_line: Some(20),
            }];
            component
        })
        .collect();

    AnalysisInsights {
        description: "Test project".to_string(),
        components,
        components_relations: vec![Relation {
            relation: "calls".to_string(),
            src_name: "ComponentB".to_string(),
            dst_name: "ComponentC".to_string(),
        }],
    }
}

fn make_sub_analysis(parent: &Component) -> AnalysisInsights {
    AnalysisInsights {
        description: format!("Sub-analysis for {}", parent.name),
        components: vec![Component::new(
            &parent.component_id,
            format!("{}_Sub1", parent.name),
            format!("First sub-component of {}", parent.name),
            Some(0),
        )],
        components_relations: vec![],
    }
}

#[test]
fn parallel_write_sub_preserves_all_sub_analyses() {
    let dir = tempfile::tempdir().unwrap();
    let setup_store = AnalysisStore::new(dir.path()).unwrap();
    let analysis = root_analysis();
    let expandable: Vec<String> = analysis
        .components
        .iter()
        .map(|c| c.component_id.clone())
        .collect();
    setup_store
        .write(&analysis, &expandable, None, "test-repo", None)
        .unwrap();

    // Spawn one writer per component; a barrier maximizes lock contention.
    let barrier = Barrier::new(analysis.components.len());
    std::thread::scope(|scope| {
        for component in &analysis.components {
            let barrier = &barrier;
            let output_dir = dir.path().to_path_buf();
            scope.spawn(move || {
                let store = AnalysisStore::new(&output_dir).unwrap();
                let sub = make_sub_analysis(component);
                barrier.wait();
                store
                    .write_sub(&sub, &component.component_id, None)
                    .unwrap();
            });
        }
    });

    // All three sub-analyses must be present afterwards.
    let reader = AnalysisStore::new(dir.path()).unwrap();
    for component in &analysis.components {
        let sub = reader
            .read_sub(&component.component_id)
            .unwrap()
            .unwrap_or_else(|| panic!("lost sub-analysis for {}", component.name));
        let sub_names: Vec<&str> = sub.components.iter().map(|c| c.name.as_str()).collect();
        assert!(sub_names.contains(&format!("{}_Sub1", component.name).as_str()));
    }

    // Root metadata and component order survive the concurrent rewrites.
    let (root, _, raw) = reader.read().unwrap().unwrap();
    assert_eq!(raw["metadata"]["repo_name"], "test-repo");
    assert_eq!(
        root.components
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>(),
        vec!["ComponentB", "ComponentC", "ComponentD"],
    );
    assert_eq!(root.components_relations.len(), 1);
}
