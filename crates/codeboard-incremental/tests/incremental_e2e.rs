//! End-to-end incremental scenarios over throwaway git repositories.
//!
//! Collaborators are mocked and count their invocations, so each scenario can
//! assert the zero-call guarantees: a pure rename needs no collaborator at
//! all, an added file in an expanded component needs exactly one classifier
//! call, and a deletion inside an expanded component needs exactly one
//! re-expansion.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

use codeboard_core::{AnalysisInsights, Component, NodeKind, Relation, ROOT_PARENT_ID};
use codeboard_incremental::{
    get_current_commit, repo_state_hash, ComponentExpander, IncrementalUpdater, NewFileClassifier,
    UpdateAction,
};
use codeboard_static::{CallGraph, ClusterResult, Node, StaticAnalysis};
use codeboard_store::{store_for, AnalysisManifest};

fn run_git(repo_dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn init_repo(repo_dir: &Path) {
    run_git(repo_dir, &["init", "-q"]);
    run_git(repo_dir, &["config", "user.email", "dev@example.com"]);
    run_git(repo_dir, &["config", "user.name", "Dev"]);
}

fn commit_all(repo_dir: &Path, message: &str) -> String {
    run_git(repo_dir, &["add", "-A"]);
    run_git(repo_dir, &["commit", "-q", "-m", message]);
    get_current_commit(repo_dir).expect("commit hash")
}

struct CountingExpander {
    calls: AtomicUsize,
}

impl CountingExpander {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ComponentExpander for CountingExpander {
    fn expand(
        &self,
        component: &Component,
    ) -> anyhow::Result<(AnalysisInsights, BTreeMap<String, ClusterResult>)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = Component::new(
            &component.component_id,
            format!("{} Core", component.name),
            "regenerated",
            Some(0),
        );
        inner.assigned_files = component.assigned_files.clone();
        Ok((
            AnalysisInsights {
                description: format!("Fresh sub-analysis for {}", component.name),
                components: vec![inner],
                components_relations: vec![],
            },
            BTreeMap::new(),
        ))
    }
}

struct CountingClassifier {
    calls: AtomicUsize,
}

impl CountingClassifier {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NewFileClassifier for CountingClassifier {
    fn classify_files(
        &self,
        sub_analysis: &mut AnalysisInsights,
        _cluster_results: &BTreeMap<String, ClusterResult>,
        scope_files: &[String],
    ) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Put every scoped file on the first sub-component, the way the real
        // classifier folds new files into an existing structure.
        if let Some(first) = sub_analysis.components.first_mut() {
            for file in scope_files {
                if !first.assigned_files.contains(file) {
                    first.assigned_files.push(file.clone());
                }
            }
        }
        Ok(())
    }
}

/// Lay down the initial two-component analysis, manifest, and (optionally)
/// sub-analyses for expanded components.
fn seed_initial_state(
    repo_dir: &Path,
    output_dir: &Path,
    comp_a_files: &[&str],
    comp_b_files: &[&str],
    expanded: &[&str],
) -> AnalysisInsights {
    let mut comp_a = Component::new(ROOT_PARENT_ID, "CompA", "Component A", Some(0));
    comp_a.assigned_files = comp_a_files.iter().map(|f| f.to_string()).collect();
    let mut comp_b = Component::new(ROOT_PARENT_ID, "CompB", "Component B", Some(1));
    comp_b.assigned_files = comp_b_files.iter().map(|f| f.to_string()).collect();
    let analysis = AnalysisInsights {
        description: "Seed project".to_string(),
        components: vec![comp_a, comp_b],
        components_relations: vec![Relation {
            relation: "calls".to_string(),
            src_name: "CompA".to_string(),
            dst_name: "CompB".to_string(),
        }],
    };

    let store = store_for(output_dir).unwrap();
    store.write(&analysis, &[], None, "seed-repo", None).unwrap();

    for name in expanded {
        let component = analysis.component_by_name(name).unwrap();
        let mut inner = Component::new(
            &component.component_id,
            format!("{name} Inner"),
            "seeded inner",
            Some(0),
        );
        inner.assigned_files = component.assigned_files.clone();
        let sub = AnalysisInsights {
            description: format!("Sub-analysis for {name}"),
            components: vec![inner],
            components_relations: vec![],
        };
        store.write_sub(&sub, &component.component_id, None).unwrap();
    }

    let manifest = AnalysisManifest::from_analysis(
        &analysis,
        repo_state_hash(repo_dir),
        get_current_commit(repo_dir).unwrap(),
        expanded.iter().map(|s| s.to_string()).collect(),
    );
    manifest.save(output_dir).unwrap();

    analysis
}

fn statics_for_files(files: &[&str]) -> StaticAnalysis {
    let mut cfg = CallGraph::new();
    let mut previous: Option<String> = None;
    for file in files {
        let stem = Path::new(file)
            .file_stem()
            .unwrap()
            .to_string_lossy()
            .to_string();
        let qname = format!("{stem}.run");
        cfg.add_node(Node::new(&qname, NodeKind::Function, *file, 0, 10));
        if let Some(prev) = &previous {
            cfg.add_edge(prev, &qname).unwrap();
        }
        previous = Some(qname);
    }
    let mut statics = StaticAnalysis::new();
    statics.add_references("python", cfg.nodes().cloned().collect());
    statics.add_cfg("python", cfg);
    statics
}

/// Manifest entries must agree with the persisted analysis after every
/// successful run.
fn assert_manifest_matches_analysis(output_dir: &Path) {
    let manifest = AnalysisManifest::load(output_dir).expect("manifest loads");
    let store = store_for(output_dir).unwrap();
    let root = store.read_root().unwrap().expect("root analysis");
    for (file, component_name) in &manifest.file_to_component {
        let component = root
            .component_by_name(component_name)
            .unwrap_or_else(|| panic!("manifest references unknown component {component_name}"));
        assert!(
            component.assigned_files.contains(file),
            "manifest file {file} missing from {component_name} assigned_files"
        );
    }
}

#[test]
fn pure_rename_patches_paths_without_collaborators() {
    let repo = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    init_repo(repo.path());
    std::fs::create_dir_all(repo.path().join("a")).unwrap();
    std::fs::write(repo.path().join("a/x.py"), "def run():\n    return 1\n").unwrap();
    std::fs::write(repo.path().join("a/y.py"), "def other():\n    return 2\n").unwrap();
    commit_all(repo.path(), "initial");

    seed_initial_state(repo.path(), out.path(), &["a/x.py"], &["a/y.py"], &[]);

    run_git(repo.path(), &["mv", "a/x.py", "a/z.py"]);
    let new_commit = commit_all(repo.path(), "rename x to z");

    let expander = CountingExpander::new();
    let classifier = CountingClassifier::new();
    let mut updater = IncrementalUpdater::new(repo.path(), out.path(), None, false)
        .unwrap()
        .with_expander(&expander)
        .with_classifier(&classifier);

    assert!(updater.can_run_incremental());
    let impact = updater.analyze().unwrap();
    assert_eq!(impact.action, UpdateAction::PatchPaths);
    assert!(updater.execute().unwrap());

    let manifest = AnalysisManifest::load(out.path()).unwrap();
    assert_eq!(manifest.get_component_for_file("a/z.py"), Some("CompA"));
    assert_eq!(manifest.get_component_for_file("a/x.py"), None);
    assert_eq!(manifest.get_component_for_file("a/y.py"), Some("CompB"));
    assert_eq!(manifest.base_commit, new_commit);

    let store = store_for(out.path()).unwrap();
    let root = store.read_root().unwrap().unwrap();
    assert_eq!(
        root.component_by_name("CompA").unwrap().assigned_files,
        vec!["a/z.py"]
    );

    assert_eq!(expander.count(), 0, "rename must not call the expander");
    assert_eq!(classifier.count(), 0, "rename must not call the classifier");
    assert_manifest_matches_analysis(out.path());
}

#[test]
fn second_run_with_no_changes_is_a_noop() {
    let repo = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    init_repo(repo.path());
    std::fs::create_dir_all(repo.path().join("a")).unwrap();
    std::fs::write(repo.path().join("a/x.py"), "def run():\n    return 1\n").unwrap();
    commit_all(repo.path(), "initial");

    seed_initial_state(repo.path(), out.path(), &["a/x.py"], &[], &[]);

    let mut updater = IncrementalUpdater::new(repo.path(), out.path(), None, false).unwrap();
    assert!(updater.can_run_incremental());
    let impact = updater.analyze().unwrap();
    assert_eq!(impact.action, UpdateAction::None);
    assert!(updater.execute().unwrap());
}

#[test]
fn modify_in_non_expanded_component_updates_without_collaborators() {
    let repo = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    init_repo(repo.path());
    std::fs::create_dir_all(repo.path().join("a")).unwrap();
    std::fs::write(repo.path().join("a/x.py"), "def run():\n    return 1\n").unwrap();
    std::fs::write(repo.path().join("a/y.py"), "def other():\n    return 2\n").unwrap();
    commit_all(repo.path(), "initial");

    seed_initial_state(repo.path(), out.path(), &["a/x.py"], &["a/y.py"], &[]);

    std::fs::write(repo.path().join("a/x.py"), "def run():\n    return 99\n").unwrap();
    let new_commit = commit_all(repo.path(), "change return value");

    let expander = CountingExpander::new();
    let mut updater = IncrementalUpdater::new(repo.path(), out.path(), None, false)
        .unwrap()
        .with_expander(&expander);

    assert!(updater.can_run_incremental());
    let impact = updater.analyze().unwrap();
    assert_eq!(impact.action, UpdateAction::UpdateComponents);
    assert_eq!(
        impact.dirty_components.iter().collect::<Vec<_>>(),
        vec!["CompA"]
    );
    assert!(updater.execute().unwrap());

    // CompA is not expanded, so nothing was re-expanded.
    assert_eq!(expander.count(), 0);
    let manifest = AnalysisManifest::load(out.path()).unwrap();
    assert_eq!(manifest.base_commit, new_commit);
    let store = store_for(out.path()).unwrap();
    let root = store.read_root().unwrap().unwrap();
    assert_eq!(
        root.component_by_name("CompA").unwrap().assigned_files,
        vec!["a/x.py"]
    );
    assert_manifest_matches_analysis(out.path());
}

#[test]
fn added_file_near_expanded_component_triggers_one_classifier_call() {
    let repo = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    init_repo(repo.path());
    std::fs::create_dir_all(repo.path().join("a")).unwrap();
    std::fs::write(repo.path().join("a/x.py"), "def run():\n    return 1\n").unwrap();
    std::fs::write(repo.path().join("a/x1.py"), "def more():\n    return 4\n").unwrap();
    std::fs::write(repo.path().join("b.py"), "def far():\n    return 0\n").unwrap();
    std::fs::write(repo.path().join("b2.py"), "def far2():\n    return 0\n").unwrap();
    commit_all(repo.path(), "initial");

    seed_initial_state(
        repo.path(),
        out.path(),
        &["a/x.py", "a/x1.py"],
        &["b.py", "b2.py"],
        &["CompA"],
    );

    // A new helper lands next to CompA's files, alongside an edit that makes
    // CompA dirty.
    std::fs::write(repo.path().join("a/new.py"), "def fresh():\n    return 3\n").unwrap();
    std::fs::write(repo.path().join("a/x.py"), "def run():\n    return 11\n").unwrap();
    commit_all(repo.path(), "add helper");

    let statics = statics_for_files(&["a/x.py", "a/x1.py"]);
    let expander = CountingExpander::new();
    let classifier = CountingClassifier::new();
    let mut updater = IncrementalUpdater::new(repo.path(), out.path(), Some(&statics), false)
        .unwrap()
        .with_expander(&expander)
        .with_classifier(&classifier);

    assert!(updater.can_run_incremental());
    let impact = updater.analyze().unwrap();
    assert_eq!(impact.action, UpdateAction::UpdateComponents);
    assert!(updater.execute().unwrap());

    // Targeted classification, no re-expansion.
    assert_eq!(classifier.count(), 1);
    assert_eq!(expander.count(), 0);

    let manifest = AnalysisManifest::load(out.path()).unwrap();
    assert_eq!(manifest.get_component_for_file("a/new.py"), Some("CompA"));

    let store = store_for(out.path()).unwrap();
    let root = store.read_root().unwrap().unwrap();
    let comp_a_id = root.component_by_name("CompA").unwrap().component_id.clone();
    let sub = store.read_sub(&comp_a_id).unwrap().expect("sub-analysis kept");
    assert!(sub.components[0]
        .assigned_files
        .contains(&"a/new.py".to_string()));
    assert_manifest_matches_analysis(out.path());
}

#[test]
fn deleted_file_in_expanded_component_triggers_one_reexpansion() {
    let repo = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    init_repo(repo.path());
    std::fs::create_dir_all(repo.path().join("a")).unwrap();
    std::fs::write(repo.path().join("a/x.py"), "def run():\n    return 1\n").unwrap();
    std::fs::write(repo.path().join("a/x2.py"), "def keep():\n    return 2\n").unwrap();
    std::fs::write(repo.path().join("b.py"), "def far():\n    return 0\n").unwrap();
    std::fs::write(repo.path().join("b2.py"), "def far2():\n    return 0\n").unwrap();
    commit_all(repo.path(), "initial");

    seed_initial_state(
        repo.path(),
        out.path(),
        &["a/x.py", "a/x2.py"],
        &["b.py", "b2.py"],
        &["CompA"],
    );

    run_git(repo.path(), &["rm", "-q", "a/x.py"]);
    commit_all(repo.path(), "drop x");

    let statics = statics_for_files(&["a/x2.py"]);
    let expander = CountingExpander::new();
    let classifier = CountingClassifier::new();
    let mut updater = IncrementalUpdater::new(repo.path(), out.path(), Some(&statics), false)
        .unwrap()
        .with_expander(&expander)
        .with_classifier(&classifier);

    assert!(updater.can_run_incremental());
    let impact = updater.analyze().unwrap();
    assert_eq!(impact.action, UpdateAction::UpdateComponents);
    assert!(impact.components_needing_reexpansion.contains("CompA"));
    assert!(updater.execute().unwrap());

    assert_eq!(expander.count(), 1, "deletion forces one re-expansion");
    assert_eq!(classifier.count(), 0);

    let manifest = AnalysisManifest::load(out.path()).unwrap();
    assert_eq!(manifest.get_component_for_file("a/x.py"), None);

    let store = store_for(out.path()).unwrap();
    let root = store.read_root().unwrap().unwrap();
    let comp_a = root.component_by_name("CompA").unwrap();
    assert_eq!(comp_a.assigned_files, vec!["a/x2.py"]);
    let sub = store
        .read_sub(&comp_a.component_id)
        .unwrap()
        .expect("regenerated sub-analysis");
    assert_eq!(sub.components[0].name, "CompA Core");
    assert_manifest_matches_analysis(out.path());
}

#[test]
fn rename_then_inverse_rename_restores_assignments() {
    let repo = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    init_repo(repo.path());
    std::fs::create_dir_all(repo.path().join("a")).unwrap();
    std::fs::write(repo.path().join("a/x.py"), "def run():\n    return 1\n").unwrap();
    commit_all(repo.path(), "initial");

    seed_initial_state(repo.path(), out.path(), &["a/x.py"], &[], &[]);

    // Forward rename.
    run_git(repo.path(), &["mv", "a/x.py", "a/z.py"]);
    commit_all(repo.path(), "forward");
    let mut updater = IncrementalUpdater::new(repo.path(), out.path(), None, false).unwrap();
    assert!(updater.can_run_incremental());
    updater.analyze().unwrap();
    assert!(updater.execute().unwrap());

    // Inverse rename.
    run_git(repo.path(), &["mv", "a/z.py", "a/x.py"]);
    commit_all(repo.path(), "inverse");
    let mut updater = IncrementalUpdater::new(repo.path(), out.path(), None, false).unwrap();
    assert!(updater.can_run_incremental());
    updater.analyze().unwrap();
    assert!(updater.execute().unwrap());

    let manifest = AnalysisManifest::load(out.path()).unwrap();
    assert_eq!(manifest.get_component_for_file("a/x.py"), Some("CompA"));
    assert_eq!(manifest.get_component_for_file("a/z.py"), None);
    let store = store_for(out.path()).unwrap();
    let root = store.read_root().unwrap().unwrap();
    assert_eq!(
        root.component_by_name("CompA").unwrap().assigned_files,
        vec!["a/x.py"]
    );
}

#[test]
fn missing_prior_state_blocks_incremental() {
    let repo = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    init_repo(repo.path());
    std::fs::write(repo.path().join("x.py"), "a = 1\n").unwrap();
    commit_all(repo.path(), "initial");

    let mut updater = IncrementalUpdater::new(repo.path(), out.path(), None, false).unwrap();
    assert!(!updater.can_run_incremental());

    // A force_full flag blocks it even with prior state present.
    seed_initial_state(repo.path(), out.path(), &["x.py"], &[], &[]);
    let mut forced = IncrementalUpdater::new(repo.path(), out.path(), None, true).unwrap();
    assert!(!forced.can_run_incremental());
}
