use std::collections::BTreeSet;

use tracing::{info, warn};

use codeboard_core::AnalysisInsights;
use codeboard_static::StaticAnalysis;

/// Consistency checks run after an incremental component update. Failures are
/// logged, never fatal: the contract is best-effort consistency, and the
/// caller may force a full reanalysis on the next run.
pub fn validate_incremental_update(
    analysis: &AnalysisInsights,
    static_analysis: &StaticAnalysis,
) -> bool {
    info!("running incremental update validation");

    let checks: [(&str, fn(&AnalysisInsights, &StaticAnalysis) -> Vec<String>); 4] = [
        ("component_relationships", check_relations),
        ("file_methods_assignment", check_file_methods),
        ("key_entity_uniqueness", check_entity_uniqueness),
        ("qualified_names", check_qualified_names),
    ];

    let mut all_valid = true;
    for (name, check) in checks {
        let problems = check(analysis, static_analysis);
        if problems.is_empty() {
            info!("[incremental validation] {name} passed");
        } else {
            all_valid = false;
            warn!("[incremental validation] {name} failed: {problems:?}");
        }
    }

    if all_valid {
        info!("[incremental validation] all validation checks passed");
    } else {
        warn!("[incremental validation] some validation checks failed");
    }
    all_valid
}

/// Every relation endpoint must name a component at this scope.
fn check_relations(analysis: &AnalysisInsights, _statics: &StaticAnalysis) -> Vec<String> {
    let names: BTreeSet<&str> = analysis
        .components
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    analysis
        .components_relations
        .iter()
        .flat_map(|relation| {
            [&relation.src_name, &relation.dst_name]
                .into_iter()
                .filter(|name| !names.contains(name.as_str()))
                .map(|name| format!("relation references unknown component `{name}`"))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Every file-method group must point at a file the component owns.
fn check_file_methods(analysis: &AnalysisInsights, _statics: &StaticAnalysis) -> Vec<String> {
    let mut problems = Vec::new();
    for component in &analysis.components {
        for group in &component.file_methods {
            if !component.assigned_files.contains(&group.file_path) {
                problems.push(format!(
                    "component `{}` records methods for unassigned file `{}`",
                    component.name, group.file_path
                ));
            }
        }
    }
    problems
}

/// Key entities must be unique across sibling components.
fn check_entity_uniqueness(analysis: &AnalysisInsights, _statics: &StaticAnalysis) -> Vec<String> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut problems = Vec::new();
    for component in &analysis.components {
        for entity in &component.key_entities {
            if !seen.insert(entity.qualified_name.as_str()) {
                problems.push(format!(
                    "key entity `{}` appears in more than one component",
                    entity.qualified_name
                ));
            }
        }
    }
    problems
}

/// Key-entity qualified names should resolve in the static analysis, at least
/// loosely.
fn check_qualified_names(analysis: &AnalysisInsights, statics: &StaticAnalysis) -> Vec<String> {
    let languages = statics.get_languages();
    if languages.is_empty() {
        return Vec::new();
    }

    let mut problems = Vec::new();
    for component in &analysis.components {
        for entity in &component.key_entities {
            let resolvable = languages.iter().any(|language| {
                statics
                    .get_reference(language, &entity.qualified_name)
                    .is_ok()
                    || statics
                        .get_loose_reference(language, &entity.qualified_name)
                        .is_some()
            });
            if !resolvable {
                problems.push(format!(
                    "key entity `{}` in component `{}` resolves in no language",
                    entity.qualified_name, component.name
                ));
            }
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeboard_core::{
        Component, FileMethodGroup, NodeKind, Relation, SourceCodeReference, ROOT_PARENT_ID,
    };
    use codeboard_static::{CallGraph, Node};

    fn statics_with(qnames: &[(&str, &str)]) -> StaticAnalysis {
        let mut cfg = CallGraph::new();
        for (qname, file) in qnames {
            cfg.add_node(Node::new(*qname, NodeKind::Function, *file, 0, 5));
        }
        let mut statics = StaticAnalysis::new();
        statics.add_references("python", cfg.nodes().cloned().collect());
        statics.add_cfg("python", cfg);
        statics
    }

    fn valid_analysis() -> AnalysisInsights {
        let mut component = Component::new(ROOT_PARENT_ID, "CompA", "A", Some(0));
        component.assigned_files = vec!["a/x.py".to_string()];
        component.file_methods = vec![FileMethodGroup::new("a/x.py", vec![])];
        component.key_entities = vec![SourceCodeReference::new("a.x.fn_a")];
        AnalysisInsights {
            description: String::new(),
            components: vec![component],
            components_relations: vec![Relation {
                relation: "self".to_string(),
                src_name: "CompA".to_string(),
                dst_name: "CompA".to_string(),
            }],
        }
    }

    #[test]
    fn test_valid_analysis_passes() {
        let statics = statics_with(&[("a.x.fn_a", "a/x.py")]);
        assert!(validate_incremental_update(&valid_analysis(), &statics));
    }

    #[test]
    fn test_unknown_relation_endpoint_fails() {
        let statics = statics_with(&[("a.x.fn_a", "a/x.py")]);
        let mut analysis = valid_analysis();
        analysis.components_relations.push(Relation {
            relation: "uses".to_string(),
            src_name: "CompA".to_string(),
            dst_name: "Ghost".to_string(),
        });
        assert!(!validate_incremental_update(&analysis, &statics));
    }

    #[test]
    fn test_file_methods_must_be_assigned() {
        let statics = statics_with(&[("a.x.fn_a", "a/x.py")]);
        let mut analysis = valid_analysis();
        analysis.components[0]
            .file_methods
            .push(FileMethodGroup::new("a/other.py", vec![]));
        assert!(!validate_incremental_update(&analysis, &statics));
    }

    #[test]
    fn test_duplicate_key_entities_fail() {
        let statics = statics_with(&[("a.x.fn_a", "a/x.py")]);
        let mut analysis = valid_analysis();
        let mut duplicate = Component::new(ROOT_PARENT_ID, "CompB", "B", Some(1));
        duplicate.key_entities = vec![SourceCodeReference::new("a.x.fn_a")];
        analysis.components.push(duplicate);
        assert!(!validate_incremental_update(&analysis, &statics));
    }

    #[test]
    fn test_unresolvable_qualified_name_fails() {
        let statics = statics_with(&[("a.x.fn_a", "a/x.py")]);
        let mut analysis = valid_analysis();
        analysis.components[0]
            .key_entities
            .push(SourceCodeReference::new("zz.unknown.symbol"));
        assert!(!validate_incremental_update(&analysis, &statics));
    }
}
