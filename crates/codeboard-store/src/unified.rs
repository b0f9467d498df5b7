use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use codeboard_core::{AnalysisInsights, Component, FileMethodGroup, Relation, SourceCodeReference};

use crate::coverage::FileCoverageSummary;

/// Metadata object at the top of `analysis.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub generated_at: String,
    pub repo_name: String,
    pub depth_level: usize,
    #[serde(default)]
    pub file_coverage_summary: FileCoverageSummary,
}

/// One component in the recursive unified JSON tree. Expanded components
/// carry their sub-analysis inline as nested `components`/`components_relations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentNode {
    #[serde(default)]
    pub component_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_entities: Vec<SourceCodeReference>,
    #[serde(default)]
    pub assigned_files: Vec<String>,
    #[serde(default)]
    pub file_methods: Vec<FileMethodGroup>,
    #[serde(default)]
    pub source_cluster_ids: Vec<usize>,
    #[serde(default)]
    pub can_expand: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<ComponentNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components_relations: Option<Vec<Relation>>,
}

/// The persisted shape of `analysis.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedAnalysis {
    pub metadata: AnalysisMetadata,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub components: Vec<ComponentNode>,
    #[serde(default)]
    pub components_relations: Vec<Relation>,
}

/// Key under which a component's sub-analysis is stored: its id when present,
/// its name for data written before ids existed.
fn sub_key(component_id: &str, name: &str) -> String {
    if component_id.is_empty() {
        name.to_string()
    } else {
        component_id.to_string()
    }
}

/// Depth of the analysis tree: 1 with no sub-analyses, 1 + max child depth
/// otherwise.
pub fn compute_depth_level(
    analysis: &AnalysisInsights,
    sub_analyses: &BTreeMap<String, AnalysisInsights>,
) -> usize {
    fn depth_of(
        analysis: &AnalysisInsights,
        sub_analyses: &BTreeMap<String, AnalysisInsights>,
        visited: &mut BTreeSet<String>,
    ) -> usize {
        let mut max_child = 0;
        for component in &analysis.components {
            let key = sub_key(&component.component_id, &component.name);
            if !visited.insert(key.clone()) {
                continue;
            }
            let sub = sub_analyses
                .get(&key)
                .or_else(|| sub_analyses.get(&component.name));
            if let Some(sub) = sub {
                max_child = max_child.max(depth_of(sub, sub_analyses, visited));
            }
        }
        1 + max_child
    }

    depth_of(analysis, sub_analyses, &mut BTreeSet::new())
}

fn to_component_node(
    component: &Component,
    expandable: &[String],
    sub_analyses: &BTreeMap<String, AnalysisInsights>,
    processed: &mut BTreeSet<String>,
) -> ComponentNode {
    let key = sub_key(&component.component_id, &component.name);
    let can_expand = if processed.contains(&key) {
        warn!(
            "component `{}` ({key}) appears more than once, skipping expansion",
            component.name
        );
        false
    } else {
        processed.insert(key.clone());
        expandable
            .iter()
            .any(|e| *e == component.component_id || *e == component.name)
    };

    let sub = if can_expand {
        sub_analyses
            .get(&key)
            .or_else(|| sub_analyses.get(&component.name))
    } else {
        None
    };

    let (components, components_relations) = match sub {
        Some(sub) => (
            Some(
                sub.components
                    .iter()
                    .map(|c| to_component_node(c, expandable, sub_analyses, processed))
                    .collect(),
            ),
            Some(sub.components_relations.clone()),
        ),
        None => (None, None),
    };

    ComponentNode {
        component_id: component.component_id.clone(),
        name: component.name.clone(),
        description: component.description.clone(),
        key_entities: component.key_entities.clone(),
        assigned_files: component.assigned_files.clone(),
        file_methods: component.file_methods.clone(),
        source_cluster_ids: component.source_cluster_ids.clone(),
        can_expand,
        components,
        components_relations,
    }
}

/// Build the full unified document with metadata and nested sub-analyses.
pub fn build_unified(
    analysis: &AnalysisInsights,
    expandable: &[String],
    repo_name: &str,
    sub_analyses: &BTreeMap<String, AnalysisInsights>,
    file_coverage_summary: Option<FileCoverageSummary>,
) -> UnifiedAnalysis {
    let mut processed = BTreeSet::new();
    let components = analysis
        .components
        .iter()
        .map(|c| to_component_node(c, expandable, sub_analyses, &mut processed))
        .collect();

    UnifiedAnalysis {
        metadata: AnalysisMetadata {
            generated_at: Utc::now().to_rfc3339(),
            repo_name: repo_name.to_string(),
            depth_level: compute_depth_level(analysis, sub_analyses),
            file_coverage_summary: file_coverage_summary.unwrap_or_default(),
        },
        description: analysis.description.clone(),
        components,
        components_relations: analysis.components_relations.clone(),
    }
}

fn extract_level(
    components: &[ComponentNode],
    description: &str,
    relations: &[Relation],
    sub_analyses: &mut BTreeMap<String, AnalysisInsights>,
) -> AnalysisInsights {
    let mut flat = Vec::with_capacity(components.len());
    for node in components {
        flat.push(Component {
            component_id: node.component_id.clone(),
            name: node.name.clone(),
            description: node.description.clone(),
            key_entities: node.key_entities.clone(),
            assigned_files: node.assigned_files.clone(),
            file_methods: node.file_methods.clone(),
            source_cluster_ids: node.source_cluster_ids.clone(),
        });

        if let Some(children) = &node.components {
            let nested_relations = node.components_relations.clone().unwrap_or_default();
            let sub = extract_level(children, "", &nested_relations, sub_analyses);
            sub_analyses.insert(sub_key(&node.component_id, &node.name), sub);
        }
    }

    AnalysisInsights {
        description: description.to_string(),
        components: flat,
        components_relations: relations.to_vec(),
    }
}

/// Parse the unified document into the root analysis plus a flat map from
/// component key (id, or name for legacy data) to its sub-analysis.
pub fn parse_unified(
    unified: &UnifiedAnalysis,
) -> (AnalysisInsights, BTreeMap<String, AnalysisInsights>) {
    let mut sub_analyses = BTreeMap::new();
    let root = extract_level(
        &unified.components,
        &unified.description,
        &unified.components_relations,
        &mut sub_analyses,
    );
    (root, sub_analyses)
}
