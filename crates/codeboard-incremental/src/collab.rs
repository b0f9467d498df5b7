use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use tracing::warn;

use codeboard_core::{AnalysisInsights, Component};
use codeboard_static::ClusterResult;

/// Produces a component's expanded sub-analysis. Backed by the external
/// details collaborator; the core only consumes the structured result.
/// Implementations are shared across re-expansion workers.
pub trait ComponentExpander: Send + Sync {
    fn expand(
        &self,
        component: &Component,
    ) -> Result<(AnalysisInsights, BTreeMap<String, ClusterResult>)>;
}

/// Assigns files to sub-components in place, scoped to one component's
/// cluster subgraph. Backed by the external classifier collaborator.
pub trait NewFileClassifier: Send + Sync {
    fn classify_files(
        &self,
        sub_analysis: &mut AnalysisInsights,
        cluster_results: &BTreeMap<String, ClusterResult>,
        scope_files: &[String],
    ) -> Result<()>;
}

/// Structural validation of collaborator output: drop components without a
/// name and relations whose endpoints are unknown, with a warning. Malformed
/// items never fail the run.
pub fn sanitize_collaborator_output(sub_analysis: &mut AnalysisInsights) {
    let before = sub_analysis.components.len();
    sub_analysis.components.retain(|c| !c.name.trim().is_empty());
    if sub_analysis.components.len() < before {
        warn!(
            "dropped {} collaborator component(s) without a name",
            before - sub_analysis.components.len()
        );
    }

    let names: BTreeSet<&str> = sub_analysis
        .components
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    let before = sub_analysis.components_relations.len();
    sub_analysis.components_relations.retain(|relation| {
        names.contains(relation.src_name.as_str()) && names.contains(relation.dst_name.as_str())
    });
    if sub_analysis.components_relations.len() < before {
        warn!(
            "dropped {} collaborator relation(s) referencing unknown components",
            before - sub_analysis.components_relations.len()
        );
    }
}
