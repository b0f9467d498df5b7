use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use codeboard_core::{should_skip_file, AnalysisInsights, Config};
use codeboard_static::{ClusterResult, StaticAnalysis};
use codeboard_store::{
    build_coverage_summary, store_for, AnalysisManifest, AnalysisStore, FileCoverageSummary,
};

use crate::changes::{detect_changes_from_commit, get_current_commit, repo_state_hash, ChangeSet};
use crate::checker::{
    can_patch_sub_analysis, component_has_only_renames, component_store_key, is_expanded_component,
};
use crate::collab::{ComponentExpander, NewFileClassifier};
use crate::files::{
    assign_new_files, classify_new_files_in_component, new_files_for_component,
    remove_deleted_files,
};
use crate::impact::{analyze_impact, ChangeImpact, UpdateAction};
use crate::patch::{patch_paths_in_analysis, patch_paths_in_manifest, patch_sub_analysis};
use crate::reexpand::{reexpand_components, ReexpansionContext};
use crate::scoped::{analyze_expanded_component_impacts, run_scoped_component_impacts};
use crate::validation::validate_incremental_update;

/// Orchestrates one incremental update: load prior state, analyze the impact
/// of repository changes, and either apply a minimal update or report that a
/// full reanalysis is required.
pub struct IncrementalUpdater<'a> {
    repo_dir: PathBuf,
    store: Arc<AnalysisStore>,
    static_analysis: Option<&'a StaticAnalysis>,
    force_full: bool,
    config: Config,
    expander: Option<&'a dyn ComponentExpander>,
    classifier: Option<&'a dyn NewFileClassifier>,

    manifest: Option<AnalysisManifest>,
    analysis: Option<AnalysisInsights>,
    impact: Option<ChangeImpact>,
    changes: Option<ChangeSet>,
    component_impacts: BTreeMap<String, ChangeImpact>,
}

impl<'a> IncrementalUpdater<'a> {
    pub fn new(
        repo_dir: impl Into<PathBuf>,
        output_dir: &Path,
        static_analysis: Option<&'a StaticAnalysis>,
        force_full: bool,
    ) -> Result<Self> {
        let repo_dir = repo_dir.into();
        let config = Config::load_or_default(&repo_dir);
        Ok(Self {
            repo_dir,
            store: store_for(output_dir)?,
            static_analysis,
            force_full,
            config,
            expander: None,
            classifier: None,
            manifest: None,
            analysis: None,
            impact: None,
            changes: None,
            component_impacts: BTreeMap::new(),
        })
    }

    /// Attach the details collaborator used for re-expansion.
    pub fn with_expander(mut self, expander: &'a dyn ComponentExpander) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Attach the classifier collaborator used for targeted new-file updates.
    pub fn with_classifier(mut self, classifier: &'a dyn NewFileClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn impact(&self) -> Option<&ChangeImpact> {
        self.impact.as_ref()
    }

    pub fn manifest(&self) -> Option<&AnalysisManifest> {
        self.manifest.as_ref()
    }

    pub fn analysis(&self) -> Option<&AnalysisInsights> {
        self.analysis.as_ref()
    }

    /// Whether an incremental update is possible at all: prior state must
    /// exist with a compatible schema, and no full run was forced.
    pub fn can_run_incremental(&mut self) -> bool {
        if self.force_full {
            return false;
        }

        self.manifest = AnalysisManifest::load(self.store.output_dir());
        if self.manifest.is_none() {
            info!("no manifest found, full analysis required");
            return false;
        }

        self.analysis = self.store.read_root().ok().flatten();
        if self.analysis.is_none() {
            info!("no analysis found, full analysis required");
            return false;
        }

        true
    }

    /// Detect changes since the manifest's base commit and analyze their
    /// impact, at the root and inside every expanded component.
    pub fn analyze(&mut self) -> Result<&ChangeImpact> {
        let Some(manifest) = self.manifest.as_ref() else {
            bail!("can_run_incremental() must succeed before analyze()");
        };

        let changes = detect_changes_from_commit(
            &self.repo_dir,
            &manifest.base_commit,
            self.config.detection.rename_similarity,
        );
        info!(
            "detected {} changes from {}: {} renames, {} modified, {} added, {} deleted",
            changes.changes.len(),
            &manifest.base_commit[..manifest.base_commit.len().min(7)],
            changes.renames().len(),
            changes.modified_files().len(),
            changes.added_files().len(),
            changes.deleted_files().len(),
        );

        let impact = analyze_impact(
            &changes,
            manifest,
            self.static_analysis,
            &self.config.incremental,
        );
        info!("impact analysis:\n{}", impact.summary());

        self.component_impacts = analyze_expanded_component_impacts(
            &changes,
            manifest,
            self.static_analysis,
            &self.config.incremental,
        );

        self.changes = Some(changes);
        self.impact = Some(impact);
        Ok(self.impact.as_ref().expect("impact just set"))
    }

    /// Execute the update chosen by `analyze()`. Returns `false` when the
    /// caller must fall back to the full analysis pipeline.
    pub fn execute(&mut self) -> Result<bool> {
        let Some(impact) = self.impact.as_ref() else {
            bail!("analyze() must run before execute()");
        };

        match impact.action {
            UpdateAction::None => {
                info!("no update needed");
                Ok(true)
            }
            UpdateAction::PatchPaths => self.execute_patch_paths(),
            UpdateAction::UpdateComponents => self.execute_update_components(),
            UpdateAction::UpdateArchitecture => {
                info!("architecture update needed, falling back to full reanalysis");
                Ok(false)
            }
            UpdateAction::FullReanalysis => {
                info!("full reanalysis required: {}", impact.reason);
                Ok(false)
            }
        }
    }

    /// Recount file coverage against the current working tree and fold the
    /// summary into the persisted metadata.
    pub fn update_file_coverage(&mut self) -> Result<Option<FileCoverageSummary>> {
        let (Some(analysis), Some(manifest)) = (self.analysis.as_ref(), self.manifest.as_ref())
        else {
            warn!("cannot update file coverage without loaded state");
            return Ok(None);
        };
        let analyzed: HashSet<String> = manifest.file_to_component.keys().cloned().collect();
        let summary = build_coverage_summary(&self.repo_dir, &analyzed);
        self.store.write(
            analysis,
            &manifest.expanded_components,
            None,
            "",
            Some(summary.clone()),
        )?;
        Ok(Some(summary))
    }

    /// Re-derive the dirty set against a fresh static analysis by mapping each
    /// changed file through its new cluster membership, with the old manifest
    /// mapping as a fallback (deleted files never appear in new clusters).
    pub fn recompute_dirty_components(&mut self, static_analysis: &StaticAnalysis) {
        let (Some(impact), Some(manifest)) = (self.impact.as_mut(), self.manifest.as_ref()) else {
            warn!("cannot recompute dirty components: missing impact or manifest");
            return;
        };
        let Some(analysis) = self.analysis.as_ref() else {
            warn!("cannot recompute dirty components: missing analysis");
            return;
        };

        info!("recomputing dirty components with updated cluster assignments");

        let mut cluster_results: BTreeMap<String, ClusterResult> = BTreeMap::new();
        for language in static_analysis.get_languages() {
            if let Ok(cfg) = static_analysis.get_cfg(&language) {
                cluster_results.insert(language, cfg.cluster());
            }
        }

        let mut changed_files: BTreeSet<String> = BTreeSet::new();
        changed_files.extend(impact.renames.keys().cloned());
        changed_files.extend(impact.modified_files.iter().cloned());
        changed_files.extend(impact.added_files.iter().cloned());
        changed_files.extend(impact.deleted_files.iter().cloned());

        let mut cluster_dirty: BTreeSet<String> = BTreeSet::new();
        let mut manifest_dirty: BTreeSet<String> = BTreeSet::new();
        for file_path in &changed_files {
            if should_skip_file(file_path) {
                continue;
            }
            match find_component_for_file(analysis, file_path, &cluster_results) {
                Some(component) => {
                    debug!("file `{file_path}` maps to component `{component}`");
                    cluster_dirty.insert(component);
                }
                None => debug!("file `{file_path}` not assigned to any component"),
            }
            if let Some(component) = manifest.get_component_for_file(file_path) {
                manifest_dirty.insert(component.to_string());
            }
        }

        let original_dirty = impact.dirty_components.clone();
        impact.dirty_components = &cluster_dirty | &manifest_dirty;

        // Preserve structural-change components even when clusters could not
        // map them (deleted files have no new cluster).
        let mut structural = impact.components_needing_reexpansion.clone();
        for file_path in impact.added_files.iter().chain(&impact.deleted_files) {
            if let Some(component) = manifest.get_component_for_file(file_path) {
                structural.insert(component.to_string());
            }
        }
        impact.components_needing_reexpansion = &structural & &impact.dirty_components;

        info!(
            "recomputed dirty components: {} -> {} (removed: {:?}, added: {:?})",
            original_dirty.len(),
            impact.dirty_components.len(),
            &original_dirty - &impact.dirty_components,
            &impact.dirty_components - &original_dirty,
        );
    }

    fn execute_patch_paths(&mut self) -> Result<bool> {
        let (Some(impact), Some(manifest), Some(analysis)) = (
            self.impact.as_ref(),
            self.manifest.as_mut(),
            self.analysis.as_mut(),
        ) else {
            bail!("analyze() must run before execute()");
        };

        info!("patching {} renamed paths", impact.renames.len());
        patch_paths_in_analysis(analysis, &impact.renames);
        patch_paths_in_manifest(manifest, &impact.renames);

        manifest.base_commit =
            get_current_commit(&self.repo_dir).unwrap_or_else(|| manifest.base_commit.clone());
        manifest.repo_state_hash = repo_state_hash(&self.repo_dir);

        self.store
            .write(analysis, &manifest.expanded_components, None, "", None)?;
        manifest.save(self.store.output_dir())?;

        info!("path patching complete");
        Ok(true)
    }

    fn execute_update_components(&mut self) -> Result<bool> {
        let Some(mut analysis) = self.analysis.take() else {
            bail!("analyze() must run before execute()");
        };
        let Some(mut manifest) = self.manifest.take() else {
            bail!("analyze() must run before execute()");
        };
        let impact = self.impact.clone().expect("impact present");

        info!(
            "updating {} components: {:?}",
            impact.dirty_components.len(),
            impact.dirty_components
        );

        // Deletions first, so new assignments never land on dead entries.
        if !impact.deleted_files.is_empty() {
            remove_deleted_files(&impact.deleted_files, &mut analysis, &mut manifest);
        }

        let components_with_new_files = if impact.added_files.is_empty() {
            BTreeSet::new()
        } else {
            assign_new_files(&impact.added_files, &mut analysis, &mut manifest)
        };

        if !impact.renames.is_empty() {
            patch_paths_in_analysis(&mut analysis, &impact.renames);
            patch_paths_in_manifest(&mut manifest, &impact.renames);
        }

        // Partition the affected expanded components into re-expansion,
        // patching, and targeted classification.
        let mut components_to_reexpand: BTreeSet<String> = BTreeSet::new();
        let mut components_to_patch: BTreeSet<String> = BTreeSet::new();
        let mut components_to_classify: BTreeMap<String, Vec<String>> = BTreeMap::new();

        let affected: BTreeSet<String> = &impact.components_needing_reexpansion | &components_with_new_files;
        for component_name in &affected {
            if !is_expanded_component(component_name, Some(&manifest), &self.store) {
                continue;
            }

            if component_has_only_renames(component_name, Some(&manifest), Some(&impact)) {
                info!("component `{component_name}` has only renames, will patch instead of re-expanding");
                components_to_patch.insert(component_name.clone());
            } else if can_patch_sub_analysis(
                component_name,
                Some(&manifest),
                Some(&impact),
                &self.store,
                Some(&analysis),
            ) {
                info!("component `{component_name}` can be patched without re-analysis");
                components_to_patch.insert(component_name.clone());
                if components_with_new_files.contains(component_name) {
                    let new_files =
                        new_files_for_component(component_name, &impact.added_files, &analysis);
                    if !new_files.is_empty() {
                        components_to_classify.insert(component_name.clone(), new_files);
                    }
                }
            } else {
                info!("component `{component_name}` needs full re-expansion");
                components_to_reexpand.insert(component_name.clone());
            }
        }

        // Re-run the details collaborator where required.
        let mut reexpanded: Vec<String> = Vec::new();
        if !components_to_reexpand.is_empty() {
            match self.expander {
                Some(expander) => {
                    let context = ReexpansionContext {
                        analysis: &analysis,
                        manifest: &manifest,
                        store: &self.store,
                        impact: Some(&impact),
                    };
                    reexpanded = reexpand_components(
                        &components_to_reexpand,
                        expander,
                        &context,
                        self.config.incremental.max_workers,
                    );
                }
                None => warn!(
                    "no details collaborator available; skipping re-expansion of {components_to_reexpand:?}"
                ),
            }
        }

        for component_name in &reexpanded {
            if !manifest.expanded_components.contains(component_name) {
                warn!("component {component_name} is not found in original analysis");
            }
        }

        // Recurse into changed expanded components with scoped impacts.
        let scoped_targets = &components_to_reexpand | &components_to_patch;
        let changes = self.changes.clone().unwrap_or_default();
        run_scoped_component_impacts(
            &scoped_targets,
            &self.component_impacts,
            &changes,
            &mut analysis,
            &mut manifest,
            &self.store,
            self.static_analysis,
            self.expander,
            &self.config.incremental,
        );

        // Targeted classification for patchable components with new files.
        let mut classified: Vec<String> = Vec::new();
        for (component_name, new_files) in &components_to_classify {
            let (Some(static_analysis), Some(classifier)) =
                (self.static_analysis, self.classifier)
            else {
                debug!(
                    "skipping classification for {component_name}: no static analysis or classifier"
                );
                continue;
            };
            if classify_new_files_in_component(
                component_name,
                new_files,
                &analysis,
                &manifest,
                &self.store,
                static_analysis,
                classifier,
            ) {
                classified.push(component_name.clone());
                info!("component `{component_name}` new files classified into sub-components");
            }
        }

        // Patch the remaining components' sub-analyses.
        let mut patched: Vec<String> = Vec::new();
        for component_name in &components_to_patch {
            if analysis.find_component(component_name).is_none() {
                warn!("component `{component_name}` not found in analysis");
                continue;
            }
            let key = component_store_key(Some(&analysis), component_name);
            match self.store.read_sub(&key) {
                Ok(Some(mut sub_analysis)) => {
                    if patch_sub_analysis(&mut sub_analysis, &impact.deleted_files, &impact.renames)
                    {
                        self.store.write_sub(
                            &sub_analysis,
                            &key,
                            Some(&manifest.expanded_components),
                        )?;
                        info!("component `{component_name}` sub-analysis patched");
                    }
                    patched.push(component_name.clone());
                }
                _ => {
                    info!("component `{component_name}` has no sub-analysis, updating in place");
                    patched.push(component_name.clone());
                }
            }
        }

        // Best-effort validation; warnings only.
        match self.static_analysis {
            Some(static_analysis) => {
                if !validate_incremental_update(&analysis, static_analysis) {
                    warn!(
                        "incremental update validation failed; consider a full reanalysis for complete results"
                    );
                }
            }
            None => warn!("no static analysis available for validation"),
        }

        manifest.base_commit =
            get_current_commit(&self.repo_dir).unwrap_or_else(|| manifest.base_commit.clone());
        manifest.repo_state_hash = repo_state_hash(&self.repo_dir);

        self.store
            .write(&analysis, &manifest.expanded_components, None, "", None)?;
        manifest.save(self.store.output_dir())?;

        info!(
            "component update complete; re-expanded: {reexpanded:?}, classified: {classified:?}, patched: {patched:?}"
        );

        self.analysis = Some(analysis);
        self.manifest = Some(manifest);
        Ok(true)
    }
}

/// The component a file should belong to, judged by cluster-membership
/// overlap with each component's source clusters, falling back to directory
/// matching.
fn find_component_for_file(
    analysis: &AnalysisInsights,
    file_path: &str,
    cluster_results: &BTreeMap<String, ClusterResult>,
) -> Option<String> {
    let mut file_clusters: BTreeSet<usize> = BTreeSet::new();
    for result in cluster_results.values() {
        file_clusters.extend(result.clusters_for_file(file_path));
    }
    if file_clusters.is_empty() {
        return None;
    }

    let mut best: Option<(usize, &str)> = None;
    for component in &analysis.components {
        if component.source_cluster_ids.is_empty() {
            continue;
        }
        let component_clusters: BTreeSet<usize> =
            component.source_cluster_ids.iter().copied().collect();
        let overlap = file_clusters.intersection(&component_clusters).count();
        if overlap > 0 && best.is_none_or(|(count, _)| overlap > count) {
            best = Some((overlap, component.name.as_str()));
        }
    }
    if let Some((_, name)) = best {
        return Some(name.to_string());
    }

    // No cluster overlap; fall back to directory affinity.
    let file_dir = Path::new(file_path).parent()?.to_string_lossy().to_string();
    for component in &analysis.components {
        for assigned in &component.assigned_files {
            let assigned_dir = Path::new(assigned)
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            if assigned_dir == file_dir {
                return Some(component.name.clone());
            }
        }
    }
    None
}
