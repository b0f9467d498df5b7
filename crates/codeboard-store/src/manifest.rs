use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use codeboard_core::{normalize_path, AnalysisInsights};

pub const MANIFEST_FILENAME: &str = "analysis_manifest.json";
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    MANIFEST_SCHEMA_VERSION
}

/// Persisted state for incremental updates: the file ownership index, the
/// commit the analysis was built against, and which components are expanded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub repo_state_hash: String,
    pub base_commit: String,
    #[serde(default)]
    pub file_to_component: BTreeMap<String, String>,
    #[serde(default)]
    pub expanded_components: Vec<String>,
}

impl AnalysisManifest {
    pub fn new(repo_state_hash: impl Into<String>, base_commit: impl Into<String>) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            repo_state_hash: repo_state_hash.into(),
            base_commit: base_commit.into(),
            file_to_component: BTreeMap::new(),
            expanded_components: Vec::new(),
        }
    }

    /// The component that owns a file, if any.
    pub fn get_component_for_file(&self, file_path: &str) -> Option<&str> {
        self.file_to_component
            .get(&normalize_path(file_path))
            .map(String::as_str)
    }

    /// All files belonging to a component.
    pub fn get_files_for_component(&self, component_name: &str) -> Vec<String> {
        self.file_to_component
            .iter()
            .filter(|(_, owner)| owner.as_str() == component_name)
            .map(|(file, _)| file.clone())
            .collect()
    }

    pub fn get_all_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.file_to_component.values().cloned().collect();
        names.sort();
        names.dedup();
        names
    }

    /// Move a file entry to a new path (for renames). Returns true if updated.
    pub fn update_file_path(&mut self, old_path: &str, new_path: &str) -> bool {
        let old_path = normalize_path(old_path);
        match self.file_to_component.remove(&old_path) {
            Some(component) => {
                self.file_to_component
                    .insert(normalize_path(new_path), component);
                true
            }
            None => false,
        }
    }

    /// Remove a file entry. Returns the owning component if it existed.
    pub fn remove_file(&mut self, file_path: &str) -> Option<String> {
        self.file_to_component.remove(&normalize_path(file_path))
    }

    pub fn add_file(&mut self, file_path: &str, component_name: &str) {
        self.file_to_component
            .insert(normalize_path(file_path), component_name.to_string());
    }

    /// Build a manifest by registering every component's assigned files.
    pub fn from_analysis(
        analysis: &AnalysisInsights,
        repo_state_hash: impl Into<String>,
        base_commit: impl Into<String>,
        expanded_components: Vec<String>,
    ) -> Self {
        let mut manifest = Self::new(repo_state_hash, base_commit);
        manifest.expanded_components = expanded_components;
        for component in &analysis.components {
            for file_path in &component.assigned_files {
                manifest.add_file(file_path, &component.name);
            }
        }
        manifest
    }

    /// Save next to the analysis file.
    pub fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(MANIFEST_FILENAME);
        let content =
            serde_json::to_string_pretty(self).context("failed to serialize manifest")?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("saved analysis manifest to {}", path.display());
        Ok(path)
    }

    /// Load from the output directory. Returns `None` when missing, unparsable,
    /// or written with an incompatible schema version; callers treat all three
    /// as "no prior state".
    pub fn load(output_dir: &Path) -> Option<Self> {
        let path = output_dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            debug!("no manifest found at {}", path.display());
            return None;
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("failed to read manifest: {e}");
                return None;
            }
        };
        let manifest: AnalysisManifest = match serde_json::from_str(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("failed to parse manifest: {e}");
                return None;
            }
        };
        if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
            warn!(
                "manifest schema version mismatch: {} != {}",
                manifest.schema_version, MANIFEST_SCHEMA_VERSION
            );
            return None;
        }
        info!(
            "loaded manifest with {} file mappings",
            manifest.file_to_component.len()
        );
        Some(manifest)
    }

    pub fn exists(output_dir: &Path) -> bool {
        output_dir.join(MANIFEST_FILENAME).exists()
    }
}
