use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Top-level configuration from `.codeboard.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub incremental: IncrementalConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
}

/// Change-detection knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Similarity percentage at which git treats a delete+add pair as a rename.
    #[serde(default = "default_rename_similarity")]
    pub rename_similarity: u8,
}

fn default_rename_similarity() -> u8 {
    50
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            rename_similarity: default_rename_similarity(),
        }
    }
}

/// Escalation thresholds for the impact analyzer.
/// Intentionally high so incremental updates are preferred over full reruns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalConfig {
    /// Fraction of tracked files added or deleted that forces a full reanalysis.
    #[serde(default = "default_structural_change_threshold")]
    pub structural_change_threshold: f64,
    /// Dirty-component count above which the architecture level is refreshed.
    #[serde(default = "default_max_dirty_components")]
    pub max_dirty_components: usize,
    /// Upper bound on re-expansion worker threads.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_structural_change_threshold() -> f64 {
    0.30
}

fn default_max_dirty_components() -> usize {
    10
}

fn default_max_workers() -> usize {
    8
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            structural_change_threshold: default_structural_change_threshold(),
            max_dirty_components: default_max_dirty_components(),
            max_workers: default_max_workers(),
        }
    }
}

/// Call-graph clustering knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_target_clusters")]
    pub target_clusters: usize,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
}

fn default_target_clusters() -> usize {
    20
}

fn default_min_cluster_size() -> usize {
    2
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            target_clusters: default_target_clusters(),
            min_cluster_size: default_min_cluster_size(),
        }
    }
}

impl Config {
    /// Load configuration from a `.codeboard.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `.codeboard.toml` in the given directory, or return defaults.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(".codeboard.toml");
        if config_path.exists() {
            Self::load(&config_path).unwrap_or_default()
        } else {
            Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.detection.rename_similarity, 50);
        assert!((config.incremental.structural_change_threshold - 0.30).abs() < f64::EPSILON);
        assert_eq!(config.incremental.max_dirty_components, 10);
        assert_eq!(config.incremental.max_workers, 8);
        assert_eq!(config.clustering.target_clusters, 20);
        assert_eq!(config.clustering.min_cluster_size, 2);
    }

    #[test]
    fn test_deserialize_config() {
        let toml_str = r#"
[detection]
rename_similarity = 70

[incremental]
structural_change_threshold = 0.5
max_dirty_components = 4

[clustering]
target_clusters = 12
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.detection.rename_similarity, 70);
        assert!((config.incremental.structural_change_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.incremental.max_dirty_components, 4);
        // Omitted fields fall back to defaults
        assert_eq!(config.incremental.max_workers, 8);
        assert_eq!(config.clustering.target_clusters, 12);
        assert_eq!(config.clustering.min_cluster_size, 2);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path());
        assert_eq!(config.clustering.target_clusters, 20);
    }

    #[test]
    fn test_load_or_default_with_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".codeboard.toml"),
            "[incremental]\nmax_dirty_components = 3\n",
        )
        .unwrap();
        let config = Config::load_or_default(dir.path());
        assert_eq!(config.incremental.max_dirty_components, 3);
    }
}
