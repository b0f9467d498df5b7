use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::result::StaticAnalysis;

/// Disk cache for static-analysis results, keyed by repo-state hash.
///
/// A corrupt or unreadable entry is treated as a miss so the caller rebuilds.
pub struct AnalysisCache {
    cache_dir: PathBuf,
}

impl AnalysisCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    fn entry_path(&self, repo_hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{repo_hash}.bin"))
    }

    /// Load cached results for the given repo hash, or `None` if absent/invalid.
    pub fn get(&self, repo_hash: &str) -> Option<StaticAnalysis> {
        let path = self.entry_path(repo_hash);
        if !path.exists() {
            return None;
        }
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to read static analysis cache {}: {e}", path.display());
                return None;
            }
        };
        match bincode::serde::decode_from_slice::<StaticAnalysis, _>(
            &bytes,
            bincode::config::standard(),
        ) {
            Ok((result, _)) => {
                info!("loaded static analysis from cache: {}", path.display());
                Some(result)
            }
            Err(e) => {
                warn!("failed to decode static analysis cache {}: {e}", path.display());
                None
            }
        }
    }

    /// Save results under the repo hash using a temp-file-then-rename write.
    pub fn save(&self, repo_hash: &str, result: &StaticAnalysis) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("failed to create {}", self.cache_dir.display()))?;

        let bytes = bincode::serde::encode_to_vec(result, bincode::config::standard())
            .context("failed to encode static analysis")?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.cache_dir)
            .context("failed to create cache temp file")?;
        temp.write_all(&bytes)
            .context("failed to write cache temp file")?;
        let path = self.entry_path(repo_hash);
        temp.persist(&path)
            .with_context(|| format!("failed to persist {}", path.display()))?;
        info!("saved static analysis to cache: {}", path.display());
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}
