use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const VERSION_FILENAME: &str = "codeboarding_version.json";

/// Provenance stamp written once per full analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
    pub commit_hash: String,
    pub code_boarding_version: String,
}

/// Record which commit the analysis covers and which tool version made it.
pub fn write_version_stamp(output_dir: &Path, commit_hash: &str) -> Result<PathBuf> {
    let stamp = VersionStamp {
        commit_hash: commit_hash.to_string(),
        code_boarding_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let path = output_dir.join(VERSION_FILENAME);
    let content = serde_json::to_string_pretty(&stamp).context("failed to serialize version stamp")?;
    std::fs::write(&path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn read_version_stamp(output_dir: &Path) -> Option<VersionStamp> {
    let path = output_dir.join(VERSION_FILENAME);
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_version_stamp(dir.path(), "abc123").unwrap();
        let stamp = read_version_stamp(dir.path()).expect("stamp present");
        assert_eq!(stamp.commit_hash, "abc123");
        assert_eq!(stamp.code_boarding_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_missing_stamp_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_version_stamp(dir.path()).is_none());
    }
}
