use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use codeboard_core::{normalize_path, skip_reason};

/// Lightweight coverage counts carried in the analysis metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverageSummary {
    pub total_files: usize,
    pub analyzed: usize,
    pub not_analyzed: usize,
    #[serde(default)]
    pub not_analyzed_by_reason: BTreeMap<String, usize>,
}

/// Walk the repository (gitignore-aware) and classify every file as analyzed
/// or excluded, with excluded files grouped by skip reason.
pub fn build_coverage_summary(
    repo_dir: &Path,
    analyzed_files: &HashSet<String>,
) -> FileCoverageSummary {
    let mut summary = FileCoverageSummary::default();

    let walker = ignore::WalkBuilder::new(repo_dir).build();
    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(repo_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        let relative = normalize_path(&relative);

        summary.total_files += 1;
        if analyzed_files.contains(&relative) {
            summary.analyzed += 1;
        } else {
            summary.not_analyzed += 1;
            let reason = skip_reason(&relative).unwrap_or("not_assigned");
            *summary
                .not_analyzed_by_reason
                .entry(reason.to_string())
                .or_insert(0) += 1;
        }
    }

    debug!(
        total = summary.total_files,
        analyzed = summary.analyzed,
        "built file coverage summary"
    );
    summary
}
