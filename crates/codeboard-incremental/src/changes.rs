use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::Command;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Git name-status letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Copied,
    Deleted,
    Modified,
    Renamed,
    TypeChanged,
    Unmerged,
    Unknown,
}

impl ChangeKind {
    fn from_status_char(status: char) -> Option<Self> {
        match status.to_ascii_uppercase() {
            'A' => Some(ChangeKind::Added),
            'C' => Some(ChangeKind::Copied),
            'D' => Some(ChangeKind::Deleted),
            'M' => Some(ChangeKind::Modified),
            'R' => Some(ChangeKind::Renamed),
            'T' => Some(ChangeKind::TypeChanged),
            'U' => Some(ChangeKind::Unmerged),
            'X' => Some(ChangeKind::Unknown),
            _ => None,
        }
    }
}

/// A detected file change with rename tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedChange {
    pub kind: ChangeKind,
    /// Current/new path.
    pub file_path: String,
    /// For renames and copies: the original path.
    pub old_path: Option<String>,
    /// For renames and copies: similarity 0-100.
    pub similarity: Option<u8>,
}

impl DetectedChange {
    pub fn is_rename(&self) -> bool {
        self.kind == ChangeKind::Renamed
    }

    /// File content changed, as opposed to a pure move or metadata change.
    pub fn is_content_change(&self) -> bool {
        matches!(self.kind, ChangeKind::Modified | ChangeKind::Added)
    }

    /// File existence changed.
    pub fn is_structural(&self) -> bool {
        matches!(self.kind, ChangeKind::Added | ChangeKind::Deleted)
    }
}

/// Collection of detected changes between two repository states.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub changes: Vec<DetectedChange>,
    pub base_ref: String,
    pub target_ref: String,
}

impl ChangeSet {
    /// Rename mapping: old path → new path.
    pub fn renames(&self) -> BTreeMap<String, String> {
        self.changes
            .iter()
            .filter(|c| c.is_rename())
            .filter_map(|c| c.old_path.clone().map(|old| (old, c.file_path.clone())))
            .collect()
    }

    pub fn modified_files(&self) -> Vec<String> {
        self.files_of_kind(ChangeKind::Modified)
    }

    pub fn added_files(&self) -> Vec<String> {
        self.files_of_kind(ChangeKind::Added)
    }

    pub fn deleted_files(&self) -> Vec<String> {
        self.files_of_kind(ChangeKind::Deleted)
    }

    fn files_of_kind(&self, kind: ChangeKind) -> Vec<String> {
        self.changes
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.file_path.clone())
            .collect()
    }

    /// All affected current paths.
    pub fn all_affected_files(&self) -> BTreeSet<String> {
        self.changes.iter().map(|c| c.file_path.clone()).collect()
    }

    /// All old paths (rename/copy sources).
    pub fn all_old_paths(&self) -> BTreeSet<String> {
        self.changes
            .iter()
            .filter_map(|c| c.old_path.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn has_structural_changes(&self) -> bool {
        self.changes.iter().any(DetectedChange::is_structural)
    }

    pub fn has_only_renames(&self) -> bool {
        !self.changes.is_empty() && self.changes.iter().all(DetectedChange::is_rename)
    }
}

/// Detect file changes between two refs with rename-aware git diff.
///
/// `target_ref = None` diffs against the working tree. A missing git binary or
/// an unresolvable ref yields an empty change set with a logged warning, never
/// an error.
pub fn detect_changes(
    repo_dir: &Path,
    base_ref: &str,
    target_ref: Option<&str>,
    rename_similarity: u8,
) -> ChangeSet {
    let mut args = vec![
        "diff".to_string(),
        "--name-status".to_string(),
        "-M".to_string(),
        "-C".to_string(),
        format!("--find-renames={rename_similarity}%"),
        base_ref.to_string(),
    ];
    if let Some(target) = target_ref {
        args.push(target.to_string());
    }

    let mut change_set = ChangeSet {
        base_ref: base_ref.to_string(),
        target_ref: target_ref.unwrap_or("").to_string(),
        ..Default::default()
    };

    let output = match Command::new("git").args(&args).current_dir(repo_dir).output() {
        Ok(output) => output,
        Err(e) => {
            warn!("git not available: {e}");
            return change_set;
        }
    };
    if !output.status.success() {
        warn!(
            "git diff failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return change_set;
    }

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(change) = parse_status_line(line) {
            debug!("detected change: {:?} {}", change.kind, change.file_path);
            change_set.changes.push(change);
        }
    }

    change_set
}

/// Detect changes from a commit to the current working tree, committed and
/// uncommitted alike.
pub fn detect_changes_from_commit(
    repo_dir: &Path,
    base_commit: &str,
    rename_similarity: u8,
) -> ChangeSet {
    detect_changes(repo_dir, base_commit, None, rename_similarity)
}

/// Parse one `git diff --name-status` line, e.g.:
///
/// ```text
/// M       file.py
/// R100    old.py  new.py
/// ```
fn parse_status_line(line: &str) -> Option<DetectedChange> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 2 {
        return None;
    }

    let status = parts[0];
    let status_char = status.chars().next()?;
    let Some(kind) = ChangeKind::from_status_char(status_char) else {
        warn!("unknown git status: {status_char}");
        return None;
    };

    // Renames and copies carry a similarity score and two paths.
    if matches!(kind, ChangeKind::Renamed | ChangeKind::Copied) {
        if parts.len() < 3 {
            return None;
        }
        let similarity = status[1..].parse::<u8>().ok();
        return Some(DetectedChange {
            kind,
            file_path: parts[2].to_string(),
            old_path: Some(parts[1].to_string()),
            similarity,
        });
    }

    Some(DetectedChange {
        kind,
        file_path: parts[1].to_string(),
        old_path: None,
        similarity: None,
    })
}

/// Current HEAD commit hash, or `None` outside a repository.
pub fn get_current_commit(repo_dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Hash of the full working-tree state: HEAD plus any staged or unstaged
/// changes. Keys the static-analysis cache and is stored in the manifest.
pub fn repo_state_hash(repo_dir: &Path) -> String {
    let mut hasher = Sha256::new();
    if let Some(commit) = get_current_commit(repo_dir) {
        hasher.update(commit.as_bytes());
    }
    if let Ok(output) = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(repo_dir)
        .output()
    {
        if output.status.success() {
            hasher.update(&output.stdout);
        }
    }
    format!("{:x}", hasher.finalize())
}
