use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use codeboard_core::{normalize_path, AnalysisInsights, SourceCodeReference};

use crate::result::StaticAnalysis;

/// Extensions probed when interpreting a qualified name as a file path.
const KNOWN_EXTENSIONS: &[&str] = &["py", "ts", "tsx", "js", "go", "java", "rs"];

/// A path (and optional line range) returned by the last-resort collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub file_path: String,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

/// Last-resort path resolution, backed by an external language model.
pub trait LlmPathResolver {
    fn resolve_path(
        &self,
        qualified_name: &str,
        candidate_files: &[String],
        repo_dir: &Path,
    ) -> Option<ResolvedPath>;
}

/// Resolves every key entity in an analysis to a concrete file and, when the
/// static index knows the entity, a 1-based line range.
pub struct ReferenceResolver<'a> {
    repo_dir: PathBuf,
    static_analysis: &'a StaticAnalysis,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(repo_dir: impl Into<PathBuf>, static_analysis: &'a StaticAnalysis) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            static_analysis,
        }
    }

    /// Run the resolution cascade over every component's key entities, drop
    /// what stays unresolved, and relativize all surviving paths.
    pub fn resolve_references(
        &self,
        analysis: &mut AnalysisInsights,
        llm: Option<&dyn LlmPathResolver>,
    ) {
        for component in &mut analysis.components {
            let candidates = component.assigned_files.clone();
            for reference in &mut component.key_entities {
                if self.reference_is_resolved(reference) {
                    continue;
                }
                self.resolve_single(reference, &candidates, llm);
            }
        }
        self.drop_unresolved(analysis);
        self.relativize(analysis);
    }

    fn reference_is_resolved(&self, reference: &SourceCodeReference) -> bool {
        reference
            .reference_file
            .as_deref()
            .is_some_and(|file| self.file_exists(file))
    }

    /// Existence is always evaluated against the repo directory, never the
    /// process working directory.
    fn file_exists(&self, file: &str) -> bool {
        let path = Path::new(file);
        if path.is_absolute() {
            path.exists()
        } else {
            self.repo_dir.join(path).exists()
        }
    }

    fn resolve_single(
        &self,
        reference: &mut SourceCodeReference,
        candidates: &[String],
        llm: Option<&dyn LlmPathResolver>,
    ) {
        let qname = reference
            .qualified_name
            .replace(['/', '\\'], ".");

        for language in self.static_analysis.get_languages() {
            if self.try_exact(reference, &qname, &language) {
                return;
            }
            if self.try_loose(reference, &qname, &language) {
                return;
            }
        }
        if self.try_existing_file(reference) {
            return;
        }
        if self.try_qualified_name_as_path(reference, &qname, candidates) {
            return;
        }
        if let Some(llm) = llm {
            if self.try_llm(reference, &qname, candidates, llm) {
                return;
            }
        }
        warn!(
            "could not resolve reference `{}` in any language",
            reference.qualified_name
        );
    }

    fn try_exact(
        &self,
        reference: &mut SourceCodeReference,
        qname: &str,
        language: &str,
    ) -> bool {
        match self.static_analysis.get_reference(language, qname) {
            Ok(node) => {
                reference.reference_file = Some(node.file_path.clone());
                // Static-analysis lines are 0-based.
                reference.reference_start_line = Some(node.line_start + 1);
                reference.reference_end_line = Some(node.line_end + 1);
                reference.qualified_name = qname.to_string();
                info!("matched `{qname}` in {language} at {}", node.file_path);
                true
            }
            Err(e) => {
                debug!("exact match failed for `{qname}` in {language}: {e}");
                false
            }
        }
    }

    fn try_loose(
        &self,
        reference: &mut SourceCodeReference,
        qname: &str,
        language: &str,
    ) -> bool {
        let Some((matched, node)) = self.static_analysis.get_loose_reference(language, qname)
        else {
            return false;
        };
        reference.reference_file = Some(node.file_path.clone());
        reference.reference_start_line = Some(node.line_start + 1);
        reference.reference_end_line = Some(node.line_end + 1);
        reference.qualified_name = qname.to_string();
        info!("loosely matched `{qname}` as `{matched}` in {language}");
        true
    }

    /// The collaborator may have supplied a usable relative path already.
    fn try_existing_file(&self, reference: &mut SourceCodeReference) -> bool {
        let Some(file) = reference.reference_file.clone() else {
            return false;
        };
        if Path::new(&file).is_absolute() {
            return false;
        }
        let joined = self.repo_dir.join(&file);
        if joined.exists() {
            reference.reference_file = Some(joined.to_string_lossy().to_string());
            debug!("existing file path accepted for `{}`", reference.qualified_name);
            true
        } else {
            reference.reference_file = None;
            false
        }
    }

    fn try_qualified_name_as_path(
        &self,
        reference: &mut SourceCodeReference,
        qname: &str,
        candidates: &[String],
    ) -> bool {
        let qname_path = qname.replace('.', "/");
        let mut probes: Vec<String> = vec![qname_path.clone()];
        for ext in KNOWN_EXTENSIONS {
            probes.push(format!("{qname_path}.{ext}"));
        }
        // The final qname segment may be an element of a module rather than a
        // subpackage: `a/b/c` then lives in `a/b.c`.
        if let Some((dir, base)) = qname_path.rsplit_once('/') {
            probes.push(format!("{dir}.{base}"));
        }

        for probe in probes {
            if self.file_exists(&probe) {
                reference.reference_file = Some(probe.clone());
                info!("path matched for `{}` at {probe}", reference.qualified_name);
                return true;
            }
        }

        // Probe the component's assigned files as suffix candidates.
        for candidate in candidates {
            if !self.file_exists(candidate) {
                continue;
            }
            if candidate_matches_qname(candidate, &qname_path) {
                reference.reference_file = Some(candidate.clone());
                info!(
                    "assigned-file matched for `{}` at {candidate}",
                    reference.qualified_name
                );
                return true;
            }
        }
        false
    }

    fn try_llm(
        &self,
        reference: &mut SourceCodeReference,
        qname: &str,
        candidates: &[String],
        llm: &dyn LlmPathResolver,
    ) -> bool {
        let Some(resolved) = llm.resolve_path(qname, candidates, &self.repo_dir) else {
            return false;
        };
        let accepted = self.file_exists(&resolved.file_path)
            || candidates.iter().any(|c| c == &resolved.file_path);
        if !accepted {
            warn!(
                "collaborator returned a nonexistent path for `{qname}`: {}",
                resolved.file_path
            );
            return false;
        }
        reference.reference_file = Some(resolved.file_path);
        reference.reference_start_line = resolved.start_line;
        reference.reference_end_line = resolved.end_line;
        info!("collaborator resolved `{qname}`");
        true
    }

    fn drop_unresolved(&self, analysis: &mut AnalysisInsights) {
        for component in &mut analysis.components {
            let before = component.key_entities.len();
            let repo_dir = &self.repo_dir;
            component.key_entities.retain(|reference| {
                reference.reference_file.as_deref().is_some_and(|file| {
                    let path = Path::new(file);
                    if path.is_absolute() {
                        path.exists()
                    } else {
                        repo_dir.join(path).exists()
                    }
                })
            });
            let removed = before - component.key_entities.len();
            if removed > 0 {
                warn!(
                    "removed {removed} unresolved reference(s) from component `{}`",
                    component.name
                );
            }
        }
    }

    /// Convert absolute paths under the repo directory to repo-relative form.
    fn relativize(&self, analysis: &mut AnalysisInsights) {
        for component in &mut analysis.components {
            for reference in &mut component.key_entities {
                let Some(file) = reference.reference_file.as_deref() else {
                    continue;
                };
                let relative = Path::new(file)
                    .strip_prefix(&self.repo_dir)
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|_| file.to_string());
                reference.reference_file = Some(normalize_path(&relative));
            }
        }
    }
}

/// True when an assigned file plausibly holds the entity: its extension-less
/// path is a suffix of the qname path (or vice versa), or its stem equals the
/// final qname segment.
fn candidate_matches_qname(candidate: &str, qname_path: &str) -> bool {
    let normalized = normalize_path(candidate);
    let without_ext = normalized
        .rsplit_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or(normalized.clone());
    if qname_path.ends_with(&without_ext) || without_ext.ends_with(qname_path) {
        return true;
    }
    let stem = without_ext.rsplit('/').next().unwrap_or(&without_ext);
    let last_segment = qname_path.rsplit('/').next().unwrap_or(qname_path);
    stem == last_segment
}
