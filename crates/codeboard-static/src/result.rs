use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{CallGraph, Node};

/// A missing per-language view in the analysis results.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StaticLookupError {
    #[error("no call graph recorded for language `{0}`")]
    MissingCallGraph(String),
    #[error("no class hierarchy recorded for language `{0}`")]
    MissingHierarchy(String),
    #[error("no package dependencies recorded for language `{0}`")]
    MissingDependencies(String),
}

/// Why a qualified name could not be resolved to an entity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("reference `{qualified_name}` not found for language `{language}`")]
    NotFound {
        language: String,
        qualified_name: String,
    },
    #[error(
        "`{qualified_name}` names a source file for language `{language}`, \
         not a code entity; use the file path instead"
    )]
    IsFilePath {
        language: String,
        qualified_name: String,
    },
}

/// One class's position in the inheritance graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeHierarchyEntry {
    pub superclasses: Vec<String>,
    pub subclasses: Vec<String>,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LanguageIndex {
    cfg: CallGraph,
    hierarchy: BTreeMap<String, TypeHierarchyEntry>,
    dependencies: BTreeMap<String, Vec<String>>,
    /// Reference keys are lowercased for case-insensitive lookup.
    references: BTreeMap<String, Node>,
    source_files: Vec<String>,
}

/// The per-language static-analysis index the rest of the system consumes.
///
/// All `add_*` methods merge rather than overwrite, so a monorepo with several
/// subprojects of the same language accumulates into one index. The whole
/// value serializes for the on-disk cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticAnalysis {
    languages: BTreeMap<String, LanguageIndex>,
}

impl StaticAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_languages(&self) -> Vec<String> {
        self.languages.keys().cloned().collect()
    }

    pub fn add_cfg(&mut self, language: &str, cfg: CallGraph) {
        let index = self.languages.entry(language.to_string()).or_default();
        if index.cfg.node_count() == 0 {
            index.cfg = cfg;
        } else {
            index.cfg.merge(&cfg);
        }
    }

    pub fn add_hierarchy(
        &mut self,
        language: &str,
        hierarchy: BTreeMap<String, TypeHierarchyEntry>,
    ) {
        self.languages
            .entry(language.to_string())
            .or_default()
            .hierarchy
            .extend(hierarchy);
    }

    pub fn add_package_dependencies(
        &mut self,
        language: &str,
        dependencies: BTreeMap<String, Vec<String>>,
    ) {
        self.languages
            .entry(language.to_string())
            .or_default()
            .dependencies
            .extend(dependencies);
    }

    pub fn add_references(&mut self, language: &str, references: Vec<Node>) {
        let index = self.languages.entry(language.to_string()).or_default();
        for node in references {
            index
                .references
                .insert(node.qualified_name.to_lowercase(), node);
        }
    }

    pub fn add_source_files(&mut self, language: &str, source_files: Vec<String>) {
        self.languages
            .entry(language.to_string())
            .or_default()
            .source_files
            .extend(source_files);
    }

    pub fn get_cfg(&self, language: &str) -> Result<&CallGraph, StaticLookupError> {
        self.languages
            .get(language)
            .filter(|index| index.cfg.node_count() > 0)
            .map(|index| &index.cfg)
            .ok_or_else(|| StaticLookupError::MissingCallGraph(language.to_string()))
    }

    pub fn get_hierarchy(
        &self,
        language: &str,
    ) -> Result<&BTreeMap<String, TypeHierarchyEntry>, StaticLookupError> {
        self.languages
            .get(language)
            .filter(|index| !index.hierarchy.is_empty())
            .map(|index| &index.hierarchy)
            .ok_or_else(|| StaticLookupError::MissingHierarchy(language.to_string()))
    }

    pub fn get_package_dependencies(
        &self,
        language: &str,
    ) -> Result<&BTreeMap<String, Vec<String>>, StaticLookupError> {
        self.languages
            .get(language)
            .filter(|index| !index.dependencies.is_empty())
            .map(|index| &index.dependencies)
            .ok_or_else(|| StaticLookupError::MissingDependencies(language.to_string()))
    }

    /// Exact, case-insensitive lookup. A qualified name that is a strict
    /// prefix of known references names a file or package, which gets its own
    /// error so callers can switch to path-based resolution.
    pub fn get_reference(
        &self,
        language: &str,
        qualified_name: &str,
    ) -> Result<&Node, ReferenceError> {
        let lower = qualified_name.to_lowercase();
        let not_found = || ReferenceError::NotFound {
            language: language.to_string(),
            qualified_name: qualified_name.to_string(),
        };
        let Some(index) = self.languages.get(language) else {
            return Err(not_found());
        };
        if let Some(node) = index.references.get(&lower) {
            return Ok(node);
        }
        if index.references.keys().any(|key| key.starts_with(&lower)) {
            return Err(ReferenceError::IsFilePath {
                language: language.to_string(),
                qualified_name: qualified_name.to_string(),
            });
        }
        Err(not_found())
    }

    /// Suffix match first; otherwise a unique substring match. Returns the
    /// matched key alongside the node so callers can log what was chosen.
    pub fn get_loose_reference(
        &self,
        language: &str,
        qualified_name: &str,
    ) -> Option<(String, &Node)> {
        let lower = qualified_name.to_lowercase();
        let index = self.languages.get(language)?;

        let mut substring_matches: Vec<&String> = Vec::new();
        for key in index.references.keys() {
            if key.ends_with(&lower) {
                return Some((key.clone(), &index.references[key]));
            }
            if key.contains(&lower) {
                substring_matches.push(key);
            }
        }
        if let [only] = substring_matches.as_slice() {
            return Some(((*only).clone(), &index.references[*only]));
        }
        None
    }

    pub fn get_source_files(&self, language: &str) -> Vec<String> {
        self.languages
            .get(language)
            .map(|index| index.source_files.clone())
            .unwrap_or_default()
    }

    pub fn get_all_source_files(&self) -> Vec<String> {
        self.languages
            .values()
            .flat_map(|index| index.source_files.iter().cloned())
            .collect()
    }
}
