use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{debug, error};

use codeboard_core::AnalysisInsights;

use crate::coverage::FileCoverageSummary;
use crate::unified::{build_unified, parse_unified, UnifiedAnalysis};

pub const ANALYSIS_FILENAME: &str = "analysis.json";
const LOCK_FILENAME: &str = "analysis.json.lock";
const LOCK_TIMEOUT: Duration = Duration::from_secs(120);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timed out after {timeout_secs}s waiting for lock {path}")]
    LockTimeout { path: PathBuf, timeout_secs: u64 },
    #[error("no analysis.json exists in {0}")]
    MissingAnalysis(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Cached parse of the unified file: root, flat sub-analysis map, raw JSON.
pub type Snapshot = (
    AnalysisInsights,
    BTreeMap<String, AnalysisInsights>,
    serde_json::Value,
);

/// Coordinated reader/writer for `analysis.json` with file locking and caching.
///
/// All access to a given output directory should go through one shared store
/// (see [`store_for`]). The store owns the advisory lock that serializes
/// cross-process access and an in-memory cache that is dropped before every
/// write so a stale snapshot is never used as the base for a new one.
pub struct AnalysisStore {
    output_dir: PathBuf,
    analysis_path: PathBuf,
    lock_path: PathBuf,
    cache: Mutex<Option<Snapshot>>,
}

impl AnalysisStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;
        Ok(Self {
            analysis_path: output_dir.join(ANALYSIS_FILENAME),
            lock_path: output_dir.join(LOCK_FILENAME),
            output_dir,
            cache: Mutex::new(None),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn analysis_path(&self) -> &Path {
        &self.analysis_path
    }

    /// Acquire the advisory lock, polling until the 120 s timeout. The lock is
    /// held for the lifetime of the returned handle.
    fn acquire_lock(&self) -> Result<File, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;

        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            // Call through the fs2 trait explicitly; std::fs::File has grown
            // locking methods with clashing names.
            match fs2::FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(file),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(_) => {
                    return Err(StoreError::LockTimeout {
                        path: self.lock_path.clone(),
                        timeout_secs: LOCK_TIMEOUT.as_secs(),
                    })
                }
            }
        }
    }

    /// Load and cache the unified file. Returns `None` when the file does not
    /// exist or cannot be parsed.
    pub fn read(&self) -> Result<Option<Snapshot>, StoreError> {
        let _lock = self.acquire_lock()?;
        Ok(self.read_locked())
    }

    /// Load just the root analysis.
    pub fn read_root(&self) -> Result<Option<AnalysisInsights>, StoreError> {
        Ok(self.read()?.map(|(root, _, _)| root))
    }

    /// Load a sub-analysis by component id; a component name is accepted for
    /// data written before ids existed.
    pub fn read_sub(&self, component_key: &str) -> Result<Option<AnalysisInsights>, StoreError> {
        let Some((root, sub_analyses, _)) = self.read()? else {
            return Ok(None);
        };
        Ok(lookup_sub(&root, &sub_analyses, component_key))
    }

    /// Component keys (of `analysis`'s components) that have a sub-analysis on
    /// disk.
    pub fn detect_expanded_components(
        &self,
        analysis: &AnalysisInsights,
    ) -> Result<Vec<String>, StoreError> {
        let Some((root, sub_analyses, _)) = self.read()? else {
            return Ok(Vec::new());
        };
        Ok(analysis
            .components
            .iter()
            .filter(|c| lookup_sub(&root, &sub_analyses, &c.component_id).is_some()
                || lookup_sub(&root, &sub_analyses, &c.name).is_some())
            .map(|c| c.name.clone())
            .collect())
    }

    /// Rewrite the whole file. When `sub_analyses` is `None`, sub-analyses
    /// already on disk are preserved.
    pub fn write(
        &self,
        analysis: &AnalysisInsights,
        expandable: &[String],
        sub_analyses: Option<&BTreeMap<String, AnalysisInsights>>,
        repo_name: &str,
        file_coverage_summary: Option<FileCoverageSummary>,
    ) -> Result<PathBuf> {
        let _lock = self.acquire_lock()?;
        self.invalidate_cache();
        self.write_locked(analysis, expandable, sub_analyses, repo_name, file_coverage_summary)
    }

    /// Update exactly one sub-analysis: reload the current file under the
    /// lock, overlay the entry, and rewrite. Concurrent callers updating
    /// sibling components therefore never lose each other's writes.
    pub fn write_sub(
        &self,
        sub_analysis: &AnalysisInsights,
        component_key: &str,
        expandable: Option<&[String]>,
    ) -> Result<PathBuf> {
        let _lock = self.acquire_lock()?;
        self.invalidate_cache();

        let Some((root, mut sub_analyses, raw)) = self.read_locked() else {
            error!(
                "cannot save sub-analysis: no existing {} in {}",
                ANALYSIS_FILENAME,
                self.output_dir.display()
            );
            return Err(StoreError::MissingAnalysis(self.output_dir.clone()).into());
        };

        sub_analyses.insert(component_key.to_string(), sub_analysis.clone());

        let repo_name = raw["metadata"]["repo_name"].as_str().unwrap_or("").to_string();
        let coverage = existing_coverage(&raw);
        let expandable: Vec<String> = match expandable {
            Some(keys) => keys.to_vec(),
            None => sub_analyses.keys().cloned().collect(),
        };

        self.write_locked(&root, &expandable, Some(&sub_analyses), &repo_name, coverage)
    }

    /// Write raw JSON text. Still takes the lock and drops the cache; used by
    /// callers that build the payload themselves.
    pub fn write_raw(&self, content: &str) -> Result<PathBuf> {
        let _lock = self.acquire_lock()?;
        self.invalidate_cache();
        std::fs::write(&self.analysis_path, content)
            .with_context(|| format!("failed to write {}", self.analysis_path.display()))?;
        Ok(self.analysis_path.clone())
    }

    fn invalidate_cache(&self) {
        *self.cache.lock().expect("store cache poisoned") = None;
    }

    /// Read the file; caller must hold the lock.
    fn read_locked(&self) -> Option<Snapshot> {
        {
            let cache = self.cache.lock().expect("store cache poisoned");
            if let Some(snapshot) = cache.as_ref() {
                return Some(snapshot.clone());
            }
        }

        if !self.analysis_path.exists() {
            return None;
        }
        let content = match std::fs::read_to_string(&self.analysis_path) {
            Ok(content) => content,
            Err(e) => {
                error!("failed to read {}: {e}", self.analysis_path.display());
                return None;
            }
        };
        let raw: serde_json::Value = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                error!("failed to parse {}: {e}", self.analysis_path.display());
                return None;
            }
        };
        let unified: UnifiedAnalysis = match serde_json::from_value(raw.clone()) {
            Ok(unified) => unified,
            Err(e) => {
                error!("failed to load unified analysis: {e}");
                return None;
            }
        };

        let (root, sub_analyses) = parse_unified(&unified);
        let snapshot = (root, sub_analyses, raw);
        *self.cache.lock().expect("store cache poisoned") = Some(snapshot.clone());
        Some(snapshot)
    }

    /// Serialize and write; caller must hold the lock.
    fn write_locked(
        &self,
        analysis: &AnalysisInsights,
        expandable: &[String],
        sub_analyses: Option<&BTreeMap<String, AnalysisInsights>>,
        repo_name: &str,
        file_coverage_summary: Option<FileCoverageSummary>,
    ) -> Result<PathBuf> {
        // Preserve what is on disk when the caller did not bring replacements.
        let mut repo_name = repo_name.to_string();
        let mut coverage = file_coverage_summary;
        let preserved;
        let sub_analyses = match sub_analyses {
            Some(provided) => provided,
            None => match self.read_locked() {
                Some((_, existing, raw)) => {
                    if repo_name.is_empty() {
                        repo_name = raw["metadata"]["repo_name"].as_str().unwrap_or("").to_string();
                    }
                    if coverage.is_none() {
                        coverage = existing_coverage(&raw);
                    }
                    preserved = existing;
                    &preserved
                }
                None => {
                    preserved = BTreeMap::new();
                    &preserved
                }
            },
        };

        let unified = build_unified(analysis, expandable, &repo_name, sub_analyses, coverage);
        let content = serde_json::to_string_pretty(&unified)
            .context("failed to serialize unified analysis")?;
        std::fs::write(&self.analysis_path, content)
            .with_context(|| format!("failed to write {}", self.analysis_path.display()))?;

        self.invalidate_cache();
        debug!("wrote unified analysis to {}", self.analysis_path.display());
        Ok(self.analysis_path.clone())
    }
}

fn existing_coverage(raw: &serde_json::Value) -> Option<FileCoverageSummary> {
    serde_json::from_value(raw["metadata"]["file_coverage_summary"].clone()).ok()
}

/// Resolve a sub-analysis by component id, falling back to matching the name
/// of a component anywhere in the tree against the stored keys.
fn lookup_sub(
    root: &AnalysisInsights,
    sub_analyses: &BTreeMap<String, AnalysisInsights>,
    component_key: &str,
) -> Option<AnalysisInsights> {
    if let Some(sub) = sub_analyses.get(component_key) {
        return Some(sub.clone());
    }
    let mut levels: Vec<&AnalysisInsights> = vec![root];
    levels.extend(sub_analyses.values());
    for level in levels {
        if let Some(component) = level.components.iter().find(|c| c.name == component_key) {
            if let Some(sub) = sub_analyses.get(&component.component_id) {
                return Some(sub.clone());
            }
        }
    }
    debug!("no sub-analysis found for component `{component_key}`");
    None
}

// ---------------------------------------------------------------------------
// Process-wide store registry (one store per output directory)
// ---------------------------------------------------------------------------

static STORES: Lazy<Mutex<HashMap<PathBuf, Arc<AnalysisStore>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Return the shared store for an output directory, creating it on first use.
/// All code in one process shares the same lock handle and cache this way.
pub fn store_for(output_dir: &Path) -> Result<Arc<AnalysisStore>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let key = output_dir
        .canonicalize()
        .unwrap_or_else(|_| output_dir.to_path_buf());
    let mut stores = STORES.lock().expect("store registry poisoned");
    if let Some(store) = stores.get(&key) {
        return Ok(Arc::clone(store));
    }
    let store = Arc::new(AnalysisStore::new(output_dir)?);
    stores.insert(key, Arc::clone(&store));
    Ok(store)
}

/// Drop all registered stores. Intended for tests that reuse directories.
pub fn clear_store_registry() {
    STORES.lock().expect("store registry poisoned").clear();
}
