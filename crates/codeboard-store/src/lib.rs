pub mod coverage;
pub mod manifest;
pub mod store;
pub mod unified;
pub mod version;

pub use coverage::{build_coverage_summary, FileCoverageSummary};
pub use manifest::{AnalysisManifest, MANIFEST_FILENAME, MANIFEST_SCHEMA_VERSION};
pub use store::{clear_store_registry, store_for, AnalysisStore, StoreError, ANALYSIS_FILENAME};
pub use unified::{build_unified, parse_unified, AnalysisMetadata, UnifiedAnalysis};
pub use version::{read_version_stamp, write_version_stamp, VersionStamp, VERSION_FILENAME};
