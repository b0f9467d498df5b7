pub mod cache;
pub mod cluster;
pub mod graph;
pub mod resolve;
pub mod result;

pub use cache::AnalysisCache;
pub use cluster::{ClusterResult, CLUSTERING_SEED, DEFAULT_TARGET_CLUSTERS};
pub use graph::{CallGraph, Node};
pub use resolve::{LlmPathResolver, ReferenceResolver, ResolvedPath};
pub use result::{ReferenceError, StaticAnalysis, StaticLookupError, TypeHierarchyEntry};
