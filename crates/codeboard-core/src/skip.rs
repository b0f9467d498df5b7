use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;

use crate::types::normalize_path;

/// A category of ignored files, used for coverage reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipCategory {
    pub reason: &'static str,
    patterns: &'static [&'static str],
}

const CATEGORIES: &[SkipCategory] = &[
    SkipCategory {
        reason: "vcs_metadata",
        patterns: &[".git/**", "**/.git/**"],
    },
    SkipCategory {
        reason: "tests",
        patterns: &["tests/**", "**/tests/**", "test_*", "**/test_*"],
    },
    SkipCategory {
        reason: "generated",
        patterns: &[
            "__pycache__/**",
            "**/__pycache__/**",
            ".pytest_cache/**",
            "**/.pytest_cache/**",
        ],
    },
    SkipCategory {
        reason: "docs",
        patterns: &["README*", "CHANGELOG*", "LICENSE*", "CONTRIBUTING*"],
    },
    SkipCategory {
        reason: "packaging",
        patterns: &[
            "pyproject.toml",
            "setup.py",
            "setup.cfg",
            "Pipfile",
            "package.json",
            "package-lock.json",
            "tsconfig.json",
            "Cargo.toml",
            "go.mod",
            "go.sum",
        ],
    },
    SkipCategory {
        reason: "build",
        patterns: &[
            "Dockerfile*",
            "**/Dockerfile*",
            "Makefile",
            "**/Makefile",
            "justfile",
            "**/justfile",
            ".github/**",
        ],
    },
    SkipCategory {
        reason: "non_source_extension",
        patterns: &[
            "**/*.md",
            "**/*.txt",
            "**/*.rst",
            "**/*.yml",
            "**/*.yaml",
            "**/*.json",
            "**/*.toml",
            "**/*.lock",
        ],
    },
];

static GLOB_SETS: Lazy<Vec<(&'static str, GlobSet)>> = Lazy::new(|| {
    CATEGORIES
        .iter()
        .map(|category| {
            let mut builder = GlobSetBuilder::new();
            for pattern in category.patterns {
                builder.add(Glob::new(pattern).expect("skip pattern is valid"));
            }
            (
                category.reason,
                builder.build().expect("skip set builds"),
            )
        })
        .collect()
});

/// Why a path is excluded from analysis, or `None` if it is analyzable source.
pub fn skip_reason(path: &str) -> Option<&'static str> {
    let normalized = normalize_path(path);
    for (reason, set) in GLOB_SETS.iter() {
        if set.is_match(&normalized) {
            return Some(reason);
        }
    }
    None
}

/// True when a changed or assigned file should be ignored by the analysis.
pub fn should_skip_file(path: &str) -> bool {
    skip_reason(path).is_some()
}
