//! Retrieval engine configuration: match options, pagination budgets, and
//! the registered local roots the upstream-sync resolver consults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Concurrent per-location matches. Zero means sequential.
    #[serde(default = "d_match_concurrency")]
    pub match_concurrency: usize,
    /// Return partial results when at least one location succeeded.
    #[serde(default)]
    pub allow_partial: bool,
    /// Registered local roots for upstream-sync resolution.
    #[serde(default)]
    pub local_roots: Vec<LocalRoot>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_concurrency: d_match_concurrency(),
            allow_partial: false,
            local_roots: Vec::new(),
        }
    }
}

fn d_match_concurrency() -> usize {
    1
}

/// Per-page byte budget default and ceiling.
pub const DEFAULT_PAGE_LIMIT_BYTES: usize = 7000;
pub const MAX_PAGE_LIMIT_BYTES: usize = 200_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Match options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Matching knobs digested into the augmenter cache key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MatchOptions {
    #[serde(default)]
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub inclusion_patterns: Vec<String>,
    #[serde(default)]
    pub exclusion_patterns: Vec<String>,
}

impl MatchOptions {
    /// Stable digest of the options that shape an augmenter.
    pub fn digest(&self) -> String {
        let mut inclusion = self.inclusion_patterns.clone();
        inclusion.sort();
        let mut exclusion = self.exclusion_patterns.clone();
        exclusion.sort();
        format!(
            "max={};inc={};exc={}",
            self.max_file_size.map(|v| v.to_string()).unwrap_or_default(),
            inclusion.join(","),
            exclusion.join(","),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream sync
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Canonical upstream database handle (consumed by the indexing layer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamDb {
    pub driver: String,
    pub dsn: String,
    /// Workspace resource holding connection secrets, when any.
    #[serde(default)]
    pub secret_resource: Option<String>,
}

/// A registered local root the sync resolver matches by longest common
/// path prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalRoot {
    pub path: PathBuf,
    pub dataset: String,
    #[serde(default)]
    pub upstream: Option<UpstreamDb>,
    #[serde(default)]
    pub shadow_table: Option<String>,
    #[serde(default)]
    pub asset_table: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_order_insensitive() {
        let a = MatchOptions {
            max_file_size: Some(1024),
            inclusion_patterns: vec!["*.rs".into(), "*.md".into()],
            exclusion_patterns: vec![],
        };
        let b = MatchOptions {
            max_file_size: Some(1024),
            inclusion_patterns: vec!["*.md".into(), "*.rs".into()],
            exclusion_patterns: vec![],
        };
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_distinguishes_limits() {
        let a = MatchOptions::default();
        let b = MatchOptions {
            max_file_size: Some(1),
            ..Default::default()
        };
        assert_ne!(a.digest(), b.digest());
    }
}
