use std::{collections::BTreeMap, fmt};

use common::utils::config::{default_query_synonyms, AppConfig};
use serde::{Deserialize, Serialize};

/// Primitive used for each query variant during candidate collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Maximal marginal relevance, falling back to similarity per variant on error.
    #[default]
    Diversity,
    /// Plain nearest neighbors.
    Similarity,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SearchMode::Diversity => "diversity",
            SearchMode::Similarity => "similarity",
        };
        f.write_str(label)
    }
}

/// Tunable parameters that govern each retrieval stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTuning {
    /// Upper bound on query variants produced by expansion.
    #[serde(default = "default_variant_limit")]
    pub variant_limit: usize,
    /// Chunks requested per query variant.
    #[serde(default = "default_per_query_k")]
    pub per_query_k: usize,
    /// Neighbors oversampled before diversity selection.
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// Relevance weight for diversity selection; 1.0 ignores redundancy.
    #[serde(default = "default_diversity_lambda")]
    pub diversity_lambda: f32,
    /// Chunks kept after deduplication.
    #[serde(default = "default_candidate_cap")]
    pub candidate_cap: usize,
    /// Characters of content hashed into the deduplication key.
    #[serde(default = "default_dedup_prefix_chars")]
    pub dedup_prefix_chars: usize,
    /// Top candidates formatted into the answer context.
    #[serde(default = "default_context_chunks")]
    pub context_chunks: usize,
    #[serde(default)]
    pub search_mode: SearchMode,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            variant_limit: default_variant_limit(),
            per_query_k: default_per_query_k(),
            fetch_k: default_fetch_k(),
            diversity_lambda: default_diversity_lambda(),
            candidate_cap: default_candidate_cap(),
            dedup_prefix_chars: default_dedup_prefix_chars(),
            context_chunks: default_context_chunks(),
            search_mode: SearchMode::default(),
        }
    }
}

/// Tuning plus the domain synonym table used for query expansion.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub tuning: RetrievalTuning,
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl RetrievalConfig {
    pub fn new(tuning: RetrievalTuning) -> Self {
        Self {
            tuning,
            synonyms: default_query_synonyms(),
        }
    }

    pub fn with_synonyms(mut self, synonyms: BTreeMap<String, Vec<String>>) -> Self {
        self.synonyms = synonyms;
        self
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(RetrievalTuning::default()).with_synonyms(config.query_synonyms.clone())
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self::new(RetrievalTuning::default())
    }
}

const fn default_variant_limit() -> usize {
    6
}

const fn default_per_query_k() -> usize {
    6
}

const fn default_fetch_k() -> usize {
    18
}

const fn default_diversity_lambda() -> f32 {
    0.5
}

const fn default_candidate_cap() -> usize {
    10
}

const fn default_dedup_prefix_chars() -> usize {
    256
}

const fn default_context_chunks() -> usize {
    4
}
