use serde::{Deserialize, Serialize};
use std::fmt;

/// Which retrieval strategy a caller wants run; determines both the stage
/// sequence and the shape of `StrategyOutput` produced (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Chunk-only hybrid retrieval, no entity enrichment.
    Default,
    /// Entity-only retrieval used to suggest knowledge-graph relationships.
    RelationshipSuggestion,
    /// Entity-only retrieval invoked from the ingestion pipeline's enrichment stage.
    Ingestion,
    /// Full hybrid search returning chunks and/or entities per `SearchTarget`.
    Search,
}

impl Default for RetrievalStrategy {
    fn default() -> Self {
        Self::Default
    }
}

impl std::str::FromStr for RetrievalStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "relationship_suggestion" => Ok(Self::RelationshipSuggestion),
            "ingestion" => Ok(Self::Ingestion),
            "search" => Ok(Self::Search),
            other => Err(format!("unknown retrieval strategy '{other}'")),
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RetrievalStrategy::Default => "default",
            RetrievalStrategy::RelationshipSuggestion => "relationship_suggestion",
            RetrievalStrategy::Ingestion => "ingestion",
            RetrievalStrategy::Search => "search",
        };
        f.write_str(label)
    }
}

/// Which half (or both) of a hybrid search result the caller wants populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTarget {
    EntitiesOnly,
    ChunksOnly,
    Both,
}

impl Default for SearchTarget {
    fn default() -> Self {
        SearchTarget::Both
    }
}

/// Tunable parameters that govern each retrieval stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTuning {
    pub entity_vector_take: usize,
    pub chunk_vector_take: usize,
    pub entity_fts_take: usize,
    pub chunk_fts_take: usize,
    pub score_threshold: f32,
    pub fallback_min_results: usize,
    pub token_budget_estimate: usize,
    pub avg_chars_per_token: usize,
    pub max_chunks_per_entity: usize,
    pub lexical_match_weight: f32,
    pub graph_traversal_seed_limit: usize,
    pub graph_neighbor_limit: usize,
    pub graph_score_decay: f32,
    pub graph_seed_min_score: f32,
    pub graph_vector_inheritance: f32,
    pub rerank_blend_weight: f32,
    pub rerank_scores_only: bool,
    pub rerank_keep_top: usize,
    /// Upper bound on how many chunks a chunk-only strategy returns.
    pub chunk_result_cap: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            entity_vector_take: 15,
            chunk_vector_take: 20,
            entity_fts_take: 10,
            chunk_fts_take: 20,
            score_threshold: 0.35,
            fallback_min_results: 10,
            token_budget_estimate: 10000,
            avg_chars_per_token: 4,
            max_chunks_per_entity: 4,
            lexical_match_weight: 0.15,
            graph_traversal_seed_limit: 5,
            graph_neighbor_limit: 6,
            graph_score_decay: 0.75,
            graph_seed_min_score: 0.4,
            graph_vector_inheritance: 0.6,
            rerank_blend_weight: 0.65,
            rerank_scores_only: false,
            rerank_keep_top: 8,
            chunk_result_cap: 20,
        }
    }
}

/// Wrapper containing strategy, tuning, and search-target selection for a single
/// retrieval call.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub strategy: RetrievalStrategy,
    pub tuning: RetrievalTuning,
    pub search_target: SearchTarget,
}

impl RetrievalConfig {
    pub fn new(tuning: RetrievalTuning) -> Self {
        Self {
            strategy: RetrievalStrategy::default(),
            tuning,
            search_target: SearchTarget::default(),
        }
    }

    pub fn with_strategy(strategy: RetrievalStrategy) -> Self {
        Self {
            strategy,
            tuning: RetrievalTuning::default(),
            search_target: SearchTarget::default(),
        }
    }

    pub fn with_tuning(strategy: RetrievalStrategy, tuning: RetrievalTuning) -> Self {
        Self {
            strategy,
            tuning,
            search_target: SearchTarget::default(),
        }
    }

    /// Create config for chat retrieval with strategy selection support.
    pub fn for_chat(strategy: RetrievalStrategy) -> Self {
        Self::with_strategy(strategy)
    }

    /// Create config for relationship suggestion (entity-only retrieval).
    pub fn for_relationship_suggestion() -> Self {
        Self::with_strategy(RetrievalStrategy::RelationshipSuggestion)
    }

    /// Create config for ingestion pipeline (entity-only retrieval).
    pub fn for_ingestion() -> Self {
        Self::with_strategy(RetrievalStrategy::Ingestion)
    }

    /// Create config for the hybrid search surface (§4.11), scoped to `target`.
    pub fn for_search(target: SearchTarget) -> Self {
        Self {
            strategy: RetrievalStrategy::Search,
            tuning: RetrievalTuning::default(),
            search_target: target,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::default(),
            tuning: RetrievalTuning::default(),
            search_target: SearchTarget::default(),
        }
    }
}
