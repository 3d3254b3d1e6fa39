use super::{
    stages::{
        AssembleEntitiesStage, ChunkAssembleStage, ChunkAttachStage, ChunkRerankStage,
        ChunkVectorStage, CollectCandidatesStage, EmbedStage, GraphExpansionStage, PipelineContext,
        RerankStage,
    },
    BoxedStage, StrategyDriver,
};
use crate::{RetrievedChunk, RetrievedEntity, SearchResult};
use common::error::AppError;

use super::config::SearchTarget;

/// Chunk-only hybrid retrieval: no entity enrichment, just ranked chunks.
pub struct DefaultStrategyDriver;

impl DefaultStrategyDriver {
    pub fn new() -> Self {
        Self
    }
}

impl StrategyDriver for DefaultStrategyDriver {
    type Output = Vec<RetrievedChunk>;

    fn stages(&self) -> Vec<BoxedStage> {
        vec![
            Box::new(EmbedStage),
            Box::new(ChunkVectorStage),
            Box::new(ChunkRerankStage),
            Box::new(ChunkAssembleStage),
        ]
    }

    fn finalize(&self, ctx: &mut PipelineContext<'_>) -> Result<Self::Output, AppError> {
        Ok(ctx.take_chunk_results())
    }
}

/// Entity-only retrieval feeding relationship-suggestion prompts.
pub struct RelationshipSuggestionDriver;

impl RelationshipSuggestionDriver {
    pub fn new() -> Self {
        Self
    }
}

impl StrategyDriver for RelationshipSuggestionDriver {
    type Output = Vec<RetrievedEntity>;

    fn stages(&self) -> Vec<BoxedStage> {
        vec![
            Box::new(EmbedStage),
            Box::new(CollectCandidatesStage),
            Box::new(GraphExpansionStage),
            Box::new(ChunkAttachStage),
            Box::new(RerankStage),
            Box::new(AssembleEntitiesStage),
        ]
    }

    fn finalize(&self, ctx: &mut PipelineContext<'_>) -> Result<Self::Output, AppError> {
        Ok(ctx.take_entity_results())
    }
}

/// Entity-only retrieval invoked from the ingestion pipeline's enrichment stage.
/// Same stage sequence as relationship suggestion; kept distinct so tuning can
/// diverge later without entangling the two call sites.
pub struct IngestionDriver;

impl IngestionDriver {
    pub fn new() -> Self {
        Self
    }
}

impl StrategyDriver for IngestionDriver {
    type Output = Vec<RetrievedEntity>;

    fn stages(&self) -> Vec<BoxedStage> {
        vec![
            Box::new(EmbedStage),
            Box::new(CollectCandidatesStage),
            Box::new(GraphExpansionStage),
            Box::new(ChunkAttachStage),
            Box::new(RerankStage),
            Box::new(AssembleEntitiesStage),
        ]
    }

    fn finalize(&self, ctx: &mut PipelineContext<'_>) -> Result<Self::Output, AppError> {
        Ok(ctx.take_entity_results())
    }
}

/// Full hybrid search: runs the shared candidate-collection/graph/chunk-attach
/// pipeline, then assembles whichever half(s) of the result `target` asks for.
pub struct SearchStrategyDriver {
    target: SearchTarget,
}

impl SearchStrategyDriver {
    pub fn new(target: SearchTarget) -> Self {
        Self { target }
    }
}

impl StrategyDriver for SearchStrategyDriver {
    type Output = SearchResult;

    fn stages(&self) -> Vec<BoxedStage> {
        vec![
            Box::new(EmbedStage),
            Box::new(CollectCandidatesStage),
            Box::new(GraphExpansionStage),
            Box::new(ChunkAttachStage),
            Box::new(RerankStage),
        ]
    }

    fn finalize(&self, ctx: &mut PipelineContext<'_>) -> Result<Self::Output, AppError> {
        let entities = if matches!(
            self.target,
            SearchTarget::EntitiesOnly | SearchTarget::Both
        ) {
            ctx.filtered_entities
                .iter()
                .map(|scored| RetrievedEntity {
                    entity: scored.item.clone(),
                    score: scored.fused,
                    chunks: Vec::new(),
                })
                .collect()
        } else {
            Vec::new()
        };

        let chunks = if matches!(self.target, SearchTarget::ChunksOnly | SearchTarget::Both) {
            ctx.chunk_values
                .iter()
                .map(|scored| RetrievedChunk {
                    chunk: scored.item.clone(),
                    score: scored.fused,
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(SearchResult::new(chunks, entities))
    }
}
