use std::collections::HashSet;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{index::VectorSearch, types::chunk::Chunk},
};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::{
    query_expansion::expand,
    reranking::{rerank_candidates, RelevanceScorer},
};

use super::{
    config::{RetrievalConfig, SearchMode},
    PipelineStage, PipelineStageTimings, StageKind,
};

pub struct PipelineContext<'a> {
    pub searcher: &'a dyn VectorSearch,
    pub reranker: Option<&'a dyn RelevanceScorer>,
    pub question: String,
    pub config: RetrievalConfig,
    pub variants: Vec<String>,
    pub candidates: Vec<Chunk>,
    stage_timings: PipelineStageTimings,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        searcher: &'a dyn VectorSearch,
        reranker: Option<&'a dyn RelevanceScorer>,
        question: String,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            searcher,
            reranker,
            question,
            config,
            variants: Vec::new(),
            candidates: Vec::new(),
            stage_timings: PipelineStageTimings::default(),
        }
    }

    pub fn take_stage_timings(&mut self) -> PipelineStageTimings {
        std::mem::take(&mut self.stage_timings)
    }

    pub fn record_stage_duration(&mut self, kind: StageKind, duration: std::time::Duration) {
        self.stage_timings.record(kind, duration);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExpandQueryStage;

#[async_trait]
impl PipelineStage for ExpandQueryStage {
    fn kind(&self) -> StageKind {
        StageKind::Expand
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        ctx.variants = expand(
            &ctx.question,
            &ctx.config.synonyms,
            ctx.config.tuning.variant_limit,
        );
        debug!(variants = ?ctx.variants, "Expanded query");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CollectCandidatesStage;

#[async_trait]
impl PipelineStage for CollectCandidatesStage {
    fn kind(&self) -> StageKind {
        StageKind::CollectCandidates
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        collect_candidates(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DedupStage;

#[async_trait]
impl PipelineStage for DedupStage {
    fn kind(&self) -> StageKind {
        StageKind::Dedup
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let tuning = &ctx.config.tuning;
        let before = ctx.candidates.len();
        let candidates = std::mem::take(&mut ctx.candidates);
        ctx.candidates = dedup_by_prefix(
            candidates,
            tuning.dedup_prefix_chars,
            tuning.candidate_cap,
        );
        debug!(before, after = ctx.candidates.len(), "Deduplicated candidates");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RerankStage;

#[async_trait]
impl PipelineStage for RerankStage {
    fn kind(&self) -> StageKind {
        StageKind::Rerank
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let Some(scorer) = ctx.reranker else {
            return Ok(());
        };
        let candidates = std::mem::take(&mut ctx.candidates);
        ctx.candidates = rerank_candidates(scorer, &ctx.question, candidates).await;
        Ok(())
    }
}

#[instrument(level = "debug", skip_all, fields(variants = ctx.variants.len()))]
async fn collect_candidates(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let tuning = ctx.config.tuning.clone();
    let mut collected = Vec::new();

    // Variants are searched one after another; the index is shared read-only.
    for variant in &ctx.variants {
        let hits = match tuning.search_mode {
            SearchMode::Similarity => {
                ctx.searcher
                    .similarity_search(variant, tuning.per_query_k)
                    .await?
            }
            SearchMode::Diversity => match ctx
                .searcher
                .diversity_search(
                    variant,
                    tuning.per_query_k,
                    tuning.fetch_k,
                    tuning.diversity_lambda,
                )
                .await
            {
                Ok(hits) => hits,
                Err(err) => {
                    warn!(
                        error = %err,
                        variant = %variant,
                        "Diversity search failed; falling back to similarity search"
                    );
                    ctx.searcher
                        .similarity_search(variant, tuning.per_query_k)
                        .await?
                }
            },
        };
        collected.extend(hits);
    }

    debug!(collected = collected.len(), "Collected candidates");
    ctx.candidates = collected;
    Ok(())
}

/// Hash of the first `prefix_chars` characters of `content`.
pub fn dedup_key(content: &str, prefix_chars: usize) -> Vec<u8> {
    let prefix: String = content.chars().take(prefix_chars).collect();
    Sha256::digest(prefix.as_bytes()).to_vec()
}

/// Keep the first chunk per content-prefix key, preserving order, up to `cap`.
fn dedup_by_prefix(candidates: Vec<Chunk>, prefix_chars: usize, cap: usize) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|chunk| seen.insert(dedup_key(&chunk.content, prefix_chars)))
        .take(cap)
        .collect()
}
