mod config;
mod stages;

pub use config::{RetrievalConfig, RetrievalTuning, SearchMode};
pub use stages::{dedup_key, PipelineContext};

use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{index::VectorSearch, types::chunk::Chunk},
};
use tracing::{debug, info, instrument};

use crate::reranking::RelevanceScorer;

use stages::{CollectCandidatesStage, DedupStage, ExpandQueryStage, RerankStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Expand,
    CollectCandidates,
    Dedup,
    Rerank,
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn into_vec(self) -> Vec<(StageKind, Duration)> {
        self.timings
    }

    pub fn stage_ms(&self, kind: StageKind) -> u128 {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d.as_millis())
            .unwrap_or(0)
    }
}

pub struct PipelineRunOutput {
    pub candidates: Vec<Chunk>,
    pub variants: Vec<String>,
    pub stage_timings: PipelineStageTimings,
}

/// Stage order for a retrieval run. Reranking is appended only when a scorer
/// is available.
pub fn default_stages(with_reranker: bool) -> Vec<BoxedStage> {
    let mut stages: Vec<BoxedStage> = vec![
        Box::new(ExpandQueryStage),
        Box::new(CollectCandidatesStage),
        Box::new(DedupStage),
    ];
    if with_reranker {
        stages.push(Box::new(RerankStage));
    }
    stages
}

/// Turn `question` into a ranked, deduplicated candidate set.
#[instrument(skip_all, fields(question_chars = question.chars().count()))]
pub async fn run_pipeline(
    searcher: &dyn VectorSearch,
    reranker: Option<&dyn RelevanceScorer>,
    question: &str,
    config: RetrievalConfig,
) -> Result<PipelineRunOutput, AppError> {
    let preview: String = question.chars().take(120).collect::<String>().replace('\n', " ");
    info!(
        preview = %preview,
        search_mode = %config.tuning.search_mode,
        reranking = reranker.is_some(),
        "Starting retrieval pipeline"
    );

    let stages = default_stages(reranker.is_some());
    let ctx = PipelineContext::new(searcher, reranker, question.to_owned(), config);
    run_with_stages(stages, ctx).await
}

async fn run_with_stages(
    stages: Vec<BoxedStage>,
    mut ctx: PipelineContext<'_>,
) -> Result<PipelineRunOutput, AppError> {
    for stage in stages {
        let start = Instant::now();
        stage.execute(&mut ctx).await?;
        let elapsed = start.elapsed();
        debug!(stage = ?stage.kind(), elapsed_ms = elapsed.as_millis(), "Stage finished");
        ctx.record_stage_duration(stage.kind(), elapsed);
    }

    let stage_timings = ctx.take_stage_timings();
    Ok(PipelineRunOutput {
        candidates: std::mem::take(&mut ctx.candidates),
        variants: std::mem::take(&mut ctx.variants),
        stage_timings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use common::{
        storage::index::{ChunkIndex, IndexHandle},
        utils::embedding::EmbeddingProvider,
    };
    use std::sync::Arc;

    /// Searcher whose diversity primitive always fails; similarity returns a fixed list.
    struct BrokenDiversity {
        chunks: Vec<Chunk>,
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl VectorSearch for BrokenDiversity {
        async fn similarity_search(&self, _query: &str, k: usize) -> Result<Vec<Chunk>, AppError> {
            self.calls.lock().expect("calls").push("similarity");
            Ok(self.chunks.iter().take(k).cloned().collect())
        }

        async fn diversity_search(
            &self,
            _query: &str,
            _k: usize,
            _fetch_k: usize,
            _lambda: f32,
        ) -> Result<Vec<Chunk>, AppError> {
            self.calls.lock().expect("calls").push("diversity");
            Err(AppError::InternalError("diversity unsupported".into()))
        }
    }

    /// Searcher returning a distinct chunk for every call.
    struct Fanout {
        next: Mutex<usize>,
    }

    #[async_trait]
    impl VectorSearch for Fanout {
        async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Chunk>, AppError> {
            self.diversity_search(query, k, k, 1.0).await
        }

        async fn diversity_search(
            &self,
            _query: &str,
            k: usize,
            _fetch_k: usize,
            _lambda: f32,
        ) -> Result<Vec<Chunk>, AppError> {
            let mut next = self.next.lock().expect("counter");
            let chunks = (0..k)
                .map(|offset| Chunk::with_source(format!("chunk {}", *next + offset), "x.pdf"))
                .collect();
            *next += k;
            Ok(chunks)
        }
    }

    fn corpus() -> Vec<Chunk> {
        vec![
            Chunk::with_source("MBA fee is 5 lakh", "mba.pdf"),
            Chunk::with_source("BCA fee is 2 lakh", "bca.pdf"),
        ]
    }

    #[tokio::test]
    async fn diversity_failure_falls_back_to_similarity() {
        let searcher = BrokenDiversity {
            chunks: corpus(),
            calls: Mutex::new(Vec::new()),
        };

        let output = run_pipeline(&searcher, None, "mba fees", RetrievalConfig::default())
            .await
            .expect("pipeline");

        let contents: Vec<_> = output.candidates.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["MBA fee is 5 lakh", "BCA fee is 2 lakh"]);

        let calls = searcher.calls.lock().expect("calls");
        let diversity = calls.iter().filter(|c| **c == "diversity").count();
        let similarity = calls.iter().filter(|c| **c == "similarity").count();
        assert_eq!(diversity, output.variants.len());
        assert_eq!(similarity, output.variants.len());
    }

    #[tokio::test]
    async fn candidate_set_never_exceeds_cap() {
        let searcher = Fanout {
            next: Mutex::new(0),
        };

        let output = run_pipeline(
            &searcher,
            None,
            "mba fees hostel",
            RetrievalConfig::default(),
        )
        .await
        .expect("pipeline");

        assert!(output.variants.len() > 1);
        assert_eq!(output.candidates.len(), 10);
        assert_eq!(output.candidates[0].content, "chunk 0");
    }

    #[tokio::test]
    async fn mba_question_ranks_mba_chunk_first() {
        let embedder = Arc::new(EmbeddingProvider::new_hashed(256).expect("embedder"));
        let index = ChunkIndex::from_chunks(corpus(), &embedder)
            .await
            .expect("index");
        let handle = IndexHandle::new(Arc::new(index), embedder);

        let output = run_pipeline(&handle, None, "mba fees", RetrievalConfig::default())
            .await
            .expect("pipeline");

        assert_eq!(output.candidates.len(), 2);
        assert_eq!(output.candidates[0].source(), Some("mba.pdf"));
        assert!(output.stage_timings.clone().into_vec().len() >= 3);
    }
}
