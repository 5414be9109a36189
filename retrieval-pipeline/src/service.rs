use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{knowledge_base::IndexSource, types::chunk::Chunk},
    utils::config::AppConfig,
};
use tracing::{debug, error, info, instrument};

use crate::{
    answer_retrieval::{AnswerResult, AnswerSynthesizer, EMPTY_QUESTION, NO_KNOWLEDGE_BASE},
    cache::{normalize_question, AnswerCache},
    pipeline::{run_pipeline, RetrievalConfig},
    providers::providers_from_config,
    reranking::{LazyReranker, RelevanceScorer},
};

/// Question answering over the knowledge base: retrieval, reranking,
/// synthesis and the answer cache, built once at startup and shared.
pub struct AnswerPipeline {
    index: Arc<dyn IndexSource>,
    reranker: Option<Arc<dyn RelevanceScorer>>,
    synthesizer: AnswerSynthesizer,
    config: RetrievalConfig,
    cache: AnswerCache,
}

impl AnswerPipeline {
    pub fn new(
        index: Arc<dyn IndexSource>,
        reranker: Option<Arc<dyn RelevanceScorer>>,
        synthesizer: AnswerSynthesizer,
        config: RetrievalConfig,
        cache_capacity: u64,
    ) -> Self {
        Self {
            index,
            reranker,
            synthesizer,
            config,
            cache: AnswerCache::new(cache_capacity),
        }
    }

    pub fn from_config(config: &AppConfig, index: Arc<dyn IndexSource>) -> Self {
        let retrieval = RetrievalConfig::from_app_config(config);
        let (primary, secondary) = providers_from_config(config, reqwest::Client::new());
        let synthesizer =
            AnswerSynthesizer::new(primary, secondary, retrieval.tuning.context_chunks);
        let reranker = LazyReranker::maybe_from_config(config)
            .map(|reranker| Arc::new(reranker) as Arc<dyn RelevanceScorer>);

        info!(
            reranking = reranker.is_some(),
            cache_capacity = config.answer_cache_capacity,
            "Answer pipeline configured"
        );

        Self::new(
            index,
            reranker,
            synthesizer,
            retrieval,
            config.answer_cache_capacity,
        )
    }

    /// Ranked, deduplicated candidate chunks for `question`.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<Chunk>, AppError> {
        let searcher = self.index.searcher().await?;
        let output = run_pipeline(
            searcher.as_ref(),
            self.reranker.as_deref(),
            question,
            self.config.clone(),
        )
        .await?;
        Ok(output.candidates)
    }
}

/// Answering surface used by transcript handling and the HTTP layer.
#[async_trait]
pub trait QuestionAnswering: Send + Sync {
    /// Answer `question`. Never fails; problems are reported in the result.
    async fn answer(&self, question: &str) -> AnswerResult;

    /// Succeeds once the knowledge base can be searched.
    async fn ready(&self) -> Result<(), AppError>;

    /// Clear cached answers, returning how many were dropped.
    fn invalidate_cache(&self) -> u64;
}

#[async_trait]
impl QuestionAnswering for AnswerPipeline {
    #[instrument(skip_all)]
    async fn answer(&self, question: &str) -> AnswerResult {
        let key = normalize_question(question);
        if key.is_empty() {
            return AnswerResult::failed(EMPTY_QUESTION, Vec::new());
        }

        if let Some(hit) = self.cache.get(&key) {
            debug!("Answer cache hit");
            return hit;
        }

        let candidates = match self.retrieve(question).await {
            Ok(candidates) => candidates,
            Err(AppError::IndexUnavailable) => {
                return AnswerResult::failed(NO_KNOWLEDGE_BASE, Vec::new());
            }
            Err(err) => {
                error!(error = %err, "Retrieval failed");
                return AnswerResult::failed(
                    format!("⚠️ Error retrieving answer: {err}"),
                    Vec::new(),
                );
            }
        };

        let result = self.synthesizer.synthesize(question.trim(), &candidates).await;
        self.cache.insert(key, &result);
        result
    }

    async fn ready(&self) -> Result<(), AppError> {
        self.index.searcher().await.map(|_| ())
    }

    fn invalidate_cache(&self) -> u64 {
        let evicted = self.cache.invalidate_all();
        info!(evicted, "Answer cache invalidated");
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        error::ProviderError,
        storage::{
            index::{ChunkIndex, VectorSearch},
            knowledge_base::KnowledgeBase,
        },
        utils::embedding::EmbeddingProvider,
    };
    use std::sync::Mutex;

    use crate::{
        answer_retrieval::AnswerStatus,
        providers::{ChatPrompt, ChatProvider},
    };

    struct CountingProvider {
        reply: Result<String, ProviderError>,
        calls: Mutex<usize>,
    }

    impl CountingProvider {
        fn new(reply: Result<String, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("calls")
        }
    }

    #[async_trait]
    impl ChatProvider for CountingProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, _prompt: &ChatPrompt) -> Result<String, ProviderError> {
            *self.calls.lock().expect("calls") += 1;
            self.reply.clone()
        }
    }

    struct NoIndex;

    #[async_trait]
    impl IndexSource for NoIndex {
        async fn searcher(&self) -> Result<Arc<dyn VectorSearch>, AppError> {
            Err(AppError::IndexUnavailable)
        }
    }

    /// Reverses candidate order so its effect is observable.
    struct ReverseScorer;

    #[async_trait]
    impl RelevanceScorer for ReverseScorer {
        async fn score(&self, _query: &str, documents: Vec<String>) -> Result<Vec<f32>, AppError> {
            Ok((0..documents.len()).map(|i| i as f32).collect())
        }
    }

    fn pipeline(
        index: Arc<dyn IndexSource>,
        provider: &Arc<CountingProvider>,
        reranker: Option<Arc<dyn RelevanceScorer>>,
    ) -> AnswerPipeline {
        let synthesizer =
            AnswerSynthesizer::new(Arc::clone(provider) as Arc<dyn ChatProvider>, None, 4);
        AnswerPipeline::new(index, reranker, synthesizer, RetrievalConfig::default(), 16)
    }

    async fn corpus_knowledge_base(dir: &std::path::Path) -> Arc<KnowledgeBase> {
        let embedder = Arc::new(EmbeddingProvider::new_hashed(256).expect("embedder"));
        ChunkIndex::from_chunks(
            vec![
                Chunk::with_source("MBA fee is 5 lakh", "mba.pdf"),
                Chunk::with_source("BCA fee is 2 lakh", "bca.pdf"),
            ],
            &embedder,
        )
        .await
        .expect("index")
        .persist(dir)
        .await
        .expect("persist");
        Arc::new(KnowledgeBase::new(dir, embedder))
    }

    #[tokio::test]
    async fn missing_index_reports_no_knowledge_base() {
        let provider = CountingProvider::new(Ok("unused".into()));
        let pipeline = pipeline(Arc::new(NoIndex), &provider, None);

        assert!(matches!(
            pipeline.retrieve("fees for MBA").await,
            Err(AppError::IndexUnavailable)
        ));

        let result = pipeline.answer("fees for MBA").await;
        assert!(result.answer.to_lowercase().contains("no knowledge base"));
        assert!(result.sources.is_empty());
        assert_eq!(result.status, AnswerStatus::Failed);
        assert_eq!(provider.calls(), 0);
        assert!(matches!(pipeline.ready().await, Err(AppError::IndexUnavailable)));
    }

    #[tokio::test]
    async fn answers_from_corpus_with_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = CountingProvider::new(Ok("The MBA fee is 5 lakh.".into()));
        let pipeline = pipeline(corpus_knowledge_base(dir.path()).await, &provider, None);
        assert!(pipeline.ready().await.is_ok());

        let candidates = pipeline.retrieve("mba fees").await.expect("retrieve");
        assert_eq!(candidates[0].source(), Some("mba.pdf"));

        let result = pipeline.answer("mba fees").await;
        assert_eq!(result.status, AnswerStatus::Answered);
        assert!(result.sources.iter().any(|s| s == "mba.pdf"));
    }

    #[tokio::test]
    async fn normalized_repeat_is_served_from_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = CountingProvider::new(Ok("5 lakh".into()));
        let pipeline = pipeline(corpus_knowledge_base(dir.path()).await, &provider, None);

        let first = pipeline.answer("MBA fees").await;
        let second = pipeline.answer("  mba   FEES ").await;
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);

        assert_eq!(pipeline.invalidate_cache(), 1);
        pipeline.answer("mba fees").await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn failed_answers_are_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = CountingProvider::new(Err(ProviderError::Network("down".into())));
        let pipeline = pipeline(corpus_knowledge_base(dir.path()).await, &provider, None);

        pipeline.answer("mba fees").await;
        pipeline.answer("mba fees").await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn empty_question_short_circuits() {
        let provider = CountingProvider::new(Ok("unused".into()));
        let pipeline = pipeline(Arc::new(NoIndex), &provider, None);

        let result = pipeline.answer("   ").await;
        assert_eq!(result.answer, EMPTY_QUESTION);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn reranker_reorders_candidates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = CountingProvider::new(Ok("unused".into()));
        let knowledge_base = corpus_knowledge_base(dir.path()).await;
        let plain = pipeline(Arc::clone(&knowledge_base) as Arc<dyn IndexSource>, &provider, None);
        let reranked = pipeline(knowledge_base, &provider, Some(Arc::new(ReverseScorer)));

        let mut expected = plain.retrieve("mba fees").await.expect("plain");
        expected.reverse();
        let actual = reranked.retrieve("mba fees").await.expect("reranked");
        let ids = |chunks: &[Chunk]| chunks.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&actual), ids(&expected));
    }
}
