use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{
    error::AppError,
    storage::index::{ChunkIndex, IndexHandle, VectorSearch},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

/// Source of the searchable index used by the retrieval pipeline.
#[async_trait]
pub trait IndexSource: Send + Sync {
    async fn searcher(&self) -> Result<Arc<dyn VectorSearch>, AppError>;
}

/// Process-wide accessor for the persisted chunk index.
///
/// The index is read from `index_dir` on first use and kept for the rest of
/// the process lifetime; concurrent first requests wait on a single load.
/// A missing index is reported on every call until one is built, after which
/// the next call picks it up. Rebuilding an already loaded index requires a
/// restart.
pub struct KnowledgeBase {
    index_dir: PathBuf,
    embedder: Arc<EmbeddingProvider>,
    handle: OnceCell<IndexHandle>,
}

impl KnowledgeBase {
    pub fn new(index_dir: impl Into<PathBuf>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self {
            index_dir: index_dir.into(),
            embedder,
            handle: OnceCell::new(),
        }
    }

    /// Knowledge base at `config.index_dir` using the configured embedding backend.
    pub async fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let openai_client = EmbeddingProvider::openai_client_from_config(config);
        let embedder = EmbeddingProvider::from_config(config, openai_client).await?;
        info!(
            embedding_backend = embedder.backend_label(),
            embedding_dimension = embedder.dimension(),
            model_code = %embedder.model_code(),
            "Embedding provider initialized"
        );
        Ok(Self::new(&config.index_dir, Arc::new(embedder)))
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn embedder(&self) -> &Arc<EmbeddingProvider> {
        &self.embedder
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.initialized()
    }

    pub async fn load(&self) -> Result<&IndexHandle, AppError> {
        self.handle
            .get_or_try_init(|| async {
                let index = ChunkIndex::load(&self.index_dir).await?;
                let model_code = self.embedder.model_code();
                if let Err(err) = index.ensure_model(&model_code) {
                    warn!(
                        index_model = %index.embedding_model,
                        configured_model = %model_code,
                        "Refusing to query index built with a different embedding model"
                    );
                    return Err(err);
                }

                info!(
                    index_dir = %self.index_dir.display(),
                    chunks = index.len(),
                    embedding_model = %index.embedding_model,
                    "Knowledge base loaded"
                );
                Ok(IndexHandle::new(Arc::new(index), Arc::clone(&self.embedder)))
            })
            .await
    }
}

#[async_trait]
impl IndexSource for KnowledgeBase {
    async fn searcher(&self) -> Result<Arc<dyn VectorSearch>, AppError> {
        let handle = self.load().await?;
        Ok(Arc::new(handle.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::chunk::Chunk;

    fn hashed(dimension: usize) -> Arc<EmbeddingProvider> {
        Arc::new(EmbeddingProvider::new_hashed(dimension).expect("hashed provider"))
    }

    #[tokio::test]
    async fn missing_index_is_reported_and_not_memoized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let embedder = hashed(64);
        let kb = KnowledgeBase::new(dir.path(), Arc::clone(&embedder));

        assert!(matches!(kb.searcher().await, Err(AppError::IndexUnavailable)));
        assert!(!kb.is_loaded());

        let index = ChunkIndex::from_chunks(
            vec![Chunk::with_source("BCA fee is 2 lakh", "bca.pdf")],
            &embedder,
        )
        .await
        .expect("index");
        index.persist(dir.path()).await.expect("persist");

        let searcher = kb.searcher().await.expect("index should now load");
        let results = searcher.similarity_search("bca", 3).await.expect("search");
        assert_eq!(results.len(), 1);
        assert!(kb.is_loaded());
    }

    #[tokio::test]
    async fn index_from_other_model_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = ChunkIndex::from_chunks(
            vec![Chunk::with_source("MBA fee is 5 lakh", "mba.pdf")],
            &hashed(64),
        )
        .await
        .expect("index");
        index.persist(dir.path()).await.expect("persist");

        let kb = KnowledgeBase::new(dir.path(), hashed(32));
        assert!(matches!(
            kb.searcher().await,
            Err(AppError::IndexModelMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_first_use_loads_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let embedder = hashed(64);
        ChunkIndex::from_chunks(vec![Chunk::with_source("x", "x.pdf")], &embedder)
            .await
            .expect("index")
            .persist(dir.path())
            .await
            .expect("persist");

        let kb = Arc::new(KnowledgeBase::new(dir.path(), embedder));
        let (first, second) = tokio::join!(kb.load(), kb.load());
        let first = first.expect("first load");
        let second = second.expect("second load");
        assert!(std::ptr::eq(first.index(), second.index()));
    }

    #[tokio::test]
    async fn from_config_uses_configured_backend_and_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig {
            index_dir: dir.path().to_string_lossy().into_owned(),
            embedding_backend: crate::utils::config::EmbeddingBackendKind::Hashed,
            embedding_dimensions: 48,
            ..AppConfig::default()
        };

        let kb = KnowledgeBase::from_config(&config).await.expect("knowledge base");
        assert_eq!(kb.index_dir(), dir.path());
        assert_eq!(kb.embedder().model_code(), "hashed-48");
        assert!(matches!(kb.load().await, Err(AppError::IndexUnavailable)));
    }
}
