use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::available_parallelism,
};

use async_trait::async_trait;
use common::{error::AppError, storage::types::chunk::Chunk, utils::config::AppConfig};
use fastembed::{RerankInitOptions, RerankResult, TextRerank};
use tokio::sync::{Mutex, OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Pairwise (question, passage) relevance scoring.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// One score per document, in input order; higher is more relevant.
    async fn score(&self, query: &str, documents: Vec<String>) -> Result<Vec<f32>, AppError>;
}

static NEXT_ENGINE: AtomicUsize = AtomicUsize::new(0);

fn pick_engine_index(pool_len: usize) -> usize {
    let n = NEXT_ENGINE.fetch_add(1, Ordering::Relaxed);
    n % pool_len
}

pub struct RerankerPool {
    engines: Vec<Arc<Mutex<TextRerank>>>,
    semaphore: Arc<Semaphore>,
}

impl RerankerPool {
    /// Blocking: downloads and initializes `pool_size` cross-encoder engines.
    fn new_with_options(
        pool_size: usize,
        init_options: &RerankInitOptions,
    ) -> Result<Arc<Self>, AppError> {
        if pool_size == 0 {
            return Err(AppError::Validation(
                "reranking_pool_size must be greater than zero".to_string(),
            ));
        }

        fs::create_dir_all(&init_options.cache_dir)?;

        let mut engines = Vec::with_capacity(pool_size);
        for x in 0..pool_size {
            debug!("Creating reranking engine: {x}");
            let model = TextRerank::try_new(init_options.clone())
                .map_err(|e| AppError::RerankUnavailable(e.to_string()))?;
            engines.push(Arc::new(Mutex::new(model)));
        }

        Ok(Arc::new(Self {
            engines,
            semaphore: Arc::new(Semaphore::new(pool_size)),
        }))
    }

    /// Check out capacity and pick an engine.
    pub async fn checkout(self: &Arc<Self>) -> Result<RerankerLease, AppError> {
        // Backpressure: at most one rerank per engine at a time.
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AppError::RerankUnavailable("reranker pool closed".to_string()))?;

        let idx = pick_engine_index(self.engines.len());
        let engine = self
            .engines
            .get(idx)
            .cloned()
            .ok_or_else(|| AppError::RerankUnavailable("reranker pool is empty".to_string()))?;

        Ok(RerankerLease {
            _permit: permit,
            engine,
        })
    }
}

/// Active lease on a single TextRerank instance.
pub struct RerankerLease {
    // When this drops the semaphore permit is released.
    _permit: OwnedSemaphorePermit,
    engine: Arc<Mutex<TextRerank>>,
}

impl RerankerLease {
    pub async fn rerank(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<RerankResult>, AppError> {
        let mut guard = self.engine.lock().await;

        guard
            .rerank(query.to_owned(), documents, false, None)
            .map_err(|e| AppError::RerankUnavailable(e.to_string()))
    }
}

/// Cross-encoder scorer that loads its model on first use.
///
/// Loading happens at most once per process. A failed load is remembered and
/// every later call reports `RerankUnavailable` without retrying.
pub struct LazyReranker {
    pool_size: usize,
    init_options: RerankInitOptions,
    pool: OnceCell<Option<Arc<RerankerPool>>>,
}

impl LazyReranker {
    pub fn new(pool_size: usize, init_options: RerankInitOptions) -> Self {
        Self {
            pool_size,
            init_options,
            pool: OnceCell::new(),
        }
    }

    /// `None` when reranking is disabled in configuration.
    pub fn maybe_from_config(config: &AppConfig) -> Option<Self> {
        if !config.reranking_enabled {
            return None;
        }

        let pool_size = config.reranking_pool_size.unwrap_or_else(default_pool_size);
        Some(Self::new(pool_size, build_rerank_init_options(config)))
    }

    async fn pool(&self) -> Option<Arc<RerankerPool>> {
        self.pool
            .get_or_init(|| async {
                let pool_size = self.pool_size;
                let options = self.init_options.clone();
                let loaded = tokio::task::spawn_blocking(move || {
                    RerankerPool::new_with_options(pool_size, &options)
                })
                .await;

                match loaded {
                    Ok(Ok(pool)) => {
                        info!(pool_size, "Reranker pool initialized");
                        Some(pool)
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, "Reranker failed to load; continuing without reranking");
                        None
                    }
                    Err(err) => {
                        warn!(error = %err, "Reranker load task failed; continuing without reranking");
                        None
                    }
                }
            })
            .await
            .clone()
    }
}

#[async_trait]
impl RelevanceScorer for LazyReranker {
    async fn score(&self, query: &str, documents: Vec<String>) -> Result<Vec<f32>, AppError> {
        let pool = self
            .pool()
            .await
            .ok_or_else(|| AppError::RerankUnavailable("model failed to load".to_string()))?;

        let count = documents.len();
        let lease = pool.checkout().await?;
        let results = lease.rerank(query, documents).await?;

        let mut scores = vec![f32::MIN; count];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        Ok(scores)
    }
}

/// Reorder `candidates` by descending relevance to `question`.
///
/// Ties keep their input order. Any scoring failure leaves the input order
/// untouched; reranking never fails retrieval.
pub async fn rerank_candidates(
    scorer: &dyn RelevanceScorer,
    question: &str,
    candidates: Vec<Chunk>,
) -> Vec<Chunk> {
    if candidates.len() < 2 {
        return candidates;
    }

    let documents = candidates
        .iter()
        .map(|chunk| chunk.content.clone())
        .collect();

    match scorer.score(question, documents).await {
        Ok(scores) if scores.len() == candidates.len() => {
            // NaN scores rank last.
            let mut scored: Vec<(f32, Chunk)> = scores
                .into_iter()
                .map(|score| if score.is_nan() { f32::NEG_INFINITY } else { score })
                .zip(candidates)
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            scored.into_iter().map(|(_, chunk)| chunk).collect()
        }
        Ok(scores) => {
            warn!(
                expected = candidates.len(),
                received = scores.len(),
                "Reranker returned unexpected number of scores; keeping retrieval order"
            );
            candidates
        }
        Err(err) => {
            warn!(error = %err, "Reranking failed; keeping retrieval order");
            candidates
        }
    }
}

fn default_pool_size() -> usize {
    available_parallelism()
        .map(|value| value.get().min(2))
        .unwrap_or(2)
        .max(1)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn build_rerank_init_options(config: &AppConfig) -> RerankInitOptions {
    let mut options = RerankInitOptions::default();

    options.cache_dir = config
        .fastembed_cache_dir
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| env::var("RERANKING_CACHE_DIR").ok().map(PathBuf::from))
        .or_else(|| env::var("FASTEMBED_CACHE_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| {
            Path::new(&config.data_dir)
                .join("fastembed")
                .join("reranker")
        });

    options.show_download_progress = config
        .fastembed_show_download_progress
        .or_else(|| env_bool("RERANKING_SHOW_DOWNLOAD_PROGRESS"))
        .or_else(|| env_bool("FASTEMBED_SHOW_DOWNLOAD_PROGRESS"))
        .unwrap_or(true);

    if let Some(max_length) = config.fastembed_max_length.or_else(|| {
        env::var("RERANKING_MAX_LENGTH")
            .ok()
            .and_then(|value| value.parse().ok())
    }) {
        options.max_length = max_length;
    }

    options
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| is_truthy(&value))
}
