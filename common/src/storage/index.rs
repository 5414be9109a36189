use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{error::AppError, storage::types::chunk::Chunk, utils::embedding::EmbeddingProvider};

/// Nearest-neighbor primitives the retrieval pipeline searches through.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Chunks ordered by descending similarity to `query`.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Chunk>, AppError>;

    /// Oversamples `fetch_k` neighbors and greedily keeps `k` of them, trading
    /// relevance against redundancy with weight `lambda` (1.0 = relevance only).
    async fn diversity_search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        lambda: f32,
    ) -> Result<Vec<Chunk>, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedChunk {
    #[serde(flatten)]
    chunk: Chunk,
    embedding: Vec<f32>,
}

/// Flat, exact-search vector index persisted as a single JSON document.
///
/// The corpus is small and static, so every query scans all vectors. The
/// embedding model code is stored alongside the vectors and checked on load;
/// querying with vectors from another model would silently return noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkIndex {
    pub embedding_model: String,
    pub dimension: usize,
    chunks: Vec<IndexedChunk>,
}

impl ChunkIndex {
    pub const FILE_NAME: &'static str = "index.json";

    pub fn new(embedding_model: impl Into<String>, dimension: usize) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dimension,
            chunks: Vec::new(),
        }
    }

    /// Embed `chunks` with `embedder` and collect them into a new index.
    pub async fn from_chunks(
        chunks: Vec<Chunk>,
        embedder: &EmbeddingProvider,
    ) -> Result<Self, AppError> {
        let mut index = Self::new(embedder.model_code(), embedder.dimension());
        let texts = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let embeddings = embedder.embed_batch(texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(AppError::InternalError(format!(
                "embedding provider returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            index.insert(chunk, embedding)?;
        }

        Ok(index)
    }

    pub fn insert(&mut self, chunk: Chunk, embedding: Vec<f32>) -> Result<(), AppError> {
        if embedding.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "chunk {} has embedding dimension {}, index expects {}",
                chunk.id,
                embedding.len(),
                self.dimension
            )));
        }
        self.chunks.push(IndexedChunk { chunk, embedding });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().map(|entry| &entry.chunk)
    }

    pub fn file_path(dir: &Path) -> PathBuf {
        dir.join(Self::FILE_NAME)
    }

    pub async fn persist(&self, dir: &Path) -> Result<(), AppError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = Self::file_path(dir);
        let staging = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(self)?;
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;

        info!(
            path = %path.display(),
            chunks = self.len(),
            embedding_model = %self.embedding_model,
            "Persisted chunk index"
        );
        Ok(())
    }

    /// Load the index stored in `dir`. A missing file is `IndexUnavailable`.
    pub async fn load(dir: &Path) -> Result<Self, AppError> {
        let path = Self::file_path(dir);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No persisted index found");
                return Err(AppError::IndexUnavailable);
            }
            Err(err) => return Err(err.into()),
        };

        let index: Self = serde_json::from_slice(&bytes)?;
        if let Some(bad) = index
            .chunks
            .iter()
            .find(|entry| entry.embedding.len() != index.dimension)
        {
            return Err(AppError::Validation(format!(
                "persisted chunk {} does not match index dimension {}",
                bad.chunk.id, index.dimension
            )));
        }

        Ok(index)
    }

    pub fn ensure_model(&self, model_code: &str) -> Result<(), AppError> {
        if self.embedding_model == model_code {
            Ok(())
        } else {
            Err(AppError::IndexModelMismatch {
                indexed: self.embedding_model.clone(),
                configured: model_code.to_string(),
            })
        }
    }

    /// Positions and similarities of the `k` nearest chunks, best first.
    fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, AppError> {
        if query.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "query embedding dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(pos, entry)| {
                (
                    pos,
                    cosine_similarity(query, &entry.embedding).unwrap_or(0.0),
                )
            })
            .collect();

        // Stable, so equal scores keep index order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn similarity_search_by_vector(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Chunk>, AppError> {
        Ok(self
            .nearest(query, k)?
            .into_iter()
            .filter_map(|(pos, _)| self.chunks.get(pos))
            .map(|entry| entry.chunk.clone())
            .collect())
    }

    pub fn max_marginal_relevance_by_vector(
        &self,
        query: &[f32],
        k: usize,
        fetch_k: usize,
        lambda: f32,
    ) -> Result<Vec<Chunk>, AppError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let pool = self.nearest(query, fetch_k.max(k))?;
        let picks = select_max_marginal_relevance(&pool, k, lambda, |a, b| {
            match (self.chunks.get(a), self.chunks.get(b)) {
                (Some(lhs), Some(rhs)) => {
                    cosine_similarity(&lhs.embedding, &rhs.embedding).unwrap_or(0.0)
                }
                _ => 0.0,
            }
        });

        Ok(picks
            .into_iter()
            .filter_map(|pos| self.chunks.get(pos))
            .map(|entry| entry.chunk.clone())
            .collect())
    }
}

/// Greedy MMR over `pool` (position, relevance), best relevance first.
/// Returns selected positions in pick order.
fn select_max_marginal_relevance<F>(
    pool: &[(usize, f32)],
    k: usize,
    lambda: f32,
    similarity: F,
) -> Vec<usize>
where
    F: Fn(usize, usize) -> f32,
{
    let lambda = lambda.clamp(0.0, 1.0);
    let mut remaining: Vec<(usize, f32)> = pool.to_vec();
    let mut selected: Vec<usize> = Vec::with_capacity(k.min(pool.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best: Option<(usize, f32)> = None;
        for (slot, (pos, relevance)) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|chosen| similarity(*pos, *chosen))
                .fold(f32::MIN, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };
            let score = lambda * relevance - (1.0 - lambda) * redundancy;

            // Strictly greater, so ties go to the better-ranked neighbor.
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((slot, score));
            }
        }

        let Some((slot, _)) = best else { break };
        let (pos, _) = remaining.remove(slot);
        selected.push(pos);
    }

    selected
}

pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> Option<f32> {
    if lhs.is_empty() || lhs.len() != rhs.len() {
        return None;
    }

    let mut dot = 0.0_f32;
    let mut lhs_norm = 0.0_f32;
    let mut rhs_norm = 0.0_f32;

    for (l, r) in lhs.iter().zip(rhs.iter()) {
        dot += l * r;
        lhs_norm += l * l;
        rhs_norm += r * r;
    }

    if lhs_norm <= f32::EPSILON || rhs_norm <= f32::EPSILON {
        return None;
    }

    let score = dot / (lhs_norm.sqrt() * rhs_norm.sqrt());
    if score.is_nan() {
        return None;
    }
    Some(score.clamp(-1.0, 1.0))
}

/// Loaded index paired with the embedding model that queries it.
#[derive(Clone)]
pub struct IndexHandle {
    index: Arc<ChunkIndex>,
    embedder: Arc<EmbeddingProvider>,
}

impl IndexHandle {
    pub fn new(index: Arc<ChunkIndex>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self { index, embedder }
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, AppError> {
        self.embedder.embed(query).await.map_err(|e| {
            AppError::InternalError(format!("Failed to generate query embedding: {e}"))
        })
    }
}

#[async_trait]
impl VectorSearch for IndexHandle {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Chunk>, AppError> {
        let embedding = self.embed_query(query).await?;
        self.index.similarity_search_by_vector(&embedding, k)
    }

    async fn diversity_search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        lambda: f32,
    ) -> Result<Vec<Chunk>, AppError> {
        let embedding = self.embed_query(query).await?;
        self.index
            .max_marginal_relevance_by_vector(&embedding, k, fetch_k, lambda)
    }
}
