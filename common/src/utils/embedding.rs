use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, ensure, Context, Result};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::utils::config::{AppConfig, EmbeddingBackendKind};

/// Model used when the configuration does not name one. Multilingual, so
/// questions transcribed from Indic speech still land near English brochure text.
pub const DEFAULT_FASTEMBED_MODEL: EmbeddingModel = EmbeddingModel::ParaphraseMLMpnetBaseV2;
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Where and how FastEmbed fetches its model files.
#[derive(Debug, Clone, Default)]
pub struct FastEmbedSettings {
    pub model: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub show_download_progress: bool,
    pub max_length: Option<usize>,
}

impl FastEmbedSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let cache_dir = config.fastembed_cache_dir.as_ref().map_or_else(
            || Path::new(&config.data_dir).join("fastembed").join("embedding"),
            PathBuf::from,
        );
        Self {
            model: config.embedding_model.clone(),
            cache_dir: Some(cache_dir),
            show_download_progress: config.fastembed_show_download_progress.unwrap_or(true),
            max_length: config.fastembed_max_length,
        }
    }
}

/// Text to vector conversion for both index building and query time.
///
/// The same backend and model must be used for both; `model_code` is stored
/// in the index so a mismatch is caught on load.
#[derive(Clone)]
pub struct EmbeddingProvider {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    /// Feature hashing over lowercase word tokens. Offline and deterministic.
    Hashed { dimension: usize },
    FastEmbed {
        engine: Arc<Mutex<TextEmbedding>>,
        model: EmbeddingModel,
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            Backend::Hashed { .. } => "hashed",
            Backend::FastEmbed { .. } => "fastembed",
            Backend::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.backend {
            Backend::Hashed { dimension } | Backend::FastEmbed { dimension, .. } => *dimension,
            Backend::OpenAI { dimensions, .. } => *dimensions as usize,
        }
    }

    /// Stable identifier persisted next to an index built with this provider.
    pub fn model_code(&self) -> String {
        match &self.backend {
            Backend::FastEmbed { model, .. } => model.to_string(),
            Backend::OpenAI { model, .. } => model.clone(),
            Backend::Hashed { dimension } => format!("hashed-{dimension}"),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(vec![text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("{} returned no embedding", self.backend_label()))
    }

    /// One vector per input, in input order.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let vectors = match &self.backend {
            Backend::Hashed { dimension } => texts
                .iter()
                .map(|text| hashed_embedding(text, *dimension))
                .collect(),
            Backend::FastEmbed { engine, .. } => {
                let mut engine = engine.lock().await;
                engine
                    .embed(texts, None)
                    .context("generating fastembed embeddings")?
            }
            Backend::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .dimensions(*dimensions)
                    .build()?;
                let mut data = client.embeddings().create(request).await?.data;
                data.sort_by_key(|item| item.index);
                data.into_iter().map(|item| item.embedding).collect()
            }
        };

        ensure!(
            vectors.len() == expected,
            "{} returned {} vectors for {expected} inputs",
            self.backend_label(),
            vectors.len()
        );
        debug!(backend = self.backend_label(), count = expected, "Embedded batch");
        Ok(vectors)
    }

    /// OpenAI client for the `openai` backend, when a key is configured.
    pub fn openai_client_from_config(config: &AppConfig) -> Option<Arc<Client<OpenAIConfig>>> {
        let key = config
            .openai_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())?;
        Some(Arc::new(Client::with_config(
            OpenAIConfig::new()
                .with_api_key(key)
                .with_api_base(&config.openai_base_url),
        )))
    }

    /// Build the provider selected by `embedding_backend`.
    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self> {
        match config.embedding_backend {
            EmbeddingBackendKind::Hashed => Self::new_hashed(config.embedding_dimensions as usize),
            EmbeddingBackendKind::FastEmbed => {
                Self::new_fastembed(FastEmbedSettings::from_config(config)).await
            }
            EmbeddingBackendKind::OpenAI => {
                let client = openai_client.ok_or_else(|| {
                    anyhow!("openai embedding backend requires openai_api_key to be set")
                })?;
                let model = config
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_EMBEDDING_MODEL.to_string());
                Ok(Self::new_openai(client, model, config.embedding_dimensions))
            }
        }
    }

    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        Self {
            backend: Backend::OpenAI {
                client,
                model,
                dimensions,
            },
        }
    }

    pub async fn new_fastembed(settings: FastEmbedSettings) -> Result<Self> {
        let model = match settings.model.as_deref() {
            Some(code) => EmbeddingModel::from_str(code).map_err(|err| anyhow!(err))?,
            None => DEFAULT_FASTEMBED_MODEL,
        };

        let mut options = TextInitOptions::new(model.clone())
            .with_show_download_progress(settings.show_download_progress);
        if let Some(cache_dir) = settings.cache_dir {
            options = options.with_cache_dir(cache_dir);
        }
        if let Some(max_length) = settings.max_length {
            options = options.with_max_length(max_length);
        }

        let task_model = model.clone();
        let (engine, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let dimension = EmbeddingModel::get_model_info(&task_model)
                .map(|info| info.dim)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {task_model}"))?;
            let engine =
                TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            Ok((engine, dimension))
        })
        .await
        .context("joining FastEmbed initialisation task")??;

        info!(model = %model, dimension, "FastEmbed text model loaded");

        Ok(Self {
            backend: Backend::FastEmbed {
                engine: Arc::new(Mutex::new(engine)),
                model,
                dimension,
            },
        })
    }

    pub fn new_hashed(dimension: usize) -> Result<Self> {
        ensure!(dimension > 0, "hashed embedding dimension must be positive");
        Ok(Self {
            backend: Backend::Hashed { dimension },
        })
    }
}

/// L2-normalised bag of hashed word tokens. Sha256 keeps bucket assignment
/// identical across builds, which persisted indexes rely on.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    let tokens = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase);

    for token in tokens {
        if let Some(slot) = vector.get_mut(bucket(&token, dimension)) {
            *slot += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|value| *value /= norm);
    }
    vector
}

fn bucket(token: &str, dimension: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(digest.get(..8).unwrap_or(&[0; 8]));
    let modulus = u64::try_from(dimension).unwrap_or(u64::MAX).max(1);
    usize::try_from(u64::from_le_bytes(prefix) % modulus).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_embeddings_are_deterministic_and_normalized() {
        let provider = EmbeddingProvider::new_hashed(64).expect("hashed provider");
        let first = provider.embed("MBA fee is 5 lakh").await.expect("embed");
        let second = provider.embed("mba FEE is 5 lakh").await.expect("embed");

        assert_eq!(first, second);
        let norm: f32 = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(provider.model_code(), "hashed-64");
        assert_eq!(provider.dimension(), 64);
    }

    #[tokio::test]
    async fn hashed_batch_matches_single_embeddings() {
        let provider = EmbeddingProvider::new_hashed(32).expect("hashed provider");
        let batch = provider
            .embed_batch(vec!["hostel fees".into(), "".into()])
            .await
            .expect("batch");

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], provider.embed("hostel fees").await.expect("embed"));
        assert!(batch[1].iter().all(|v| *v == 0.0));
        assert!(provider.embed_batch(Vec::new()).await.expect("empty").is_empty());
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(EmbeddingProvider::new_hashed(0).is_err());
    }

    #[test]
    fn fastembed_settings_default_under_data_dir() {
        let config = AppConfig {
            data_dir: "/srv/kb".into(),
            ..AppConfig::default()
        };
        let settings = FastEmbedSettings::from_config(&config);
        assert_eq!(
            settings.cache_dir,
            Some(PathBuf::from("/srv/kb/fastembed/embedding"))
        );
        assert!(settings.show_download_progress);

        let config = AppConfig {
            fastembed_cache_dir: Some("/models".into()),
            fastembed_show_download_progress: Some(false),
            ..AppConfig::default()
        };
        let settings = FastEmbedSettings::from_config(&config);
        assert_eq!(settings.cache_dir, Some(PathBuf::from("/models")));
        assert!(!settings.show_download_progress);
    }
}
