use std::collections::BTreeMap;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    OpenAI,
    Hashed,
    #[default]
    FastEmbed,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub sarvam_api_key: Option<String>,
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default = "default_primary_base_url")]
    pub primary_base_url: String,
    #[serde(default = "default_temperature")]
    pub primary_temperature: f32,
    #[serde(default = "default_secondary_model")]
    pub secondary_model: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_sarvam_base_url")]
    pub sarvam_base_url: String,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_index_dir")]
    pub index_dir: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
    #[serde(default = "default_transcripts_dir")]
    pub transcripts_dir: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackendKind,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_reranking_enabled")]
    pub reranking_enabled: bool,
    #[serde(default)]
    pub reranking_pool_size: Option<usize>,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default)]
    pub fastembed_show_download_progress: Option<bool>,
    #[serde(default)]
    pub fastembed_max_length: Option<usize>,
    #[serde(default = "default_answer_cache_capacity")]
    pub answer_cache_capacity: u64,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_query_synonyms")]
    pub query_synonyms: BTreeMap<String, Vec<String>>,
    /// Keyword to front-end page path, checked against incoming text questions.
    #[serde(default)]
    pub page_redirects: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            openai_api_key: None,
            sarvam_api_key: None,
            primary_model: default_primary_model(),
            primary_base_url: default_primary_base_url(),
            primary_temperature: default_temperature(),
            secondary_model: default_secondary_model(),
            openai_base_url: default_base_url(),
            sarvam_base_url: default_sarvam_base_url(),
            stt_model: default_stt_model(),
            data_dir: default_data_dir(),
            index_dir: default_index_dir(),
            static_dir: default_static_dir(),
            transcripts_dir: default_transcripts_dir(),
            embedding_backend: EmbeddingBackendKind::default(),
            embedding_model: None,
            embedding_dimensions: default_embedding_dimensions(),
            reranking_enabled: default_reranking_enabled(),
            reranking_pool_size: None,
            fastembed_cache_dir: None,
            fastembed_show_download_progress: None,
            fastembed_max_length: None,
            answer_cache_capacity: default_answer_cache_capacity(),
            http_port: default_http_port(),
            query_synonyms: default_query_synonyms(),
            page_redirects: BTreeMap::new(),
        }
    }
}

fn default_primary_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_primary_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

const fn default_temperature() -> f32 {
    0.3
}

fn default_secondary_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_sarvam_base_url() -> String {
    "https://api.sarvam.ai".to_string()
}

fn default_stt_model() -> String {
    "saarika:v2.5".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_index_dir() -> String {
    "./data/index".to_string()
}

fn default_static_dir() -> String {
    "./static".to_string()
}

fn default_transcripts_dir() -> String {
    "./transcripts".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    384
}

const fn default_reranking_enabled() -> bool {
    true
}

const fn default_answer_cache_capacity() -> u64 {
    256
}

const fn default_http_port() -> u16 {
    8000
}

/// Domain abbreviations seen in program brochures and the phrasings users
/// tend to type instead.
pub fn default_query_synonyms() -> BTreeMap<String, Vec<String>> {
    let entries: [(&str, &[&str]); 9] = [
        ("mba", &["master of business administration"]),
        ("bba", &["bachelor of business administration"]),
        ("mca", &["master of computer applications"]),
        ("bca", &["bachelor of computer applications"]),
        ("btech", &["bachelor of technology"]),
        ("mtech", &["master of technology"]),
        ("phd", &["doctor of philosophy"]),
        ("fees", &["fee structure", "tuition"]),
        ("hostel", &["accommodation"]),
    ];

    entries
        .into_iter()
        .map(|(key, synonyms)| {
            (
                key.to_string(),
                synonyms.iter().map(|s| (*s).to_string()).collect(),
            )
        })
        .collect()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sources_fall_back_to_defaults() {
        let config: AppConfig = Config::builder()
            .build()
            .and_then(Config::try_deserialize)
            .expect("defaults should deserialize");

        assert_eq!(config.primary_model, "gemini-1.5-flash");
        assert_eq!(config.http_port, 8000);
        assert_eq!(config.embedding_backend, EmbeddingBackendKind::FastEmbed);
        assert!(config.google_api_key.is_none());
        assert!(config.query_synonyms.contains_key("mba"));
    }

    #[test]
    fn overrides_are_applied() {
        let config: AppConfig = Config::builder()
            .set_override("http_port", 9100)
            .and_then(|b| b.set_override("embedding_backend", "hashed"))
            .and_then(|b| b.set_override("openai_api_key", "sk-test"))
            .and_then(|b| b.build())
            .and_then(Config::try_deserialize)
            .expect("overrides should deserialize");

        assert_eq!(config.http_port, 9100);
        assert_eq!(config.embedding_backend, EmbeddingBackendKind::Hashed);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
    }
}
