use std::sync::Arc;

use common::utils::config::AppConfig;
use retrieval_pipeline::QuestionAnswering;
use speech_services::{TranscriptionProvider, TranslationProvider};

#[derive(Clone)]
pub struct ApiState {
    pub answerer: Arc<dyn QuestionAnswering>,
    pub transcriber: Arc<dyn TranscriptionProvider>,
    pub translator: Arc<dyn TranslationProvider>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(
        config: &AppConfig,
        answerer: Arc<dyn QuestionAnswering>,
        transcriber: Arc<dyn TranscriptionProvider>,
        translator: Arc<dyn TranslationProvider>,
    ) -> Self {
        Self {
            answerer,
            transcriber,
            translator,
            config: config.clone(),
        }
    }
}
