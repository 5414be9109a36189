use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState, app_routes};
use axum::Router;
use common::{
    storage::knowledge_base::KnowledgeBase,
    utils::config::{get_config, AppConfig},
};
use retrieval_pipeline::AnswerPipeline;
use speech_services::{SarvamTranscriber, SarvamTranslator};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let knowledge_base = Arc::new(KnowledgeBase::from_config(&config).await?);

    // Warm the index so the first question does not pay for loading it.
    if let Err(err) = knowledge_base.load().await {
        warn!(error = %err, "Knowledge base not loaded; questions will report it until an index is built");
    }

    let app = build_app(&config, knowledge_base);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_app(config: &AppConfig, knowledge_base: Arc<KnowledgeBase>) -> Router {
    let http = reqwest::Client::new();
    let answerer = Arc::new(AnswerPipeline::from_config(config, knowledge_base));
    let transcriber = Arc::new(SarvamTranscriber::new(
        http.clone(),
        config.sarvam_base_url.clone(),
        config.sarvam_api_key.clone(),
        config.stt_model.clone(),
    ));
    let translator = Arc::new(SarvamTranslator::new(
        http,
        config.sarvam_base_url.clone(),
        config.sarvam_api_key.clone(),
    ));

    let api_state = ApiState::new(config, answerer, transcriber, translator);

    Router::new()
        .nest("/api/v1", api_routes_v1())
        .merge(app_routes(&api_state))
        .with_state(api_state)
}
