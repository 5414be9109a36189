use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use common::{
    storage::knowledge_base::KnowledgeBase,
    utils::config::{get_config, AppConfig},
};
use retrieval_pipeline::{AnswerPipeline, QuestionAnswering};
use speech_services::{answer_from_transcript, SarvamTranslator, TranslationProvider};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LATEST_TRANSCRIPT: &str = "latest_transcript.txt";
const LATEST_ANSWER: &str = "latest_answer.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
enum Mode {
    /// Answer the transcript once and exit
    Once,
    /// Re-answer whenever the transcript file changes
    Watch,
}

/// Answer a transcript file from the knowledge base.
#[derive(Debug, Parser)]
#[command(name = "ask", version)]
struct Cli {
    /// Transcript file [default: <transcripts_dir>/latest_transcript.txt]
    #[arg(long, short = 'f')]
    file: Option<PathBuf>,

    /// Language code for the final answer, e.g. hi-IN
    #[arg(long, short = 't', default_value = "en-IN")]
    target: String,

    #[arg(long, value_enum, default_value_t = Mode::Once)]
    mode: Mode,

    /// Seconds between checks in watch mode (minimum 0.1)
    #[arg(long, default_value = "1.0", value_parser = parse_poll_interval)]
    poll: Duration,
}

fn parse_poll_interval(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|err| format!("invalid number of seconds: {err}"))?;
    Duration::try_from_secs_f64(seconds.max(0.1))
        .map_err(|err| format!("poll interval out of range: {err}"))
}

struct Session {
    answerer: Arc<dyn QuestionAnswering>,
    translator: Arc<dyn TranslationProvider>,
    answer_path: PathBuf,
    target: String,
}

impl Session {
    async fn process(&self, transcript_path: &Path) -> Result<String> {
        let transcript = tokio::fs::read_to_string(transcript_path)
            .await
            .with_context(|| format!("reading transcript {}", transcript_path.display()))?;
        let transcript = transcript.trim();
        println!("Transcript read (len={}):", transcript.chars().count());

        let result = answer_from_transcript(
            self.answerer.as_ref(),
            self.translator.as_ref(),
            transcript,
            &self.target,
        )
        .await;

        if let Err(err) = save_answer(&self.answer_path, &result.answer).await {
            warn!(error = %err, path = %self.answer_path.display(), "Could not save answer");
        }
        println!("Answer:\n{}", result.answer);
        Ok(result.answer)
    }
}

async fn save_answer(path: &Path, answer: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, answer).await?;
    Ok(())
}

async fn modified_at(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

async fn watch(session: &Session, path: &Path, poll: Duration) -> Result<()> {
    println!("Watching {}", path.display());
    let mut last_seen = None;
    loop {
        if let Some(modified) = modified_at(path).await {
            if last_seen != Some(modified) {
                last_seen = Some(modified);
                if let Err(err) = session.process(path).await {
                    warn!(error = %err, "Failed to process transcript");
                }
            }
        }

        tokio::select! {
            () = tokio::time::sleep(poll) => {}
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for ctrl-c")?;
                println!("Stopped.");
                return Ok(());
            }
        }
    }
}

async fn build_session(config: &AppConfig, target: String) -> Result<Session> {
    let knowledge_base = Arc::new(KnowledgeBase::from_config(config).await?);
    let answerer = Arc::new(AnswerPipeline::from_config(config, knowledge_base));
    let translator = Arc::new(SarvamTranslator::new(
        reqwest::Client::new(),
        config.sarvam_base_url.clone(),
        config.sarvam_api_key.clone(),
    ));

    Ok(Session {
        answerer,
        translator,
        answer_path: Path::new(&config.transcripts_dir).join(LATEST_ANSWER),
        target,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;
    let path = cli
        .file
        .unwrap_or_else(|| Path::new(&config.transcripts_dir).join(LATEST_TRANSCRIPT));
    let session = build_session(&config, cli.target).await?;
    info!(file = %path.display(), mode = ?cli.mode, target = %session.target, "Starting");

    match cli.mode {
        Mode::Once => {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                bail!("Transcript file not found: {}", path.display());
            }
            session.process(&path).await?;
            Ok(())
        }
        Mode::Watch => watch(&session, &path, cli.poll).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::config::EmbeddingBackendKind;
    use retrieval_pipeline::answer_retrieval::NO_KNOWLEDGE_BASE;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["ask"]).expect("defaults parse");
        assert_eq!(cli.mode, Mode::Once);
        assert_eq!(cli.target, "en-IN");
        assert!(cli.file.is_none());
        assert_eq!(cli.poll, Duration::from_secs(1));

        let cli = Cli::try_parse_from(["ask", "--mode", "watch", "-t", "hi-IN", "--poll", "0.5"])
            .expect("flags parse");
        assert_eq!(cli.mode, Mode::Watch);
        assert_eq!(cli.target, "hi-IN");
        assert_eq!(cli.poll, Duration::from_millis(500));

        assert!(Cli::try_parse_from(["ask", "--mode", "forever"]).is_err());
    }

    #[test]
    fn poll_interval_is_clamped_and_bounded() {
        let cli = Cli::try_parse_from(["ask", "--poll", "0"]).expect("clamped");
        assert_eq!(cli.poll, Duration::from_millis(100));

        for value in ["inf", "1e300", "soon"] {
            assert!(
                Cli::try_parse_from(["ask", "--poll", value]).is_err(),
                "{value} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn process_writes_latest_answer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig {
            index_dir: dir.path().join("index").to_string_lossy().into_owned(),
            transcripts_dir: dir.path().join("transcripts").to_string_lossy().into_owned(),
            embedding_backend: EmbeddingBackendKind::Hashed,
            embedding_dimensions: 32,
            reranking_enabled: false,
            ..AppConfig::default()
        };
        let session = build_session(&config, "hi-IN".into())
            .await
            .expect("session");

        let transcript = dir.path().join("question.txt");
        std::fs::write(&transcript, "  mba fees  \n").expect("transcript");

        let answer = session.process(&transcript).await.expect("processed");
        assert_eq!(answer, NO_KNOWLEDGE_BASE);
        let saved = std::fs::read_to_string(dir.path().join("transcripts").join(LATEST_ANSWER))
            .expect("saved answer");
        assert_eq!(saved, NO_KNOWLEDGE_BASE);

        std::fs::write(&transcript, "   ").expect("transcript");
        let answer = session.process(&transcript).await.expect("processed");
        assert_eq!(answer, speech_services::transcript_answer::EMPTY_TRANSCRIPT);
    }

    #[tokio::test]
    async fn missing_transcript_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig {
            index_dir: dir.path().join("index").to_string_lossy().into_owned(),
            transcripts_dir: dir.path().to_string_lossy().into_owned(),
            embedding_backend: EmbeddingBackendKind::Hashed,
            reranking_enabled: false,
            ..AppConfig::default()
        };
        let session = build_session(&config, "en-IN".into())
            .await
            .expect("session");
        assert!(session.process(&dir.path().join("absent.txt")).await.is_err());
    }
}
