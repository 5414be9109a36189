use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use common::{
    storage::{index::ChunkIndex, knowledge_base::KnowledgeBase, types::chunk::Chunk},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Embed pre-chunked documents into the persisted knowledge-base index.
#[derive(Debug, Parser)]
#[command(name = "build_index", version)]
struct Cli {
    /// JSON Lines file with one `{"content", "metadata"}` record per chunk
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Output directory [default: configured index_dir]
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Chunks embedded per provider call
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct ChunkRecord {
    content: String,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

/// Parse JSONL chunk records, skipping blank lines and empty content.
fn parse_records(input: &str) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    for (line_no, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord = serde_json::from_str(line)
            .with_context(|| format!("invalid chunk record on line {}", line_no + 1))?;
        if record.content.trim().is_empty() {
            warn!(line = line_no + 1, "Skipping chunk without content");
            continue;
        }
        chunks.push(Chunk::new(record.content, record.metadata));
    }
    Ok(chunks)
}

async fn embed_in_batches(
    chunks: Vec<Chunk>,
    embedder: &EmbeddingProvider,
    batch_size: usize,
) -> Result<ChunkIndex> {
    let mut index = ChunkIndex::new(embedder.model_code(), embedder.dimension());
    let total = chunks.len();
    let mut pending = chunks.into_iter().peekable();

    while pending.peek().is_some() {
        let batch: Vec<Chunk> = pending.by_ref().take(batch_size.max(1)).collect();
        let texts = batch.iter().map(|chunk| chunk.content.clone()).collect();
        let embeddings = embedder.embed_batch(texts).await?;
        anyhow::ensure!(
            embeddings.len() == batch.len(),
            "embedding provider returned {} vectors for {} chunks",
            embeddings.len(),
            batch.len()
        );
        for (chunk, embedding) in batch.into_iter().zip(embeddings) {
            index.insert(chunk, embedding)?;
        }
        info!(embedded = index.len(), total, "Embedding progress");
    }

    Ok(index)
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

    let raw = tokio::fs::read_to_string(&cli.input)
        .await
        .with_context(|| format!("reading {}", cli.input.display()))?;
    let chunks = parse_records(&raw)?;
    anyhow::ensure!(!chunks.is_empty(), "no chunks found in {}", cli.input.display());

    let knowledge_base = KnowledgeBase::from_config(&config).await?;
    let index = embed_in_batches(chunks, knowledge_base.embedder(), cli.batch_size).await?;

    let index_dir = cli
        .index_dir
        .unwrap_or_else(|| knowledge_base.index_dir().to_path_buf());
    index.persist(&index_dir).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_parsed_with_metadata() {
        let input = r#"{"content": "MBA fee is 5 lakh", "metadata": {"source_file": "mba.pdf", "page": 2}}

{"content": "   "}
{"content": "BCA fee is 2 lakh"}
"#;
        let chunks = parse_records(input).expect("records");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source(), Some("mba.pdf"));
        assert_eq!(chunks[0].page(), Some(2));
        assert_eq!(chunks[1].source(), None);
    }

    #[test]
    fn bad_line_is_reported_with_its_number() {
        let err = parse_records("{\"content\": \"ok\"}\nnot json\n").expect_err("bad line");
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn batches_cover_every_chunk() {
        let embedder = EmbeddingProvider::new_hashed(16).expect("hashed");
        let chunks = (0..5)
            .map(|i| Chunk::with_source(format!("chunk {i}"), "doc.pdf"))
            .collect();

        let index = embed_in_batches(chunks, &embedder, 2).await.expect("index");
        assert_eq!(index.len(), 5);
        assert_eq!(index.embedding_model, "hashed-16");
        assert_eq!(index.dimension, 16);
    }
}
