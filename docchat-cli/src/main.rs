//! `docchat` command-line entry point.

mod cli;
mod extract;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use docchat_rag::{Document, RetrievalPipeline, SessionIndexRegistry};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.engine.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let registry = SessionIndexRegistry::builder()
        .config(cli.engine.rag_config()?)
        .embedding_provider(cli.engine.embedding_provider()?)
        .build()?;
    let session = cli.engine.session.as_str();

    match cli.command {
        Commands::Ingest(args) => {
            load_snapshot(&registry, session, &args.snapshot).await?;
            for path in &args.files {
                let document = read_document(path).await?;
                let summary = registry.add_document(session, &document).await?;
                println!("{}: {} chunks", summary.filename, summary.chunk_count);
            }
            save_snapshot(&registry, session, &args.snapshot).await?;
        }
        Commands::Query(args) => {
            if !load_snapshot(&registry, session, &args.snapshot).await? {
                warn!(path = %args.snapshot.display(), "no snapshot found, answering from an empty session");
            }
            let mut builder = RetrievalPipeline::builder().registry(registry.clone());
            if let Some(provider) = cli::web_search_provider() {
                builder = builder.web_search_provider(provider);
            }
            let pipeline = builder.build()?;

            let top_k = args.top_k.unwrap_or(pipeline.config().top_k);
            let result = pipeline.retrieve(session, &args.question, top_k, args.web).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.is_empty() {
                println!("No relevant context found.");
            } else {
                println!("{}", result.format_context());
            }
        }
        Commands::Info(args) => {
            load_snapshot(&registry, session, &args.snapshot).await?;
            let info = registry.get_or_create(session).await.info().await;
            println!(
                "session {}: {} documents, {} bytes, {} chunks",
                info.session_id,
                info.document_count(),
                info.total_bytes(),
                info.indexed_chunks
            );
            for doc in &info.documents {
                println!("  {}  {} bytes  {} chunks  {}", doc.id, doc.size_bytes, doc.chunk_count, doc.created_at);
            }
        }
        Commands::Remove(args) => {
            load_snapshot(&registry, session, &args.snapshot).await?;
            let removed = registry.remove_document(session, &args.document_id).await?;
            println!("removed {removed} chunks");
            save_snapshot(&registry, session, &args.snapshot).await?;
        }
    }

    Ok(())
}

/// Read a file into a document whose id is the file name, so re-ingesting
/// the same file replaces its chunks.
async fn read_document(path: &Path) -> Result<Document> {
    let extracted = extract::read_text(path).await?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut document = Document::with_id(filename.clone(), filename, extracted.text)
        .with_metadata("path", path.display().to_string());
    if let Some(pages) = extracted.pages {
        document = document.with_metadata("pages", pages.to_string());
    }
    Ok(document)
}

/// Returns whether a snapshot existed.
async fn load_snapshot(registry: &SessionIndexRegistry, session: &str, path: &Path) -> Result<bool> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    registry
        .import_session(session, &bytes)
        .await
        .with_context(|| format!("failed to load snapshot {}", path.display()))?;
    info!(path = %path.display(), "loaded session snapshot");
    Ok(true)
}

async fn save_snapshot(registry: &SessionIndexRegistry, session: &str, path: &Path) -> Result<()> {
    registry.get_or_create(session).await;
    let bytes = registry.export_session(session).await?;
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "saved session snapshot");
    Ok(())
}
