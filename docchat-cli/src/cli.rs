//! Command-line arguments and provider wiring.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use docchat_rag::{
    ChunkerKind, EmbeddingProvider, GeminiEmbeddingProvider, HashEmbeddingProvider,
    OpenAIEmbeddingProvider, RagConfig, SerperSearchProvider, WebSearchProvider,
};
use tracing::{info, warn};

/// Chat with your documents: index files per session and retrieve context.
#[derive(Debug, Parser)]
#[command(name = "docchat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Chunk, embed, and index files into a session snapshot
    Ingest(IngestArgs),

    /// Retrieve context for a question
    Query(QueryArgs),

    /// Show the documents indexed in a session snapshot
    Info(InfoArgs),

    /// Remove a document from a session snapshot
    Remove(RemoveArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Files to index (PDF, plain text, or markdown)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Snapshot file holding the session; created if missing
    #[arg(long, short = 's', env = "DOCCHAT_SNAPSHOT", default_value = "docchat.session")]
    pub snapshot: PathBuf,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// The question to retrieve context for
    pub question: String,

    /// Snapshot file holding the session
    #[arg(long, short = 's', env = "DOCCHAT_SNAPSHOT", default_value = "docchat.session")]
    pub snapshot: PathBuf,

    /// Also search the web (needs SERPER_API_KEY)
    #[arg(long)]
    pub web: bool,

    /// Number of context items to return
    #[arg(long, short = 'k', env = "DOCCHAT_TOP_K")]
    pub top_k: Option<usize>,

    /// Print the result as JSON instead of formatted context
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Snapshot file holding the session
    #[arg(long, short = 's', env = "DOCCHAT_SNAPSHOT", default_value = "docchat.session")]
    pub snapshot: PathBuf,
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Identifier of the document (its file name at ingestion)
    pub document_id: String,

    /// Snapshot file holding the session
    #[arg(long, short = 's', env = "DOCCHAT_SNAPSHOT", default_value = "docchat.session")]
    pub snapshot: PathBuf,
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderChoice {
    /// Gemini if `GOOGLE_API_KEY` is set, else OpenAI if `OPENAI_API_KEY` is set, else hash
    Auto,
    Gemini,
    Openai,
    /// Offline feature hashing; no API key needed
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChunkerChoice {
    Fixed,
    Recursive,
}

impl From<ChunkerChoice> for ChunkerKind {
    fn from(choice: ChunkerChoice) -> Self {
        match choice {
            ChunkerChoice::Fixed => ChunkerKind::Fixed,
            ChunkerChoice::Recursive => ChunkerKind::Recursive,
        }
    }
}

/// Engine settings shared by every subcommand.
#[derive(Debug, Args)]
pub struct EngineArgs {
    /// Session identifier inside the snapshot
    #[arg(long, global = true, env = "DOCCHAT_SESSION", default_value = "default")]
    pub session: String,

    #[arg(long, global = true, env = "DOCCHAT_EMBEDDER", value_enum, default_value = "auto")]
    pub embedder: EmbedderChoice,

    /// Dimensions of the offline hash embedder
    #[arg(long, global = true, env = "DOCCHAT_HASH_DIMENSIONS", default_value_t = 256)]
    pub hash_dimensions: usize,

    /// Maximum chunk size in characters
    #[arg(long, global = true, env = "DOCCHAT_CHUNK_SIZE")]
    pub chunk_size: Option<usize>,

    /// Overlap between consecutive chunks in characters
    #[arg(long, global = true, env = "DOCCHAT_CHUNK_OVERLAP")]
    pub chunk_overlap: Option<usize>,

    #[arg(long, global = true, env = "DOCCHAT_CHUNKER", value_enum)]
    pub chunker: Option<ChunkerChoice>,

    /// Multiplier applied to web snippet scores
    #[arg(long, global = true, env = "DOCCHAT_WEB_WEIGHT")]
    pub web_weight: Option<f32>,

    /// Cap on total characters of returned context
    #[arg(long, global = true, env = "DOCCHAT_MAX_CONTEXT_CHARS")]
    pub max_context_chars: Option<usize>,

    /// Verbose logging (same as RUST_LOG=debug)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

impl EngineArgs {
    /// Build the engine configuration from defaults plus overrides.
    pub fn rag_config(&self) -> Result<RagConfig> {
        let mut builder = RagConfig::builder();
        if let Some(size) = self.chunk_size {
            builder = builder.chunk_size(size);
        }
        if let Some(overlap) = self.chunk_overlap {
            builder = builder.chunk_overlap(overlap);
        }
        if let Some(chunker) = self.chunker {
            builder = builder.chunker(chunker.into());
        }
        if let Some(weight) = self.web_weight {
            builder = builder.web_score_weight(weight);
        }
        if let Some(chars) = self.max_context_chars {
            builder = builder.max_context_chars(chars);
        }
        builder.build().context("invalid engine configuration")
    }

    /// Construct the selected embedding provider.
    pub fn embedding_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let has_key = |name: &str| std::env::var(name).is_ok_and(|v| !v.trim().is_empty());

        let choice = match self.embedder {
            EmbedderChoice::Auto if has_key("GOOGLE_API_KEY") => EmbedderChoice::Gemini,
            EmbedderChoice::Auto if has_key("OPENAI_API_KEY") => EmbedderChoice::Openai,
            EmbedderChoice::Auto => {
                warn!("no embedding API key found, using offline hash embeddings");
                EmbedderChoice::Hash
            }
            other => other,
        };

        let provider: Arc<dyn EmbeddingProvider> = match choice {
            EmbedderChoice::Gemini => Arc::new(GeminiEmbeddingProvider::from_env()?),
            EmbedderChoice::Openai => Arc::new(OpenAIEmbeddingProvider::from_env()?),
            EmbedderChoice::Hash => Arc::new(HashEmbeddingProvider::new(self.hash_dimensions)),
            EmbedderChoice::Auto => bail!("embedder selection did not resolve"),
        };
        info!(provider = provider.name(), dimensions = provider.dimensions(), "embedding provider ready");
        Ok(provider)
    }
}

/// The Serper provider if `SERPER_API_KEY` is set.
pub fn web_search_provider() -> Option<Arc<dyn WebSearchProvider>> {
    match SerperSearchProvider::from_env() {
        Ok(provider) => Some(Arc::new(provider)),
        Err(e) => {
            tracing::debug!(error = %e, "web search unavailable");
            None
        }
    }
}
