use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pdf_chat_core::{
    collect_documents, CharacterNgramEmbedder, Embedder, GeminiChatModel, GeminiConfig,
    GeminiEmbedder, PdfChat, RagConfig, Reply, DEFAULT_FALLBACK_ANSWER,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type DynEmbedder = Box<dyn Embedder + Send + Sync>;

#[derive(Parser)]
#[command(name = "pdf-chat", version, about = "Ask questions about your PDF files")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Args)]
struct Settings {
    /// API key for the Generative Language API
    #[arg(long, env = "GOOGLE_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    /// Generative Language API base URL
    #[arg(long, env = "GEMINI_BASE_URL", default_value = pdf_chat_core::providers::gemini::DEFAULT_BASE_URL)]
    base_url: String,

    /// Embedding backend used for indexing and queries
    #[arg(long, env = "PDF_CHAT_EMBEDDER", value_enum, default_value_t = EmbedderKind::Gemini)]
    embedder: EmbedderKind,

    /// Embedding model name
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "embedding-001")]
    embedding_model: String,

    /// Chat model name
    #[arg(long, env = "CHAT_MODEL", default_value = "gemini-pro")]
    chat_model: String,

    /// Sampling temperature; lower is more deterministic
    #[arg(long, env = "TEMPERATURE", default_value = "0.3")]
    temperature: f32,

    /// Target chunk length in characters
    #[arg(long, env = "CHUNK_SIZE", default_value = "10000")]
    chunk_size: usize,

    /// Characters shared between neighbouring chunks
    #[arg(long, env = "CHUNK_OVERLAP", default_value = "1000")]
    chunk_overlap: usize,

    /// Number of chunks handed to the model as context
    #[arg(long, env = "TOP_K", default_value = "4")]
    top_k: usize,

    /// Upper bound in seconds for each embedding or model call
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    timeout_secs: u64,

    /// Concurrent embedding requests while building
    #[arg(long, env = "EMBEDDING_CONCURRENCY", default_value = "4")]
    embedding_concurrency: usize,

    /// Directory holding the index snapshot
    #[arg(long, env = "PDF_CHAT_INDEX_DIR", default_value = "faiss_index")]
    index_dir: PathBuf,

    /// Reply used when the documents do not contain the answer
    #[arg(long, env = "FALLBACK_ANSWER", default_value = DEFAULT_FALLBACK_ANSWER)]
    fallback_answer: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Remote Gemini embeddings.
    Gemini,
    /// Local character trigram hashing, no credentials needed.
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and embed PDF files, replacing the current index.
    Build {
        /// PDF files or folders searched recursively for PDFs.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Answer one question from the indexed documents.
    Ask {
        /// The question
        question: String,
        /// Print the chunks supplied as context.
        #[arg(long, default_value_t = false)]
        show_context: bool,
    },
    /// Read questions from stdin, one per line.
    Chat,
}

impl Settings {
    fn rag_config(&self) -> RagConfig {
        RagConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            top_k: self.top_k,
            request_timeout: Duration::from_secs(self.timeout_secs),
            embedding_concurrency: self.embedding_concurrency,
            index_dir: self.index_dir.clone(),
            fallback_answer: self.fallback_answer.clone(),
        }
    }

    fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            embedding_model: self.embedding_model.clone(),
            chat_model: self.chat_model.clone(),
            temperature: self.temperature,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    fn embedder(&self) -> anyhow::Result<DynEmbedder> {
        let embedder: DynEmbedder = match self.embedder {
            EmbedderKind::Gemini => Box::new(GeminiEmbedder::new(self.gemini_config())?),
            EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder::default()),
        };
        Ok(embedder)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = &cli.settings;

    if settings.api_key.is_empty() && needs_api_key(&cli.command, settings.embedder) {
        warn!("GOOGLE_API_KEY is not set; Gemini requests will be rejected");
    }

    let chat = PdfChat::new(
        settings.rag_config(),
        settings.embedder()?,
        GeminiChatModel::new(settings.gemini_config())?,
    );

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index_dir = %settings.index_dir.display(),
        "pdf-chat boot"
    );

    match cli.command {
        Command::Build { paths } => {
            let documents = collect_documents(&paths).context("reading documents")?;
            let report = chat
                .build_index(&documents)
                .await
                .with_context(|| format!("building index from {} document(s)", documents.len()))?;

            if report.pages_skipped > 0 {
                warn!(
                    skipped_pages = report.pages_skipped,
                    pages = report.pages_total,
                    "pages without extractable text were skipped"
                );
            }

            println!(
                "{} chunks from {} document(s) indexed into {} at {}",
                report.chunks,
                report.documents,
                report.snapshot.display(),
                report.built_at.to_rfc3339()
            );
        }
        Command::Ask {
            question,
            show_context,
        } => {
            answer(&chat, &question, show_context).await?;
        }
        Command::Chat => {
            let stdin = io::stdin();
            prompt()?;
            for line in stdin.lock().lines() {
                let question = line?;
                if !question.trim().is_empty() {
                    if let Err(error) = answer(&chat, &question, false).await {
                        eprintln!("error: {error:#}");
                    }
                }
                prompt()?;
            }
        }
    }

    Ok(())
}

async fn answer(
    chat: &PdfChat<DynEmbedder, GeminiChatModel>,
    question: &str,
    show_context: bool,
) -> anyhow::Result<()> {
    let reply = chat.ask(question).await.map_err(|error| {
        let hint = if error.is_retryable() { " (retryable)" } else { "" };
        anyhow::anyhow!("{error}{hint}")
    })?;

    println!("Reply: {}", reply.message());

    if let Reply::Answered(answer) = &reply {
        if show_context {
            for chunk in &answer.context {
                println!("--- chunk {} ---\n{}", chunk.index, chunk.text);
            }
        }
    }

    Ok(())
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

fn needs_api_key(command: &Command, embedder: EmbedderKind) -> bool {
    match command {
        Command::Build { .. } => matches!(embedder, EmbedderKind::Gemini),
        Command::Ask { .. } | Command::Chat => true,
    }
}
