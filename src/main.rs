//! docuquery CLI
//!
//! Document question-answering service: upload, extract, chunk, embed,
//! index, and answer questions over a corpus with citations.
//!
//! Commands:
//!   ingest  - Ingest files (or directories of files) into a new upload batch
//!   query   - Ask a question against ingested documents
//!   status  - Show a document's indexing status
//!   reindex - Force re-embedding of a document's chunks
//!   serve   - Start the HTTP API server

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use docuquery::config::{Config, RetrievalMethod};
use docuquery::server;

#[derive(Parser)]
#[command(name = "docuquery")]
#[command(about = "Document question-answering service")]
#[command(version)]
struct Cli {
    /// Data directory for storing the metadata DB, vector store, and uploaded files
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one or more files (or directories) as a new upload batch
    Ingest {
        /// Label for this batch
        #[arg(short, long, default_value = "cli-batch")]
        batch_label: String,

        /// Files or directories to ingest
        paths: Vec<PathBuf>,
    },

    /// Ask a question against the ingested corpus
    Query {
        /// The question text
        text: String,

        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict retrieval to a single upload
        #[arg(long)]
        upload: Option<Uuid>,

        /// Override the configured retrieval method
        #[arg(long)]
        method: Option<RetrievalMethodArg>,
    },

    /// Show a document's indexing status
    Status {
        document_id: Uuid,
    },

    /// Force re-embedding of a document's chunks
    Reindex {
        document_id: Uuid,
    },

    /// Start the HTTP API server
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum RetrievalMethodArg {
    Semantic,
    Keyword,
    Hybrid,
}

impl From<RetrievalMethodArg> for RetrievalMethod {
    fn from(v: RetrievalMethodArg) -> Self {
        match v {
            RetrievalMethodArg::Semantic => RetrievalMethod::Semantic,
            RetrievalMethodArg::Keyword => RetrievalMethod::Keyword,
            RetrievalMethodArg::Hybrid => RetrievalMethod::Hybrid,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.data_dir)?;

    match cli.command {
        Commands::Ingest { batch_label, paths } => {
            commands::run_ingest(&cli.data_dir, &batch_label, &paths).await?;
        }
        Commands::Query {
            text,
            top_k,
            upload,
            method,
        } => {
            commands::run_query(&cli.data_dir, &text, top_k, upload, method.map(Into::into)).await?;
        }
        Commands::Status { document_id } => {
            commands::run_status(&cli.data_dir, document_id).await?;
        }
        Commands::Reindex { document_id } => {
            commands::run_reindex(&cli.data_dir, document_id).await?;
        }
        Commands::Serve { port } => {
            println!("Starting server on http://localhost:{port} (data dir {})...", cli.data_dir.display());
            let cfg = Config::load(&cli.data_dir)?;
            server::run_server(cfg, port).await?;
        }
    }

    Ok(())
}
