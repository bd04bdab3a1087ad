//! Ingest command handler: build the embedder/stores, print progress,
//! report counts. Accepts files or directories; directories are walked
//! recursively with `walkdir`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use docuquery::config::Config;
use docuquery::ingest::IncomingFile;
use docuquery::server::AppState;

fn collect_files(paths: &[PathBuf]) -> Result<Vec<IncomingFile>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in walkdir::WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    files.push(read_one(entry.path())?);
                }
            }
        } else {
            files.push(read_one(path)?);
        }
    }
    Ok(files)
}

fn read_one(path: &Path) -> Result<IncomingFile> {
    let bytes = std::fs::read(path)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());
    Ok(IncomingFile { filename, bytes })
}

pub async fn run_ingest(data_dir: &Path, batch_label: &str, paths: &[PathBuf]) -> Result<()> {
    let cfg = Config::load(data_dir)?;
    println!("Initializing embedding model and stores...");
    let state = AppState::build(cfg).await?;

    let files = collect_files(paths)?;
    println!("Ingesting {} file(s) as batch {batch_label:?}...\n", files.len());
    let outcome = state.ingestion.ingest_batch(batch_label.to_string(), files).await?;

    // Force synchronous completion for the CLI's own accounting; indexing
    // is idempotent (vector ids are deterministic), so this just collapses
    // whatever the background worker already started.
    for doc in &outcome.documents {
        state.indexer.index_document(doc.id, false).await;
    }

    println!("Ingestion complete!");
    println!("  Upload:     {}", outcome.upload.id);
    println!("  Succeeded:  {}", outcome.upload.succeeded);
    println!("  Failed:     {}", outcome.upload.failed);
    for doc in &outcome.documents {
        println!("    {:?} -> {} ({})", doc.filename, doc.status, doc.id);
        if let Some(reason) = &doc.error_message {
            println!("      reason: {reason}");
        }
    }

    Ok(())
}
