//! Document indexing-status and reindex command handlers.

use std::path::Path;

use anyhow::Result;
use uuid::Uuid;

use docuquery::config::Config;
use docuquery::server::AppState;

pub async fn run_status(data_dir: &Path, document_id: Uuid) -> Result<()> {
    let cfg = Config::load(data_dir)?;
    let state = AppState::build(cfg).await?;

    let status = state.indexer.status(document_id);
    println!("document {document_id}");
    println!("  total:   {}", status.total_chunks);
    println!("  indexed: {}", status.indexed_chunks);
    println!("  pending: {}", status.pending_chunks);
    println!("  percent: {:.1}%", status.percent);
    Ok(())
}

pub async fn run_reindex(data_dir: &Path, document_id: Uuid) -> Result<()> {
    let cfg = Config::load(data_dir)?;
    let state = AppState::build(cfg).await?;

    let outcome = state.indexer.reindex_document(document_id).await;
    println!(
        "reindexed {document_id}: {} indexed, {} skipped, {} failed",
        outcome.indexed, outcome.skipped, outcome.failed
    );
    Ok(())
}
