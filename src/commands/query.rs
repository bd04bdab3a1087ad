//! Query command handler: embed, search, print the answer with citations.

use std::path::Path;

use anyhow::Result;
use uuid::Uuid;

use docuquery::config::{Config, RetrievalMethod};
use docuquery::query::QueryOptions;
use docuquery::server::AppState;

pub async fn run_query(
    data_dir: &Path,
    query_text: &str,
    top_k: Option<usize>,
    upload: Option<Uuid>,
    method: Option<RetrievalMethod>,
) -> Result<()> {
    let cfg = Config::load(data_dir)?;
    let state = AppState::build(cfg).await?;

    let opts = QueryOptions {
        upload_filter: upload,
        retrieval_method: method,
        top_k,
        mmr_lambda: None,
    };
    let result = state.query_engine.answer(query_text, opts).await?;

    println!("Q: {}\n", result.query_text);
    println!("{}\n", result.answer_text);
    if !result.citations.is_empty() {
        println!("Citations:");
        for c in &result.citations {
            println!(
                "  [doc {} page {:?}] {}",
                c.document_id, c.page_number, c.snippet
            );
        }
    }
    println!(
        "\n({} chunks retrieved, {} used, {}ms)",
        result.retrieval_stats.chunks_retrieved, result.retrieval_stats.chunks_used, result.latency_ms
    );

    Ok(())
}
