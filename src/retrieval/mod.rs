//! C10-C13: retrieval stack (§4.10-4.13).
//!
//! `keyword` (BM25 via tantivy), `semantic` (C6+C7), `hybrid` (Reciprocal
//! Rank Fusion over the two, with a convex-combination kept as an alternate
//! strategy), `mmr` (pure cosine-similarity diversification).

pub mod hybrid;
pub mod keyword;
pub mod mmr;
pub mod semantic;

use uuid::Uuid;

/// A scored chunk id, the common currency between retrieval stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub score: f32,
}

/// Which chunks a keyword/semantic search is restricted to.
#[derive(Debug, Clone)]
pub enum RetrievalScope {
    Upload(Uuid),
    Document(Uuid),
    Global,
}
