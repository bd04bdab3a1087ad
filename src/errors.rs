//! Crate-wide error taxonomy.
//!
//! Every component boundary returns `CoreError` (or a `Result<_, CoreError>`);
//! `anyhow::Result` stays reserved for CLI/bootstrap code in `main.rs`/
//! `commands/`.

use thiserror::Error;

/// The error kinds a client-facing layer needs to map to a stable code.
/// Mirrors the taxonomy table: each variant names its source component in
/// a doc comment rather than in the variant name, since several components
/// can raise the same kind (e.g. retryable transient failures).
#[derive(Debug, Error)]
pub enum CoreError {
    /// C2: extension not in the allowed set.
    #[error("unsupported file type: {0}")]
    FileValidationType(String),

    /// C2: zero bytes, or size exceeds MaxFileBytes.
    #[error("invalid file size for {filename}: {reason}")]
    FileValidationSize { filename: String, reason: String },

    /// C2: file is structurally present but has no usable content.
    #[error("empty file: {0}")]
    FileValidationEmpty(String),

    /// C2: batch len > MaxDocsPerBatch.
    #[error("batch of {actual} files exceeds limit of {limit}")]
    BatchTooLarge { actual: usize, limit: usize },

    /// C2/C5: content_hash collides with an existing document under the
    /// configured duplicate-detection scope.
    #[error("duplicate document, existing id {existing_doc_id}")]
    DuplicateDocument { existing_doc_id: String },

    /// C3: both primary and fallback extraction failed (or format has no
    /// fallback and the single path failed).
    #[error("extraction failed for {filename}: {reason}")]
    ExtractionFailed { filename: String, reason: String },

    /// C3: page_count > MaxPages, raised before text is returned.
    #[error("page count {actual} exceeds limit of {limit}")]
    PageLimitExceeded { actual: usize, limit: usize },

    /// C4: document has zero non-whitespace text, so chunking produced
    /// nothing.
    #[error("document contains no extractable text")]
    EmptyDocument,

    /// C6: embedding failed after exhausting retries. `transient` records
    /// whether the final attempt looked retryable (used for logging only;
    /// by the time this is raised retries are already exhausted).
    #[error("embedding failed: {reason}")]
    EmbeddingFailed { reason: String, transient: bool },

    /// C7: vector store operation failed after exhausting retries.
    #[error("vector store failed: {reason}")]
    VectorStoreFailed { reason: String, transient: bool },

    /// C7 startup: provider dimension doesn't match the configured index.
    #[error("dimension mismatch: index expects {expected}, provider returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// C1: requested tokenizer is not registered. Fatal at startup, a
    /// per-call error otherwise.
    #[error("tokenizer unavailable: {0}")]
    TokenizerUnavailable(String),

    /// C14: generation failed after exhausting retries, or a content-policy
    /// refusal (non-retryable).
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// C15: query_text outside the [3, 1000] character bound.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// C5: entity id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else — logged in full, surfaced to clients without detail.
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl CoreError {
    /// Stable code for a structured client-facing error response (§7).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::FileValidationType(_) => "file_validation_type",
            CoreError::FileValidationSize { .. } => "file_validation_size",
            CoreError::FileValidationEmpty(_) => "file_validation_empty",
            CoreError::BatchTooLarge { .. } => "batch_too_large",
            CoreError::DuplicateDocument { .. } => "duplicate_document",
            CoreError::ExtractionFailed { .. } => "extraction_failed",
            CoreError::PageLimitExceeded { .. } => "page_limit_exceeded",
            CoreError::EmptyDocument => "empty_document",
            CoreError::EmbeddingFailed { .. } => "embedding_failed",
            CoreError::VectorStoreFailed { .. } => "vector_store_failed",
            CoreError::DimensionMismatch { .. } => "dimension_mismatch",
            CoreError::TokenizerUnavailable(_) => "tokenizer_unavailable",
            CoreError::GenerationFailed(_) => "generation_failed",
            CoreError::InvalidQuery(_) => "invalid_query",
            CoreError::NotFound(_) => "not_found",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Whether this is the kind of infra failure that should propagate to
    /// the request boundary rather than being recorded as a per-item
    /// failure (§7 propagation policy).
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            CoreError::DimensionMismatch { .. }
                | CoreError::TokenizerUnavailable(_)
                | CoreError::Internal(_)
        )
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        CoreError::Internal(err.into())
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Internal(err.into())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(err.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
