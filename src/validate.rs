//! C2: File Validator.
//!
//! Streaming SHA-256 over raw bytes (never buffering the whole file in
//! memory), extension allow-list, size/batch/empty checks, and duplicate
//! lookup against the metadata store.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::config::{Config, DuplicateScope};
use crate::errors::{CoreError, CoreResult};
use crate::store::MetadataStore;
use crate::types::FileType;

const READ_CHUNK: usize = 64 * 1024;

/// Result of a successful `validate_file` call: everything the orchestrator
/// needs to create the Document row in one transaction (§4.9's "create row,
/// fill later" prohibition — no field here is optional).
pub struct ValidatedFile {
    pub filename: String,
    pub file_type: FileType,
    pub content_hash: String,
    pub byte_size: u64,
}

/// Rejects a batch outright before anything is persisted.
pub fn validate_batch(file_count: usize, cfg: &Config) -> CoreResult<()> {
    if file_count > cfg.max_docs_per_batch {
        return Err(CoreError::BatchTooLarge {
            actual: file_count,
            limit: cfg.max_docs_per_batch,
        });
    }
    Ok(())
}

fn allowed_extension(filename: &str) -> Option<FileType> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;
    match ext.as_str() {
        "pdf" => Some(FileType::Pdf),
        "docx" => Some(FileType::Docx),
        "txt" => Some(FileType::Txt),
        "md" | "markdown" => Some(FileType::Md),
        _ => None,
    }
}

/// Validates extension and size, and computes the content hash by
/// streaming `reader` in fixed-size chunks.
pub fn validate_file(
    filename: &str,
    byte_size: u64,
    mut reader: impl Read,
    cfg: &Config,
) -> CoreResult<ValidatedFile> {
    let file_type = allowed_extension(filename)
        .ok_or_else(|| CoreError::FileValidationType(filename.to_string()))?;

    if byte_size == 0 {
        return Err(CoreError::FileValidationEmpty(filename.to_string()));
    }
    if byte_size > cfg.max_file_bytes {
        return Err(CoreError::FileValidationSize {
            filename: filename.to_string(),
            reason: format!("{byte_size} bytes exceeds limit of {}", cfg.max_file_bytes),
        });
    }

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total_read: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total_read += n as u64;
    }
    if total_read == 0 {
        return Err(CoreError::FileValidationEmpty(filename.to_string()));
    }
    let content_hash = hex::encode(hasher.finalize());

    Ok(ValidatedFile {
        filename: filename.to_string(),
        file_type,
        content_hash,
        byte_size: total_read,
    })
}

/// Consults the metadata store for a prior document with the same
/// content_hash under the configured duplicate-detection scope.
pub fn check_duplicate(
    store: &MetadataStore,
    content_hash: &str,
    upload_id: &str,
    scope: DuplicateScope,
) -> CoreResult<Option<String>> {
    match scope {
        DuplicateScope::Global => store.find_document_by_hash_global(content_hash),
        DuplicateScope::PerUpload => store.find_document_by_hash_in_upload(content_hash, upload_id),
        // No tenant dimension is modeled in this deployment; per-tenant
        // collapses to global until a tenant id is threaded through.
        DuplicateScope::PerTenant => store.find_document_by_hash_global(content_hash),
    }
}

/// Sanitizes a filename for filesystem-safe storage by stripping
/// path-separator and reserved characters.
pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}
