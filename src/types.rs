//! Data model (§3): Upload, Document, Chunk, Query, plus their state enums.
//!
//! The U 1—* D 1—* K hierarchy, with `Display`/`FromStr` round trips on the
//! status enums so they serialize cleanly at storage and HTTP boundaries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
    Md,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Txt => "txt",
            FileType::Md => "md",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(FileType::Pdf),
            "docx" => Ok(FileType::Docx),
            "txt" => Ok(FileType::Txt),
            "md" => Ok(FileType::Md),
            other => Err(format!("invalid file_type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Partial,
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Partial => "partial",
        };
        write!(f, "{s}")
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "processing" => Ok(UploadStatus::Processing),
            "completed" => Ok(UploadStatus::Completed),
            "failed" => Ok(UploadStatus::Failed),
            "partial" => Ok(UploadStatus::Partial),
            other => Err(format!("invalid upload status: {other}")),
        }
    }
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Partial
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(format!("invalid document status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: Uuid,
    pub batch_label: String,
    pub status: UploadStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Upload {
    pub fn new(batch_label: String, total: usize) -> Self {
        Upload {
            id: Uuid::new_v4(),
            batch_label,
            status: UploadStatus::Processing,
            total,
            succeeded: 0,
            failed: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Sets the terminal status once all children are terminal (§4.9 step 4).
    pub fn finalize(&mut self) {
        self.status = if self.failed == 0 {
            UploadStatus::Completed
        } else if self.succeeded == 0 {
            UploadStatus::Failed
        } else {
            UploadStatus::Partial
        };
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub upload_id: Uuid,
    pub filename: String,
    pub file_type: FileType,
    pub byte_size: u64,
    pub page_count: usize,
    pub content_hash: String,
    pub storage_path: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: u32,
    pub content: String,
    pub token_count: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub page_number: Option<usize>,
    pub embedding_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Idempotent vector store id (§4.7): `"chunk:{chunk_id}"`.
    pub fn vector_id(&self) -> String {
        format!("chunk:{}", self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: Uuid,
    pub page_number: Option<usize>,
    pub snippet: String,
    pub chunk_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub top_k: usize,
    pub chunks_retrieved: usize,
    pub chunks_used: usize,
    pub retrieval_method: crate::config::RetrievalMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub query_text: String,
    pub upload_filter: Option<Uuid>,
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub used_chunk_ids: Vec<Uuid>,
    pub latency_ms: u64,
    pub retrieval_stats: RetrievalStats,
    pub created_at: DateTime<Utc>,
}

/// Vector store namespace for an upload (§4.7: `"upload:{upload_id}"`).
pub fn upload_namespace(upload_id: &Uuid) -> String {
    format!("upload:{upload_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_roundtrip() {
        for ft in [FileType::Pdf, FileType::Docx, FileType::Txt, FileType::Md] {
            let s = ft.to_string();
            assert_eq!(FileType::from_str(&s).unwrap(), ft);
        }
    }

    #[test]
    fn upload_status_roundtrip() {
        for st in [
            UploadStatus::Pending,
            UploadStatus::Processing,
            UploadStatus::Completed,
            UploadStatus::Failed,
            UploadStatus::Partial,
        ] {
            assert_eq!(UploadStatus::from_str(&st.to_string()).unwrap(), st);
        }
    }

    #[test]
    fn invalid_status_parse_errors() {
        assert!(UploadStatus::from_str("bogus").is_err());
        assert!(DocumentStatus::from_str("bogus").is_err());
    }

    #[test]
    fn upload_finalize_picks_terminal_status() {
        let mut u = Upload::new("batch".into(), 3);
        u.succeeded = 3;
        u.failed = 0;
        u.finalize();
        assert_eq!(u.status, UploadStatus::Completed);
        assert!(u.completed_at.is_some());

        let mut u2 = Upload::new("batch".into(), 3);
        u2.succeeded = 0;
        u2.failed = 3;
        u2.finalize();
        assert_eq!(u2.status, UploadStatus::Failed);

        let mut u3 = Upload::new("batch".into(), 3);
        u3.succeeded = 2;
        u3.failed = 1;
        u3.finalize();
        assert_eq!(u3.status, UploadStatus::Partial);
    }

    #[test]
    fn vector_id_is_prefixed() {
        let chunk = Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            chunk_index: 0,
            content: "x".into(),
            token_count: 1,
            start_char: 0,
            end_char: 1,
            page_number: None,
            embedding_key: None,
            created_at: Utc::now(),
        };
        assert!(chunk.vector_id().starts_with("chunk:"));
    }
}
