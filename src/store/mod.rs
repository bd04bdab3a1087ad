//! C5: Metadata Store.
//!
//! Transactional CRUD on Upload/Document/Chunk/Query over `rusqlite`
//! (bundled). Each public operation opens one transaction;
//! `bulk_insert_chunks` and `set_chunk_embedding_keys` batch within that
//! transaction so concurrent readers never observe a partially-written
//! document (§4.9's "create row, fill later" prohibition).

mod schema;

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::errors::{CoreError, CoreResult};
use crate::types::{
    Chunk, Citation, Document, DocumentStatus, FileType, Query, RetrievalStats, Upload, UploadStatus,
};

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_dt(s: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::internal(anyhow::anyhow!(e)))
}

impl MetadataStore {
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(CoreError::from)?;
        conn.execute_batch(schema::SCHEMA).map_err(CoreError::from)?;
        Ok(MetadataStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(CoreError::from)?;
        conn.execute_batch(schema::SCHEMA).map_err(CoreError::from)?;
        Ok(MetadataStore {
            conn: Mutex::new(conn),
        })
    }

    // -- Upload --------------------------------------------------------

    pub fn create_upload(&self, upload: &Upload) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO uploads (id, batch_label, status, total, succeeded, failed, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                upload.id.to_string(),
                upload.batch_label,
                upload.status.to_string(),
                upload.total as i64,
                upload.succeeded as i64,
                upload.failed as i64,
                upload.created_at.to_rfc3339(),
                upload.completed_at.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_upload(&self, id: Uuid) -> CoreResult<Upload> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, batch_label, status, total, succeeded, failed, created_at, completed_at
             FROM uploads WHERE id = ?1",
            params![id.to_string()],
            row_to_upload,
        )
        .optional()?
        .ok_or_else(|| CoreError::NotFound(format!("upload {id}")))
    }

    pub fn list_uploads(&self, page: usize, limit: usize) -> CoreResult<Vec<Upload>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, batch_label, status, total, succeeded, failed, created_at, completed_at
             FROM uploads ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit as i64, (page * limit) as i64], row_to_upload)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Increments succeeded/failed and, once all children are terminal,
    /// sets the upload's terminal status (§4.9 step 4).
    pub fn record_document_outcome(&self, upload_id: Uuid, succeeded: bool) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = (|| -> CoreResult<()> {
            let (total, mut succ, mut fail): (i64, i64, i64) = conn.query_row(
                "SELECT total, succeeded, failed FROM uploads WHERE id = ?1",
                params![upload_id.to_string()],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )?;
            if succeeded {
                succ += 1;
            } else {
                fail += 1;
            }
            let (status, completed_at) = if succ + fail >= total {
                let status = if fail == 0 {
                    UploadStatus::Completed
                } else if succ == 0 {
                    UploadStatus::Failed
                } else {
                    UploadStatus::Partial
                };
                (status, Some(now_rfc3339()))
            } else {
                (UploadStatus::Processing, None)
            };
            conn.execute(
                "UPDATE uploads SET succeeded = ?1, failed = ?2, status = ?3, completed_at = ?4 WHERE id = ?5",
                params![succ, fail, status.to_string(), completed_at, upload_id.to_string()],
            )?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    // -- Document --------------------------------------------------------

    /// Atomic: all required document fields must be present, per the
    /// "create row, fill later" prohibition (§4.9, §9).
    pub fn append_document(&self, doc: &Document) -> CoreResult<Uuid> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO documents
             (id, upload_id, filename, file_type, byte_size, page_count, content_hash,
              storage_path, status, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                doc.id.to_string(),
                doc.upload_id.to_string(),
                doc.filename,
                doc.file_type.to_string(),
                doc.byte_size as i64,
                doc.page_count as i64,
                doc.content_hash,
                doc.storage_path,
                doc.status.to_string(),
                doc.error_message,
                doc.created_at.to_rfc3339(),
            ],
        )?;
        Ok(doc.id)
    }

    pub fn set_document_status(
        &self,
        doc_id: Uuid,
        status: DocumentStatus,
        error: Option<String>,
    ) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE documents SET status = ?1, error_message = ?2 WHERE id = ?3",
            params![status.to_string(), error, doc_id.to_string()],
        )?;
        Ok(())
    }

    pub fn get_document(&self, id: Uuid) -> CoreResult<Document> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, upload_id, filename, file_type, byte_size, page_count, content_hash,
                    storage_path, status, error_message, created_at
             FROM documents WHERE id = ?1",
            params![id.to_string()],
            row_to_document,
        )
        .optional()?
        .ok_or_else(|| CoreError::NotFound(format!("document {id}")))
    }

    pub fn list_documents_for_upload(&self, upload_id: Uuid) -> CoreResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, upload_id, filename, file_type, byte_size, page_count, content_hash,
                    storage_path, status, error_message, created_at
             FROM documents WHERE upload_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![upload_id.to_string()], row_to_document)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_document_by_hash_global(&self, hash: &str) -> CoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM documents WHERE content_hash = ?1 AND status != 'failed' LIMIT 1",
                params![hash],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn find_document_by_hash_in_upload(&self, hash: &str, upload_id: &str) -> CoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM documents WHERE content_hash = ?1 AND upload_id = ?2 AND status != 'failed' LIMIT 1",
                params![hash, upload_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Cascades to chunks (FK `ON DELETE CASCADE`); returns the deleted
    /// chunk ids and the owning upload_id so the caller can also clear
    /// vectors (§3: "deletion cascades to chunks and triggers vector
    /// deletion").
    pub fn delete_document(&self, doc_id: Uuid) -> CoreResult<(Uuid, Vec<Uuid>)> {
        let conn = self.conn.lock().unwrap();
        let upload_id: String = conn.query_row(
            "SELECT upload_id FROM documents WHERE id = ?1",
            params![doc_id.to_string()],
            |r| r.get(0),
        )?;
        let mut stmt = conn.prepare("SELECT id FROM chunks WHERE document_id = ?1")?;
        let chunk_ids: Vec<Uuid> = stmt
            .query_map(params![doc_id.to_string()], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();
        conn.execute("DELETE FROM documents WHERE id = ?1", params![doc_id.to_string()])?;
        Ok((Uuid::parse_str(&upload_id).map_err(|e| CoreError::internal(anyhow::anyhow!(e)))?, chunk_ids))
    }

    // -- Chunk --------------------------------------------------------

    pub fn bulk_insert_chunks(&self, doc_id: Uuid, chunks: &[Chunk]) -> CoreResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks
                 (id, document_id, chunk_index, content, token_count, start_char, end_char,
                  page_number, embedding_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    chunk.id.to_string(),
                    doc_id.to_string(),
                    chunk.chunk_index,
                    chunk.content,
                    chunk.token_count as i64,
                    chunk.start_char as i64,
                    chunk.end_char as i64,
                    chunk.page_number.map(|p| p as i64),
                    chunk.embedding_key,
                    chunk.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_chunks(&self, doc_id: Uuid, page: Option<usize>, limit: Option<usize>) -> CoreResult<Vec<Chunk>> {
        let conn = self.conn.lock().unwrap();
        let limit = limit.unwrap_or(usize::MAX) as i64;
        let offset = (page.unwrap_or(0) * limit.max(0) as usize) as i64;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, chunk_index, content, token_count, start_char, end_char,
                    page_number, embedding_key, created_at
             FROM chunks WHERE document_id = ?1 ORDER BY chunk_index LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![doc_id.to_string(), limit, offset], row_to_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_chunks_by_ids(&self, ids: &[Uuid]) -> CoreResult<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, document_id, chunk_index, content, token_count, start_char, end_char,
                    page_number, embedding_key, created_at
             FROM chunks WHERE id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            id_strings.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(params_refs.as_slice(), row_to_chunk)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Batch update; no-op on an empty slice (§4.5).
    pub fn set_chunk_embedding_keys(&self, pairs: &[(Uuid, String)]) -> CoreResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (chunk_id, external_id) in pairs {
            tx.execute(
                "UPDATE chunks SET embedding_key = ?1 WHERE id = ?2",
                params![external_id, chunk_id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn count_indexed(&self, doc_id: Uuid) -> CoreResult<(usize, usize)> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
            params![doc_id.to_string()],
            |r| r.get(0),
        )?;
        let indexed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE document_id = ?1 AND embedding_key IS NOT NULL",
            params![doc_id.to_string()],
            |r| r.get(0),
        )?;
        Ok((total as usize, indexed as usize))
    }

    // -- Query --------------------------------------------------------

    pub fn persist_query(&self, query: &Query) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let citations_json = serde_json::to_string(&query.citations).map_err(|e| CoreError::internal(anyhow::anyhow!(e)))?;
        let used_ids_json = serde_json::to_string(&query.used_chunk_ids).map_err(|e| CoreError::internal(anyhow::anyhow!(e)))?;
        let stats_json =
            serde_json::to_string(&query.retrieval_stats).map_err(|e| CoreError::internal(anyhow::anyhow!(e)))?;
        conn.execute(
            "INSERT INTO queries
             (id, query_text, upload_filter, answer_text, citations, used_chunk_ids, latency_ms, retrieval_stats, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                query.id.to_string(),
                query.query_text,
                query.upload_filter.map(|id| id.to_string()),
                query.answer_text,
                citations_json,
                used_ids_json,
                query.latency_ms as i64,
                stats_json,
                query.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_query(&self, id: Uuid) -> CoreResult<Query> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, query_text, upload_filter, answer_text, citations, used_chunk_ids,
                    latency_ms, retrieval_stats, created_at
             FROM queries WHERE id = ?1",
            params![id.to_string()],
            row_to_query,
        )
        .optional()?
        .ok_or_else(|| CoreError::NotFound(format!("query {id}")))
    }

    pub fn list_queries(&self, page: usize, limit: usize) -> CoreResult<Vec<Query>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, query_text, upload_filter, answer_text, citations, used_chunk_ids,
                    latency_ms, retrieval_stats, created_at
             FROM queries ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit as i64, (page * limit) as i64], row_to_query)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_upload(row: &rusqlite::Row) -> rusqlite::Result<Upload> {
    let id: String = row.get(0)?;
    let status: String = row.get(2)?;
    let created_at: String = row.get(6)?;
    let completed_at: Option<String> = row.get(7)?;
    Ok(Upload {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        batch_label: row.get(1)?,
        status: UploadStatus::from_str(&status).unwrap_or(UploadStatus::Pending),
        total: row.get::<_, i64>(3)? as usize,
        succeeded: row.get::<_, i64>(4)? as usize,
        failed: row.get::<_, i64>(5)? as usize,
        created_at: parse_dt(&created_at).unwrap_or_else(|_| Utc::now()),
        completed_at: completed_at.and_then(|s| parse_dt(&s).ok()),
    })
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let id: String = row.get(0)?;
    let upload_id: String = row.get(1)?;
    let file_type: String = row.get(3)?;
    let status: String = row.get(8)?;
    let created_at: String = row.get(10)?;
    Ok(Document {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        upload_id: Uuid::parse_str(&upload_id).unwrap_or_default(),
        filename: row.get(2)?,
        file_type: FileType::from_str(&file_type).unwrap_or(FileType::Txt),
        byte_size: row.get::<_, i64>(4)? as u64,
        page_count: row.get::<_, i64>(5)? as usize,
        content_hash: row.get(6)?,
        storage_path: row.get(7)?,
        status: DocumentStatus::from_str(&status).unwrap_or(DocumentStatus::Pending),
        error_message: row.get(9)?,
        created_at: parse_dt(&created_at).unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let id: String = row.get(0)?;
    let document_id: String = row.get(1)?;
    let created_at: String = row.get(9)?;
    Ok(Chunk {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        document_id: Uuid::parse_str(&document_id).unwrap_or_default(),
        chunk_index: row.get::<_, i64>(2)? as u32,
        content: row.get(3)?,
        token_count: row.get::<_, i64>(4)? as usize,
        start_char: row.get::<_, i64>(5)? as usize,
        end_char: row.get::<_, i64>(6)? as usize,
        page_number: row.get::<_, Option<i64>>(7)?.map(|p| p as usize),
        embedding_key: row.get(8)?,
        created_at: parse_dt(&created_at).unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_query(row: &rusqlite::Row) -> rusqlite::Result<Query> {
    let id: String = row.get(0)?;
    let upload_filter: Option<String> = row.get(2)?;
    let citations_json: String = row.get(4)?;
    let used_ids_json: String = row.get(5)?;
    let stats_json: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let citations: Vec<Citation> = serde_json::from_str(&citations_json).unwrap_or_default();
    let used_chunk_ids: Vec<Uuid> = serde_json::from_str(&used_ids_json).unwrap_or_default();
    let retrieval_stats: RetrievalStats = serde_json::from_str(&stats_json).unwrap_or(RetrievalStats {
        top_k: 0,
        chunks_retrieved: 0,
        chunks_used: 0,
        retrieval_method: crate::config::RetrievalMethod::Hybrid,
    });
    Ok(Query {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        query_text: row.get(1)?,
        upload_filter: upload_filter.and_then(|s| Uuid::parse_str(&s).ok()),
        answer_text: row.get(3)?,
        citations,
        used_chunk_ids,
        latency_ms: row.get::<_, i64>(6)? as u64,
        retrieval_stats,
        created_at: parse_dt(&created_at).unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document(upload_id: Uuid) -> Document {
        Document {
            id: Uuid::new_v4(),
            upload_id,
            filename: "a.txt".to_string(),
            file_type: FileType::Txt,
            byte_size: 10,
            page_count: 1,
            content_hash: "deadbeef".to_string(),
            storage_path: "/tmp/a.txt".to_string(),
            status: DocumentStatus::Completed,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upload_and_document_roundtrip() {
        let store = MetadataStore::open_in_memory().unwrap();
        let upload = Upload::new("batch".into(), 1);
        store.create_upload(&upload).unwrap();
        let fetched = store.get_upload(upload.id).unwrap();
        assert_eq!(fetched.total, 1);

        let doc = sample_document(upload.id);
        store.append_document(&doc).unwrap();
        let fetched_doc = store.get_document(doc.id).unwrap();
        assert_eq!(fetched_doc.content_hash, "deadbeef");
    }

    #[test]
    fn duplicate_lookup_finds_existing_hash() {
        let store = MetadataStore::open_in_memory().unwrap();
        let upload = Upload::new("batch".into(), 1);
        store.create_upload(&upload).unwrap();
        let doc = sample_document(upload.id);
        store.append_document(&doc).unwrap();

        let found = store.find_document_by_hash_global("deadbeef").unwrap();
        assert_eq!(found, Some(doc.id.to_string()));
        assert!(store.find_document_by_hash_global("absent").unwrap().is_none());
    }

    #[test]
    fn delete_document_cascades_to_chunks() {
        let store = MetadataStore::open_in_memory().unwrap();
        let upload = Upload::new("batch".into(), 1);
        store.create_upload(&upload).unwrap();
        let doc = sample_document(upload.id);
        store.append_document(&doc).unwrap();

        let chunk = Chunk {
            id: Uuid::new_v4(),
            document_id: doc.id,
            chunk_index: 0,
            content: "hello".into(),
            token_count: 1,
            start_char: 0,
            end_char: 5,
            page_number: Some(1),
            embedding_key: None,
            created_at: Utc::now(),
        };
        store.bulk_insert_chunks(doc.id, &[chunk.clone()]).unwrap();

        let (upload_id, deleted_ids) = store.delete_document(doc.id).unwrap();
        assert_eq!(upload_id, upload.id);
        assert_eq!(deleted_ids, vec![chunk.id]);
        assert!(store.get_document(doc.id).is_err());
        assert!(store.list_chunks(doc.id, None, None).unwrap().is_empty());
    }

    #[test]
    fn set_chunk_embedding_keys_is_noop_on_empty() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert!(store.set_chunk_embedding_keys(&[]).is_ok());
    }

    #[test]
    fn record_document_outcome_finalizes_upload() {
        let store = MetadataStore::open_in_memory().unwrap();
        let upload = Upload::new("batch".into(), 2);
        store.create_upload(&upload).unwrap();
        store.record_document_outcome(upload.id, true).unwrap();
        store.record_document_outcome(upload.id, false).unwrap();
        let fetched = store.get_upload(upload.id).unwrap();
        assert_eq!(fetched.status, UploadStatus::Partial);
        assert!(fetched.completed_at.is_some());
    }
}
