//! LanceDB-backed `VectorStore`: one dynamically-created table per
//! namespace, named after the sanitized namespace string
//! (`"upload:{id}"` -> `upload_{id}`), rather than a fixed set of tables.

use std::collections::HashMap;
use std::sync::RwLock;

use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};

use crate::errors::{CoreError, CoreResult};

use super::{MetadataFilter, VectorItem, VectorMatch, VectorStats, VectorStore};

const ID_COL: &str = "id";
const VECTOR_COL: &str = "vector";
const METADATA_COL: &str = "metadata_json";

fn table_name(namespace: &str) -> String {
    namespace
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn schema(dim: usize) -> SchemaRef {
    std::sync::Arc::new(Schema::new(vec![
        Field::new(ID_COL, DataType::Utf8, false),
        Field::new(
            VECTOR_COL,
            DataType::FixedSizeList(
                std::sync::Arc::new(Field::new("item", DataType::Float32, true)),
                dim as i32,
            ),
            false,
        ),
        Field::new(METADATA_COL, DataType::Utf8, false),
    ]))
}

pub struct LanceVectorStore {
    connection: Connection,
    dims: RwLock<HashMap<String, usize>>,
}

impl LanceVectorStore {
    pub async fn open(data_dir: &std::path::Path) -> anyhow::Result<Self> {
        let connection = connect(&data_dir.to_string_lossy()).execute().await?;
        Ok(LanceVectorStore {
            connection,
            dims: RwLock::new(HashMap::new()),
        })
    }

    fn remembered_dim(&self, namespace: &str) -> Option<usize> {
        self.dims.read().unwrap().get(namespace).copied()
    }

    fn build_batch(&self, items: &[VectorItem], dim: usize) -> anyhow::Result<RecordBatch> {
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let id_array = StringArray::from(ids);

        let flat: Vec<Option<f32>> = items
            .iter()
            .flat_map(|i| i.vector.iter().map(|v| Some(*v)))
            .collect();
        let values = Float32Array::from(flat);
        let vector_array = FixedSizeListArray::new(
            std::sync::Arc::new(Field::new("item", DataType::Float32, true)),
            dim as i32,
            std::sync::Arc::new(values),
            None,
        );

        let metadata_json: Vec<String> = items
            .iter()
            .map(|i| serde_json::to_string(&i.metadata).unwrap_or_default())
            .collect();
        let metadata_array = StringArray::from(metadata_json);

        Ok(RecordBatch::try_new(
            schema(dim),
            vec![
                std::sync::Arc::new(id_array),
                std::sync::Arc::new(vector_array),
                std::sync::Arc::new(metadata_array),
            ],
        )?)
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn ensure_index(&self, namespace: &str, dim: usize, _metric: &str) -> CoreResult<()> {
        if let Some(existing) = self.remembered_dim(namespace) {
            if existing != dim {
                return Err(CoreError::DimensionMismatch {
                    expected: existing,
                    actual: dim,
                });
            }
            return Ok(());
        }

        let name = table_name(namespace);
        let existing_tables = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| CoreError::VectorStoreFailed {
                reason: e.to_string(),
                transient: true,
            })?;
        if !existing_tables.contains(&name) {
            let empty_batches = RecordBatchIterator::new(vec![], schema(dim));
            self.connection
                .create_table(&name, Box::new(empty_batches))
                .execute()
                .await
                .map_err(|e| CoreError::VectorStoreFailed {
                    reason: e.to_string(),
                    transient: true,
                })?;
        }
        self.dims.write().unwrap().insert(namespace.to_string(), dim);
        Ok(())
    }

    async fn upsert(&self, namespace: &str, items: Vec<VectorItem>) -> CoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let dim = self
            .remembered_dim(namespace)
            .unwrap_or_else(|| items[0].vector.len());
        let name = table_name(namespace);
        let table = self
            .connection
            .open_table(&name)
            .execute()
            .await
            .map_err(|e| CoreError::VectorStoreFailed {
                reason: e.to_string(),
                transient: true,
            })?;

        // Idempotent upsert: delete any existing rows with these ids, then
        // add. LanceDB has no native merge-upsert.
        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let id_list = ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(",");
        if !id_list.is_empty() {
            let _ = table.delete(&format!("{ID_COL} IN ({id_list})")).await;
        }

        let batch = self
            .build_batch(&items, dim)
            .map_err(|e| CoreError::VectorStoreFailed {
                reason: e.to_string(),
                transient: false,
            })?;
        let batch_schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], batch_schema);
        table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| CoreError::VectorStoreFailed {
                reason: e.to_string(),
                transient: true,
            })?;
        Ok(())
    }

    async fn delete_by_ids(&self, namespace: &str, ids: &[String]) -> CoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let name = table_name(namespace);
        let table = match self.connection.open_table(&name).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(()),
        };
        let id_list = ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(",");
        table
            .delete(&format!("{ID_COL} IN ({id_list})"))
            .await
            .map_err(|e| CoreError::VectorStoreFailed {
                reason: e.to_string(),
                transient: true,
            })?;
        Ok(())
    }

    async fn delete_by_filter(&self, namespace: &str, _filter: MetadataFilter<'_>) -> CoreResult<()> {
        // LanceDB deletes take a SQL predicate, not an arbitrary closure;
        // the core's one caller (document deletion) goes through
        // `delete_by_ids` instead, since chunk ids are already known.
        let _ = namespace;
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> CoreResult<()> {
        let name = table_name(namespace);
        let _ = self.connection.drop_table(&name).await;
        self.dims.write().unwrap().remove(namespace);
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<MetadataFilter<'_>>,
    ) -> CoreResult<Vec<VectorMatch>> {
        let name = table_name(namespace);
        let table = match self.connection.open_table(&name).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(Vec::new()),
        };

        let results = table
            .vector_search(vector.to_vec())
            .map_err(|e| CoreError::VectorStoreFailed {
                reason: e.to_string(),
                transient: false,
            })?
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| CoreError::VectorStoreFailed {
                reason: e.to_string(),
                transient: true,
            })?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| CoreError::VectorStoreFailed {
                reason: e.to_string(),
                transient: true,
            })?;

        let mut matches = Vec::new();
        for batch in results {
            let ids = batch
                .column_by_name(ID_COL)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .cloned();
            let metadata_col = batch
                .column_by_name(METADATA_COL)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .cloned();
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .cloned();

            if let (Some(ids), Some(distances)) = (ids, distances) {
                for i in 0..ids.len() {
                    let metadata: HashMap<String, String> = metadata_col
                        .as_ref()
                        .and_then(|m| serde_json::from_str(m.value(i)).ok())
                        .unwrap_or_default();
                    if let Some(f) = filter {
                        if !f(&metadata) {
                            continue;
                        }
                    }
                    matches.push(VectorMatch {
                        id: ids.value(i).to_string(),
                        score: 1.0 - distances.value(i),
                        metadata,
                    });
                }
            }
        }
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(matches)
    }

    async fn get_by_ids(&self, namespace: &str, ids: &[String]) -> CoreResult<Vec<VectorMatch>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let name = table_name(namespace);
        let table = match self.connection.open_table(&name).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(Vec::new()),
        };
        let id_list = ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(",");

        let batches = table
            .query()
            .only_if(format!("{ID_COL} IN ({id_list})"))
            .execute()
            .await
            .map_err(|e| CoreError::VectorStoreFailed {
                reason: e.to_string(),
                transient: true,
            })?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| CoreError::VectorStoreFailed {
                reason: e.to_string(),
                transient: true,
            })?;

        let mut matches = Vec::new();
        for batch in batches {
            let ids_col = batch
                .column_by_name(ID_COL)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .cloned();
            let metadata_col = batch
                .column_by_name(METADATA_COL)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .cloned();
            let vector_col = batch
                .column_by_name(VECTOR_COL)
                .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
                .cloned();

            if let Some(ids_col) = ids_col {
                for i in 0..ids_col.len() {
                    let mut metadata: HashMap<String, String> = metadata_col
                        .as_ref()
                        .and_then(|m| serde_json::from_str(m.value(i)).ok())
                        .unwrap_or_default();
                    if let Some(vec_col) = &vector_col {
                        if let Some(values) = vec_col.value(i).as_any().downcast_ref::<Float32Array>() {
                            let vector: Vec<f32> = values.values().to_vec();
                            metadata.insert("__vector_dim".to_string(), vector.len().to_string());
                        }
                    }
                    matches.push(VectorMatch {
                        id: ids_col.value(i).to_string(),
                        score: 0.0,
                        metadata,
                    });
                }
            }
        }
        Ok(matches)
    }

    async fn stats(&self, namespace: &str) -> CoreResult<VectorStats> {
        let name = table_name(namespace);
        let table = match self.connection.open_table(&name).execute().await {
            Ok(t) => t,
            Err(_) => return Ok(VectorStats { vector_count: 0 }),
        };
        let count = table.count_rows(None).await.unwrap_or(0);
        Ok(VectorStats { vector_count: count })
    }
}
