//! LanceDB-backed `VectorIndex`.
//!
//! The store owns a tokio runtime and blocks on it, so callers stay
//! synchronous. Upserts are buffered and written by `flush`; queries only see
//! flushed rows.

use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use claimdex_core::traits::VectorIndex;
use claimdex_core::types::{meta_keys, Filter, Meta, SearchHit};
use claimdex_core::{Error, Result};

use crate::schema::build_record_schema;
use crate::table::{escape_sql, get_meta, open_db, set_meta, table_exists, unavailable};

const META_TABLE: &str = "claimdex_meta";

/// Connection to one LanceDB directory.
#[derive(Clone)]
pub struct LanceStore {
    rt: Arc<Runtime>,
    conn: Connection,
}

impl LanceStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(unavailable)?;
        let rt = Runtime::new().map_err(|e| Error::Operation(e.to_string()))?;
        let uri = dir.to_string_lossy().to_string();
        let conn = rt.block_on(open_db(&uri))?;
        info!(dir = %uri, "opened lancedb");
        Ok(Self { rt: Arc::new(rt), conn })
    }

    /// Handle on `table`; the table is created on first flush.
    pub fn index(&self, table: &str, dim: usize) -> Result<LanceIndex> {
        let rows = self.rt.block_on(async {
            if table_exists(&self.conn, table).await? {
                let t = self.conn.open_table(table).execute().await.map_err(unavailable)?;
                t.count_rows(None).await.map_err(unavailable)
            } else {
                Ok(0)
            }
        })?;
        Ok(LanceIndex { store: self.clone(), table: table.to_string(), dim, rows, pending: Vec::new() })
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> { self.rt.block_on(set_meta(&self.conn, META_TABLE, key, value)) }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> { self.rt.block_on(get_meta(&self.conn, META_TABLE, key)) }
}

struct PendingRow {
    id: String,
    embedding: Vec<f32>,
    meta: Meta,
}

pub struct LanceIndex {
    store: LanceStore,
    table: String,
    dim: usize,
    rows: usize,
    pending: Vec<PendingRow>,
}

impl LanceIndex {
    pub fn table_name(&self) -> &str { &self.table }

    fn to_record_batch(&self) -> Result<RecordBatch> {
        let schema = build_record_schema(self.dim);
        let mut columns: Vec<Arc<dyn Array>> = vec![Arc::new(StringArray::from(
            self.pending.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
        ))];
        for key in meta_keys::ALL {
            let values: Vec<String> = self.pending.iter().map(|r| r.meta.get(key).cloned().unwrap_or_default()).collect();
            columns.push(Arc::new(StringArray::from(values)));
        }
        let vectors = self.pending.iter().map(|r| Some(r.embedding.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
        columns.push(Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
            vectors,
            self.dim as i32,
        )));
        RecordBatch::try_new(schema, columns).map_err(|e| Error::Operation(e.to_string()))
    }

    fn filter_sql(filter: &Filter) -> String {
        filter
            .iter()
            .map(|(k, v)| format!("{} = '{}'", k, escape_sql(v)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

impl VectorIndex for LanceIndex {
    fn upsert(&mut self, id: &str, embedding: &[f32], meta: &Meta) -> Result<()> {
        if embedding.len() != self.dim {
            return Err(Error::Operation(format!(
                "embedding for {} has dimension {}, table {} holds {}",
                id,
                embedding.len(),
                self.table,
                self.dim
            )));
        }
        let row = PendingRow { id: id.to_string(), embedding: embedding.to_vec(), meta: meta.clone() };
        match self.pending.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = row,
            None => self.pending.push(row),
        }
        Ok(())
    }

    fn query(&self, embedding: &[f32], k: usize, filter: Option<&Filter>) -> Result<Vec<SearchHit>> {
        if embedding.len() != self.dim {
            return Err(Error::Operation(format!(
                "query has dimension {}, table {} holds {}",
                embedding.len(),
                self.table,
                self.dim
            )));
        }
        if k == 0 || self.rows == 0 {
            return Ok(vec![]);
        }
        if let Some(f) = filter {
            // Only metadata columns exist; any other key can never match.
            if f.keys().any(|key| !meta_keys::ALL.contains(&key.as_str())) {
                return Ok(vec![]);
            }
        }
        let conn = &self.store.conn;
        self.store.rt.block_on(async {
            let table = conn.open_table(&self.table).execute().await.map_err(unavailable)?;
            let mut query = table
                .vector_search(embedding.to_vec())
                .map_err(unavailable)?
                .distance_type(DistanceType::Cosine)
                .limit(k);
            if let Some(f) = filter.filter(|f| !f.is_empty()) {
                query = query.only_if(Self::filter_sql(f));
            }
            let mut stream = query.execute().await.map_err(unavailable)?;
            let mut hits = Vec::new();
            while let Some(batch) = stream.try_next().await.map_err(unavailable)? {
                let ids = batch
                    .column_by_name("id")
                    .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                    .ok_or_else(|| Error::Operation("id column missing".to_string()))?;
                let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
                for i in 0..batch.num_rows() {
                    let score = distances.map_or(0.0, |d| 1.0 - d.value(i));
                    hits.push(SearchHit::new(ids.value(i), score));
                }
            }
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            hits.truncate(k);
            Ok(hits)
        })
    }

    fn len(&self) -> usize { self.rows + self.pending.len() }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = self.to_record_batch()?;
        let schema = batch.schema();
        let conn = &self.store.conn;
        let table = self.table.as_str();
        let rows = self.store.rt.block_on(async {
            let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
            if table_exists(conn, table).await? {
                let t = conn.open_table(table).execute().await.map_err(unavailable)?;
                let mut mi = t.merge_insert(&["id"]);
                mi.when_matched_update_all(None).when_not_matched_insert_all();
                mi.execute(reader).await.map_err(unavailable)?;
                t.count_rows(None).await.map_err(unavailable)
            } else {
                let t = conn.create_table(table, reader).execute().await.map_err(unavailable)?;
                t.count_rows(None).await.map_err(unavailable)
            }
        })?;
        debug!(table = %self.table, written = self.pending.len(), rows, "flushed lance table");
        self.pending.clear();
        self.rows = rows;
        Ok(())
    }
}
