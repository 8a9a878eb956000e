use std::cmp::Ordering;
use std::collections::HashMap;

use claimdex_core::traits::VectorIndex;
use claimdex_core::types::{Filter, Meta, SearchHit};
use claimdex_core::{Error, Result};

use crate::{cosine, matches_filter};

#[derive(Debug, Clone)]
struct Record {
    id: String,
    embedding: Vec<f32>,
    meta: Meta,
}

/// Exact cosine search over an in-process list. Ties keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    records: Vec<Record>,
    positions: HashMap<String, usize>,
    dim: Option<usize>,
}

impl MemoryIndex {
    pub fn new() -> Self { Self::default() }

    pub fn dim(&self) -> Option<usize> { self.dim }

    pub fn meta(&self, id: &str) -> Option<&Meta> { self.positions.get(id).map(|&i| &self.records[i].meta) }
}

impl VectorIndex for MemoryIndex {
    fn upsert(&mut self, id: &str, embedding: &[f32], meta: &Meta) -> Result<()> {
        match self.dim {
            Some(d) if d != embedding.len() => {
                return Err(Error::Operation(format!(
                    "embedding for {} has dimension {}, index holds {}",
                    id,
                    embedding.len(),
                    d
                )));
            }
            None => self.dim = Some(embedding.len()),
            _ => {}
        }
        let record = Record { id: id.to_string(), embedding: embedding.to_vec(), meta: meta.clone() };
        match self.positions.get(id) {
            Some(&i) => self.records[i] = record,
            None => {
                self.positions.insert(id.to_string(), self.records.len());
                self.records.push(record);
            }
        }
        Ok(())
    }

    fn query(&self, embedding: &[f32], k: usize, filter: Option<&Filter>) -> Result<Vec<SearchHit>> {
        if let Some(d) = self.dim.filter(|&d| d != embedding.len()) {
            return Err(Error::Operation(format!("query has dimension {}, index holds {}", embedding.len(), d)));
        }
        if k == 0 {
            return Ok(vec![]);
        }
        let mut hits: Vec<SearchHit> = self
            .records
            .iter()
            .filter(|r| matches_filter(&r.meta, filter))
            .map(|r| SearchHit::new(r.id.clone(), cosine(embedding, &r.embedding)))
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize { self.records.len() }
}
