use crate::error::Result;
use crate::types::{Filter, Meta, SearchHit};

pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| crate::error::Error::Embedding("embedder returned no vector".to_string()))
    }
}

/// Similarity store consumed by the retrievers.
///
/// Filters are equality-only; there is no substring operator. Results come
/// back best first. Implementations report connectivity problems as
/// `Error::IndexUnavailable`.
pub trait VectorIndex: Send + Sync {
    fn upsert(&mut self, id: &str, embedding: &[f32], meta: &Meta) -> Result<()>;
    fn query(&self, embedding: &[f32], k: usize, filter: Option<&Filter>) -> Result<Vec<SearchHit>>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool { self.len() == 0 }

    /// Make buffered upserts visible to `query`.
    fn flush(&mut self) -> Result<()> { Ok(()) }
}
