//! Vector index backends behind `claimdex_core::traits::VectorIndex`.
//!
//! `MemoryIndex` is always available. The LanceDB backend is compiled with the
//! `lance` feature.

pub mod memory;

#[cfg(feature = "lance")]
pub mod lance;
#[cfg(feature = "lance")]
pub mod schema;
#[cfg(feature = "lance")]
pub mod table;

pub use memory::MemoryIndex;

#[cfg(feature = "lance")]
pub use lance::{LanceIndex, LanceStore};

use claimdex_core::types::Filter;
use claimdex_core::Meta;

/// True when every filter entry is present in `meta` with an equal value.
pub fn matches_filter(meta: &Meta, filter: Option<&Filter>) -> bool {
    filter.map_or(true, |f| f.iter().all(|(k, v)| meta.get(k).is_some_and(|m| m == v)))
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}
