pub mod chunk_tree;
pub mod config;
pub mod error;
pub mod sections;
pub mod traits;
pub mod types;

pub use chunk_tree::{BuildOutput, BuildReport, ChunkTree, ChunkTreeBuilder, LevelCounts, SkippedSection};
pub use error::{Error, Result};
pub use types::{Chunk, ChunkId, ChunkLevel, Filter, Fragment, Meta, ProvenanceTier, RetrievalResult, SearchHit, Section, Span};
