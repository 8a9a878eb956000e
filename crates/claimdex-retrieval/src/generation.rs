//! Index generations and the active-generation pointer.
//!
//! A generation bundles the chunk tree, its vector collection and the summary
//! collection. It is built completely before it becomes visible; `ActiveIndex`
//! then replaces the current generation in one step. Readers hold an `Arc` to
//! the generation they started with, so a rebuild never changes an answer
//! mid-query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use claimdex_core::config::{ChunkingConfig, Settings};
use claimdex_core::traits::{Embedder, VectorIndex};
use claimdex_core::types::{Chunk, Section};
use claimdex_core::{BuildReport, ChunkTree, ChunkTreeBuilder, Error, Result};

use crate::router::QueryRouter;
use crate::summary::{LeadSummarizer, SectionSummary, Summarizer, SummaryIndex};

/// Manifest key under which the active generation id is recorded.
pub const ACTIVE_GENERATION_KEY: &str = "active_generation";

/// Table name for one generation's collection, e.g. `chunks_g3`.
pub fn generation_table(base: &str, id: u64) -> String { format!("{}_g{}", base, id) }

pub struct IndexGeneration {
    pub id: u64,
    pub built_at: DateTime<Utc>,
    pub tree: ChunkTree,
    pub chunk_index: Box<dyn VectorIndex>,
    pub summaries: SummaryIndex,
    pub report: BuildReport,
    /// Router over this generation's section titles.
    pub router: QueryRouter,
}

impl IndexGeneration {
    pub fn section_titles(&self) -> Vec<String> { self.tree.section_titles() }

    pub fn manifest(&self) -> GenerationManifest {
        GenerationManifest {
            id: self.id,
            built_at: self.built_at,
            chunks: self.tree.iter().cloned().collect(),
            summaries: self.summaries.summaries().cloned().collect(),
            report: self.report.clone(),
        }
    }
}

/// Serializable description of a generation. Vectors are not part of it; they
/// live in the per-generation tables or are recomputed on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub id: u64,
    pub built_at: DateTime<Utc>,
    pub chunks: Vec<Chunk>,
    pub summaries: Vec<SectionSummary>,
    pub report: BuildReport,
}

impl GenerationManifest {
    pub fn file_name(id: u64) -> String { format!("generation-{}.json", id) }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::Operation(format!("create {}: {}", dir.display(), e)))?;
        let path = dir.join(Self::file_name(self.id));
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Operation(e.to_string()))?;
        fs::write(&path, json).map_err(|e| Error::Operation(format!("write {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "saved generation manifest");
        Ok(())
    }

    pub fn load(dir: &Path, id: u64) -> Result<Self> {
        let path = dir.join(Self::file_name(id));
        let raw = fs::read_to_string(&path).map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| Error::Operation(format!("invalid manifest {}: {}", path.display(), e)))
    }
}

type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Chunk, embed in batches, upsert, flush. The collections passed in must be
/// fresh; the generation is only returned once both are fully written.
pub struct GenerationBuilder {
    chunking: ChunkingConfig,
    batch_size: usize,
    embedder: Arc<dyn Embedder>,
    summarizer: Box<dyn Summarizer>,
    progress: Option<ProgressFn>,
}

impl GenerationBuilder {
    pub fn new(settings: &Settings, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            chunking: settings.chunking.clone(),
            batch_size: settings.index.embed_batch_size.max(1),
            embedder,
            summarizer: Box::new(LeadSummarizer::default()),
            progress: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Box<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Called with (chunks embedded, total chunks) after every batch.
    pub fn on_progress(mut self, f: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn build(
        &self,
        id: u64,
        sections: &[Section],
        mut chunk_index: Box<dyn VectorIndex>,
        summary_index: Box<dyn VectorIndex>,
    ) -> Result<IndexGeneration> {
        let output = ChunkTreeBuilder::new(self.chunking.clone()).build(sections);
        let chunks: Vec<&Chunk> = output.tree.iter().collect();
        self.embed_chunks(&chunks, chunk_index.as_mut())?;

        let skipped: HashSet<usize> = output.report.skipped.iter().map(|s| s.index).collect();
        let indexed = sections.iter().enumerate().filter(|(i, _)| !skipped.contains(i));
        let summaries = SummaryIndex::summarize_sections(indexed, self.summarizer.as_ref())?;
        let mut summary_store = SummaryIndex::new(summary_index);
        summary_store.insert_all(summaries, self.embedder.as_ref(), self.batch_size)?;

        info!(generation = id, chunks = output.tree.len(), summaries = summary_store.len(), "generation built");
        Ok(IndexGeneration {
            id,
            built_at: Utc::now(),
            router: QueryRouter::new(output.tree.section_titles()),
            tree: output.tree,
            chunk_index,
            summaries: summary_store,
            report: output.report,
        })
    }

    /// Rebuild a generation from its manifest. With `reembed` the vectors are
    /// recomputed into the given collections; otherwise the collections are
    /// expected to hold them already.
    pub fn restore(
        &self,
        manifest: GenerationManifest,
        mut chunk_index: Box<dyn VectorIndex>,
        summary_index: Box<dyn VectorIndex>,
        reembed: bool,
    ) -> Result<IndexGeneration> {
        let tree = ChunkTree::from_chunks(manifest.chunks)?;
        let mut summaries = SummaryIndex::new(summary_index);
        if reembed {
            let chunks: Vec<&Chunk> = tree.iter().collect();
            self.embed_chunks(&chunks, chunk_index.as_mut())?;
            summaries.insert_all(manifest.summaries, self.embedder.as_ref(), self.batch_size)?;
        } else {
            summaries.attach(manifest.summaries);
        }
        info!(generation = manifest.id, chunks = tree.len(), reembed, "generation restored");
        Ok(IndexGeneration {
            id: manifest.id,
            built_at: manifest.built_at,
            router: QueryRouter::new(tree.section_titles()),
            tree,
            chunk_index,
            summaries,
            report: manifest.report,
        })
    }

    fn embed_chunks(&self, chunks: &[&Chunk], index: &mut dyn VectorIndex) -> Result<()> {
        let total = chunks.len();
        let mut done = 0usize;
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts)?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!("expected {} vectors, got {}", batch.len(), vectors.len())));
            }
            for (chunk, vector) in batch.iter().zip(&vectors) {
                index.upsert(&chunk.id, vector, &chunk.filter_metadata())?;
            }
            done += batch.len();
            if let Some(progress) = &self.progress {
                progress(done, total);
            }
        }
        index.flush()
    }
}

/// Pointer to the generation queries run against.
///
/// Readers take the read lock only long enough to clone the `Arc`; the query
/// itself runs lock-free on that snapshot. `swap` holds the write lock for a
/// single pointer replacement.
pub struct ActiveIndex {
    current: RwLock<Option<Arc<IndexGeneration>>>,
    next_id: AtomicU64,
}

impl Default for ActiveIndex {
    fn default() -> Self { Self { current: RwLock::new(None), next_id: AtomicU64::new(1) } }
}

impl ActiveIndex {
    pub fn new() -> Self { Self::default() }

    /// Fresh id for a generation about to be built.
    pub fn next_generation_id(&self) -> u64 { self.next_id.fetch_add(1, Ordering::SeqCst) }

    /// Never hand out `id` or anything below it again, e.g. after reading a
    /// persisted pointer.
    pub fn reserve_through(&self, id: u64) { self.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst); }

    pub fn snapshot(&self) -> Result<Option<Arc<IndexGeneration>>> {
        let guard = self.current.read().map_err(|_| Error::Operation("active index lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    /// The current generation, `NotFound` before the first swap.
    pub fn current(&self) -> Result<Arc<IndexGeneration>> {
        self.snapshot()?.ok_or_else(|| Error::NotFound("no active index generation".to_string()))
    }

    /// Make `generation` current and hand back the one it replaced.
    pub fn swap(&self, generation: IndexGeneration) -> Result<Option<Arc<IndexGeneration>>> {
        let id = generation.id;
        self.reserve_through(id);
        let next = Arc::new(generation);
        let mut guard = self.current.write().map_err(|_| Error::Operation("active index lock poisoned".to_string()))?;
        let previous = guard.replace(next);
        info!(generation = id, previous = ?previous.as_ref().map(|g| g.id), "activated index generation");
        Ok(previous)
    }
}
