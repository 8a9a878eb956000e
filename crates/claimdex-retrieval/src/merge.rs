//! Auto-merging retrieval over the chunk tree.
//!
//! Retrieval starts at the small level. A parent replaces its retrieved
//! children when the share of its children that were retrieved strictly
//! exceeds the merge threshold; the pass runs small → medium, then
//! medium → large. A promoted parent keeps the best score of what it replaced.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use claimdex_core::config::RetrievalConfig;
use claimdex_core::traits::{Embedder, VectorIndex};
use claimdex_core::types::{meta_keys, Chunk, ChunkId, ChunkLevel, Filter, Fragment, RetrievalResult};
use claimdex_core::{ChunkTree, Result};

/// A chunk in a result set under construction.
#[derive(Debug, Clone)]
pub(crate) struct Candidate<'a> {
    pub chunk: &'a Chunk,
    pub score: f32,
    pub merged_from: Vec<ChunkId>,
}

impl<'a> Candidate<'a> {
    fn new(chunk: &'a Chunk, score: f32) -> Self { Self { chunk, score, merged_from: Vec::new() } }

    fn into_fragment(self) -> Fragment {
        let mut fragment = Fragment::from_chunk(self.chunk, self.score);
        fragment.merged_from = self.merged_from;
        fragment
    }

    fn absorb(&mut self, score: f32, ids: impl IntoIterator<Item = ChunkId>) {
        self.score = self.score.max(score);
        for id in ids {
            if !self.merged_from.contains(&id) {
                self.merged_from.push(id);
            }
        }
    }
}

pub(crate) fn level_filter(level: Option<ChunkLevel>) -> Filter {
    let mut filter = Filter::new();
    if let Some(level) = level {
        filter.insert(meta_keys::CHUNK_LEVEL.to_string(), level.as_str().to_string());
    }
    filter
}

pub(crate) fn sort_by_score(candidates: &mut [Candidate<'_>]) {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

pub(crate) fn into_result(candidates: Vec<Candidate<'_>>) -> RetrievalResult {
    RetrievalResult::new(candidates.into_iter().map(Candidate::into_fragment).collect())
}

/// Query `index` and resolve every hit against `tree`. Hits the tree does not
/// know are dropped with a warning.
pub(crate) fn search<'a>(
    tree: &'a ChunkTree,
    index: &dyn VectorIndex,
    embedding: &[f32],
    k: usize,
    filter: &Filter,
) -> Result<Vec<Candidate<'a>>> {
    let filter = if filter.is_empty() { None } else { Some(filter) };
    let hits = index.query(embedding, k, filter)?;
    Ok(hits
        .into_iter()
        .filter_map(|hit| match tree.get(&hit.id) {
            Some(chunk) => Some(Candidate::new(chunk, hit.score)),
            None => {
                warn!(id = %hit.id, "index returned an id missing from the chunk tree");
                None
            }
        })
        .collect())
}

/// Promote sibling groups at `child_level` whose retrieved share exceeds
/// `threshold`. Candidates at other levels pass through; a promoted parent
/// that is already present absorbs the group instead of appearing twice.
pub(crate) fn merge_level<'a>(
    tree: &'a ChunkTree,
    candidates: Vec<Candidate<'a>>,
    child_level: ChunkLevel,
    threshold: f32,
) -> Vec<Candidate<'a>> {
    let mut retrieved: HashMap<&str, HashSet<&str>> = HashMap::new();
    for c in &candidates {
        let chunk: &'a Chunk = c.chunk;
        if chunk.level != child_level {
            continue;
        }
        if let Some(parent) = chunk.parent_id.as_deref() {
            retrieved.entry(parent).or_default().insert(chunk.id.as_str());
        }
    }
    let promoted: HashSet<&str> = retrieved
        .iter()
        .filter(|(parent, children)| {
            let total = tree.child_count(parent);
            let ratio = if total == 0 { 0.0 } else { children.len() as f32 / total as f32 };
            let merge = ratio > threshold;
            debug!(parent = %parent, retrieved = children.len(), total, ratio, merge, "merge check");
            merge
        })
        .map(|(parent, _)| *parent)
        .collect();

    let mut out: Vec<Candidate<'a>> = Vec::with_capacity(candidates.len());
    let mut positions: HashMap<ChunkId, usize> = HashMap::new();
    for c in candidates {
        let parent = c
            .chunk
            .parent_id
            .as_deref()
            .filter(|p| c.chunk.level == child_level && promoted.contains(p))
            .and_then(|p| tree.get(p));
        let (target, score, absorbed) = match parent {
            Some(parent) => {
                let mut ids = vec![c.chunk.id.clone()];
                ids.extend(c.merged_from);
                (parent, c.score, ids)
            }
            None => (c.chunk, c.score, c.merged_from),
        };
        match positions.get(&target.id) {
            Some(&i) => out[i].absorb(score, absorbed),
            None => {
                positions.insert(target.id.clone(), out.len());
                let mut fresh = Candidate::new(target, score);
                fresh.absorb(score, absorbed);
                out.push(fresh);
            }
        }
    }
    if !promoted.is_empty() {
        info!(level = %child_level, promoted = promoted.len(), "merged sibling groups into parents");
    }
    out
}

/// Run both merge passes and order best first.
pub(crate) fn auto_merge<'a>(tree: &'a ChunkTree, candidates: Vec<Candidate<'a>>, threshold: f32) -> Vec<Candidate<'a>> {
    let merged = merge_level(tree, candidates, ChunkLevel::Small, threshold);
    let mut merged = merge_level(tree, merged, ChunkLevel::Medium, threshold);
    sort_by_score(&mut merged);
    merged
}

pub struct AutoMergingRetriever<'a> {
    tree: &'a ChunkTree,
    index: &'a dyn VectorIndex,
    embedder: &'a dyn Embedder,
    config: &'a RetrievalConfig,
}

impl<'a> AutoMergingRetriever<'a> {
    pub fn new(tree: &'a ChunkTree, index: &'a dyn VectorIndex, embedder: &'a dyn Embedder, config: &'a RetrievalConfig) -> Self {
        Self { tree, index, embedder, config }
    }

    /// Small-level retrieval with the medium fallback and both merge passes.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        let embedding = self.embedder.embed_one(query)?;
        let mut candidates = search(self.tree, self.index, &embedding, k, &level_filter(Some(ChunkLevel::Small)))?;
        if candidates.len() < self.config.min_coverage {
            let wider = search(self.tree, self.index, &embedding, k, &level_filter(Some(ChunkLevel::Medium)))?;
            debug!(small = candidates.len(), medium = wider.len(), "under-covered, widening to medium");
            if !wider.is_empty() && wider.len() >= candidates.len() {
                candidates = wider;
            }
        }
        Ok(into_result(auto_merge(self.tree, candidates, self.config.merge_threshold)))
    }

    /// Retrieval at one level (`None` searches all levels) with merging optional.
    pub fn retrieve_at(&self, query: &str, level: Option<ChunkLevel>, k: usize, auto_merge_on: bool) -> Result<RetrievalResult> {
        let embedding = self.embedder.embed_one(query)?;
        let mut candidates = search(self.tree, self.index, &embedding, k, &level_filter(level))?;
        if auto_merge_on {
            candidates = auto_merge(self.tree, candidates, self.config.merge_threshold);
        }
        Ok(into_result(candidates))
    }

    pub fn retrieve_by_doc_type(&self, query: &str, doc_type: &str, k: usize, level: Option<ChunkLevel>) -> Result<RetrievalResult> {
        let embedding = self.embedder.embed_one(query)?;
        let mut filter = level_filter(level);
        filter.insert(meta_keys::DOC_TYPE.to_string(), doc_type.to_string());
        let candidates = search(self.tree, self.index, &embedding, k, &filter)?;
        debug!(doc_type, hits = candidates.len(), "doc type retrieval");
        Ok(into_result(candidates))
    }

    /// Over-fetch `2k` unfiltered and keep chunks whose timestamp contains
    /// either bound. Timestamps are free text, so this is containment, not
    /// date arithmetic.
    pub fn retrieve_by_date_range(&self, query: &str, start: &str, end: &str, k: usize) -> Result<RetrievalResult> {
        let embedding = self.embedder.embed_one(query)?;
        let candidates = search(self.tree, self.index, &embedding, k.saturating_mul(2), &Filter::new())?;
        let kept: Vec<Candidate<'_>> = candidates
            .into_iter()
            .filter(|c| {
                c.chunk
                    .metadata
                    .timestamp
                    .as_deref()
                    .is_some_and(|ts| (!start.is_empty() && ts.contains(start)) || (!end.is_empty() && ts.contains(end)))
            })
            .take(k)
            .collect();
        Ok(into_result(kept))
    }
}
