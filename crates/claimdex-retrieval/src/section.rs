//! Section-scoped retrieval against an equality-only index.
//!
//! Tier 1 filters on the exact title. Tier 2 over-fetches without the title
//! filter and keeps candidates whose title contains the label, ignoring case.
//! Tier 3 drops the section constraint. The first non-empty tier wins and is
//! stamped on the result.

use tracing::{debug, info};

use claimdex_core::config::RetrievalConfig;
use claimdex_core::traits::{Embedder, VectorIndex};
use claimdex_core::types::{meta_keys, ProvenanceTier, RetrievalResult};
use claimdex_core::{ChunkTree, Result};

use crate::merge::{into_result, level_filter, search, sort_by_score, Candidate};

pub struct SectionFilterResolver<'a> {
    tree: &'a ChunkTree,
    index: &'a dyn VectorIndex,
    embedder: &'a dyn Embedder,
    config: &'a RetrievalConfig,
}

impl<'a> SectionFilterResolver<'a> {
    pub fn new(tree: &'a ChunkTree, index: &'a dyn VectorIndex, embedder: &'a dyn Embedder, config: &'a RetrievalConfig) -> Self {
        Self { tree, index, embedder, config }
    }

    pub fn resolve(&self, query: &str, section: &str, k: usize) -> Result<RetrievalResult> {
        let embedding = self.embedder.embed_one(query)?;
        let base = level_filter(self.config.section_level);
        let label = section.trim();

        if !label.is_empty() {
            let mut exact = base.clone();
            exact.insert(meta_keys::SECTION_TITLE.to_string(), label.to_string());
            let mut hits = search(self.tree, self.index, &embedding, k, &exact)?;
            if !hits.is_empty() {
                sort_by_score(&mut hits);
                info!(section = label, hits = hits.len(), "section resolved by exact title");
                return Ok(into_result(hits).with_tier(ProvenanceTier::Exact));
            }
            debug!(section = label, "no exact title match, trying partial");

            let needle = label.to_lowercase();
            let pool = k.saturating_mul(self.config.overfetch_multiplier);
            let mut partial: Vec<Candidate<'_>> = search(self.tree, self.index, &embedding, pool, &base)?
                .into_iter()
                .filter(|c| c.chunk.metadata.section_title.to_lowercase().contains(&needle))
                .collect();
            if !partial.is_empty() {
                sort_by_score(&mut partial);
                partial.truncate(k);
                info!(section = label, pool, hits = partial.len(), "section resolved by partial title");
                return Ok(into_result(partial).with_tier(ProvenanceTier::Partial));
            }
            debug!(section = label, pool, "no partial title match, falling back to unfiltered");
        }

        let mut plain = search(self.tree, self.index, &embedding, k, &base)?;
        sort_by_score(&mut plain);
        info!(section = label, hits = plain.len(), "section constraint dropped");
        Ok(into_result(plain).with_tier(ProvenanceTier::Unfiltered))
    }
}
