use std::collections::HashMap;
use std::sync::Mutex;

use claimdex_core::config::RetrievalConfig;
use claimdex_core::traits::VectorIndex;
use claimdex_core::types::{meta_keys, ChunkMetadata, Filter, Meta, ProvenanceTier, SearchHit};
use claimdex_core::{Chunk, ChunkLevel, ChunkTree, Error, Result, Span};
use claimdex_embed::HashEmbedder;
use claimdex_retrieval::{AutoMergingRetriever, SectionFilterResolver};

/// Returns canned hits per filter and records every call.
#[derive(Default)]
struct ScriptedIndex {
    responses: HashMap<Filter, Vec<SearchHit>>,
    calls: Mutex<Vec<(usize, Filter)>>,
}

impl ScriptedIndex {
    fn respond(mut self, filter: &[(&str, &str)], hits: &[(&str, f32)]) -> Self {
        let key: Filter = filter.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.responses.insert(key, hits.iter().map(|(id, s)| SearchHit::new(*id, *s)).collect());
        self
    }

    fn calls(&self) -> Vec<(usize, Filter)> { self.calls.lock().unwrap().clone() }
}

impl VectorIndex for ScriptedIndex {
    fn upsert(&mut self, _id: &str, _embedding: &[f32], _meta: &Meta) -> Result<()> { Ok(()) }

    fn query(&self, _embedding: &[f32], k: usize, filter: Option<&Filter>) -> Result<Vec<SearchHit>> {
        let key = filter.cloned().unwrap_or_default();
        self.calls.lock().unwrap().push((k, key.clone()));
        let mut hits = self.responses.get(&key).cloned().unwrap_or_default();
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize { 0 }
}

struct FailingIndex;

impl VectorIndex for FailingIndex {
    fn upsert(&mut self, _id: &str, _embedding: &[f32], _meta: &Meta) -> Result<()> { Ok(()) }

    fn query(&self, _embedding: &[f32], _k: usize, _filter: Option<&Filter>) -> Result<Vec<SearchHit>> {
        Err(Error::IndexUnavailable("connection refused".to_string()))
    }

    fn len(&self) -> usize { 0 }
}

fn chunk(id: &str, level: ChunkLevel, parent: Option<&str>, title: &str, start: usize, end: usize) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: format!("{} text", id),
        level,
        parent_id: parent.map(str::to_string),
        span: Span::new(start, end),
        metadata: ChunkMetadata {
            section_index: 0,
            section_title: title.to_string(),
            doc_type: "policy_information".to_string(),
            timestamp: Some("March 15, 2024".to_string()),
        },
    }
}

/// L1 ─┬─ M1 ─ S1, S2
///     └─ M2 ─ S3, S4, S5
fn tree() -> ChunkTree {
    let t = "POLICY INFORMATION";
    ChunkTree::from_chunks(vec![
        chunk("L1", ChunkLevel::Large, None, t, 0, 100),
        chunk("M1", ChunkLevel::Medium, Some("L1"), t, 0, 40),
        chunk("S1", ChunkLevel::Small, Some("M1"), t, 0, 20),
        chunk("S2", ChunkLevel::Small, Some("M1"), t, 20, 40),
        chunk("M2", ChunkLevel::Medium, Some("L1"), t, 30, 100),
        chunk("S3", ChunkLevel::Small, Some("M2"), t, 30, 50),
        chunk("S4", ChunkLevel::Small, Some("M2"), t, 50, 75),
        chunk("S5", ChunkLevel::Small, Some("M2"), t, 75, 100),
    ])
    .expect("valid tree")
}

const SMALL: (&str, &str) = (meta_keys::CHUNK_LEVEL, "small");
const MEDIUM: (&str, &str) = (meta_keys::CHUNK_LEVEL, "medium");

#[test]
fn majority_group_promotes_and_lone_hit_stays() {
    let tree = tree();
    let index = ScriptedIndex::default().respond(&[SMALL], &[("S1", 0.9), ("S3", 0.8), ("S2", 0.7)]);
    let config = RetrievalConfig::default();
    let embedder = HashEmbedder::new(32);
    let result = AutoMergingRetriever::new(&tree, &index, &embedder, &config).retrieve("deductible", 3).unwrap();

    assert_eq!(result.ids(), vec!["M1", "S3"]);
    let m1 = &result.fragments[0];
    assert_eq!(m1.level, Some(ChunkLevel::Medium));
    assert!((m1.score - 0.9).abs() < 1e-6, "max of replaced scores");
    assert_eq!(m1.merged_from, vec!["S1".to_string(), "S2".to_string()]);
    assert!(result.fragments[1].merged_from.is_empty());
}

#[test]
fn half_of_siblings_is_not_a_majority() {
    let tree = tree();
    let index = ScriptedIndex::default().respond(&[SMALL], &[("S1", 0.9), ("S2", 0.8)]);
    let config = RetrievalConfig::default();
    let embedder = HashEmbedder::new(32);
    let result = AutoMergingRetriever::new(&tree, &index, &embedder, &config).retrieve("q", 3).unwrap();
    assert_eq!(result.ids(), vec!["M1"], "1 of 2 mediums does not lift to L1");
}

#[test]
fn zero_threshold_collapses_to_one_large_chunk() {
    let tree = tree();
    let index = ScriptedIndex::default().respond(&[SMALL], &[("S4", 0.6), ("S3", 0.5), ("S5", 0.4)]);
    let config = RetrievalConfig { merge_threshold: 0.0, ..RetrievalConfig::default() };
    let embedder = HashEmbedder::new(32);
    let result = AutoMergingRetriever::new(&tree, &index, &embedder, &config).retrieve("q", 3).unwrap();

    assert_eq!(result.ids(), vec!["L1"]);
    let l1 = &result.fragments[0];
    assert_eq!(l1.level, Some(ChunkLevel::Large));
    assert!((l1.score - 0.6).abs() < 1e-6);
    for id in ["S3", "S4", "S5", "M2"] {
        assert!(l1.merged_from.contains(&id.to_string()), "{} recorded", id);
    }
}

#[test]
fn under_coverage_widens_to_medium() {
    let tree = tree();
    let index = ScriptedIndex::default()
        .respond(&[SMALL], &[("S4", 0.7)])
        .respond(&[MEDIUM], &[("M2", 0.6), ("M1", 0.2)]);
    let config = RetrievalConfig::default();
    let embedder = HashEmbedder::new(32);
    let result = AutoMergingRetriever::new(&tree, &index, &embedder, &config).retrieve("q", 3).unwrap();

    let calls = index.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1.get(meta_keys::CHUNK_LEVEL).map(String::as_str), Some("medium"));
    // Both mediums of L1 came back, so L1 wins.
    assert_eq!(result.ids(), vec!["L1"]);
}

#[test]
fn parent_already_retrieved_absorbs_its_children() {
    let tree = tree();
    let index = ScriptedIndex::default().respond(&[], &[("M1", 0.5), ("S1", 0.9), ("S2", 0.4)]);
    let config = RetrievalConfig::default();
    let embedder = HashEmbedder::new(32);
    let result = AutoMergingRetriever::new(&tree, &index, &embedder, &config).retrieve_at("q", None, 3, true).unwrap();

    assert_eq!(result.ids(), vec!["M1"]);
    assert!((result.fragments[0].score - 0.9).abs() < 1e-6);

    let plain = AutoMergingRetriever::new(&tree, &index, &embedder, &config).retrieve_at("q", None, 3, false).unwrap();
    assert_eq!(plain.ids(), vec!["M1", "S1", "S2"], "no merge keeps index order");
}

#[test]
fn doc_type_and_date_range_filters() {
    let tree = tree();
    let index = ScriptedIndex::default()
        .respond(&[(meta_keys::DOC_TYPE, "policy_information")], &[("S5", 0.3)])
        .respond(&[], &[("S1", 0.9), ("S2", 0.8), ("S3", 0.7), ("S4", 0.6)]);
    let config = RetrievalConfig::default();
    let embedder = HashEmbedder::new(32);
    let retriever = AutoMergingRetriever::new(&tree, &index, &embedder, &config);

    assert_eq!(retriever.retrieve_by_doc_type("q", "policy_information", 3, None).unwrap().ids(), vec!["S5"]);

    let dated = retriever.retrieve_by_date_range("q", "March 15, 2024", "March 30, 2024", 2).unwrap();
    assert_eq!(dated.ids(), vec!["S1", "S2"]);
    assert_eq!(index.calls().last().map(|c| c.0), Some(4), "over-fetches twice k");

    let none = retriever.retrieve_by_date_range("q", "April 1, 2024", "April 2, 2024", 2).unwrap();
    assert!(none.is_empty());
}

#[test]
fn unavailable_index_fails_fast() {
    let tree = tree();
    let config = RetrievalConfig::default();
    let embedder = HashEmbedder::new(32);
    let err = AutoMergingRetriever::new(&tree, &FailingIndex, &embedder, &config).retrieve("q", 3).unwrap_err();
    assert!(err.is_unavailable());
    let err = SectionFilterResolver::new(&tree, &FailingIndex, &embedder, &config).resolve("q", "POLICY", 3).unwrap_err();
    assert!(err.is_unavailable());
}

#[test]
fn section_tiers_stop_at_first_non_empty() {
    let tree = tree();
    let config = RetrievalConfig::default();
    let embedder = HashEmbedder::new(32);

    let exact = ScriptedIndex::default().respond(&[(meta_keys::SECTION_TITLE, "POLICY INFORMATION")], &[("S2", 0.4), ("S1", 0.8)]);
    let r = SectionFilterResolver::new(&tree, &exact, &embedder, &config).resolve("q", "POLICY INFORMATION", 3).unwrap();
    assert_eq!(r.tier, Some(ProvenanceTier::Exact));
    assert_eq!(r.ids(), vec!["S1", "S2"], "ranked within the returned set");
    assert_eq!(exact.calls().len(), 1);

    let partial = ScriptedIndex::default().respond(&[], &[("S3", 0.9), ("S4", 0.5)]);
    let r = SectionFilterResolver::new(&tree, &partial, &embedder, &config).resolve("q", "policy info", 1).unwrap();
    assert_eq!(r.tier, Some(ProvenanceTier::Partial));
    assert_eq!(r.ids(), vec!["S3"]);
    assert!(r.fragments.iter().all(|f| f.provenance_tier == Some(ProvenanceTier::Partial)));
    assert_eq!(partial.calls()[1].0, 3, "tier 2 over-fetches k times the multiplier");

    let typo = ScriptedIndex::default().respond(&[], &[("S5", 0.2)]);
    let r = SectionFilterResolver::new(&tree, &typo, &embedder, &config).resolve("q", "POLCY INFO", 3).unwrap();
    assert_eq!(r.tier, Some(ProvenanceTier::Unfiltered));
    assert_eq!(r.ids(), vec!["S5"]);
    assert_eq!(typo.calls().len(), 3);

    let empty = ScriptedIndex::default();
    let r = SectionFilterResolver::new(&tree, &empty, &embedder, &config).resolve("q", "POLICY", 3).unwrap();
    assert!(r.is_empty(), "empty after tier 3 is a valid result");
    assert_eq!(r.tier, Some(ProvenanceTier::Unfiltered));
}
