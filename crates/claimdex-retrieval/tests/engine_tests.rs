use std::collections::HashSet;
use std::sync::Arc;

use tempfile::TempDir;

use claimdex_core::config::{RetrievalConfig, Settings};
use claimdex_core::traits::{Embedder, VectorIndex};
use claimdex_core::types::{Filter, Meta, ProvenanceTier, SearchHit};
use claimdex_core::{Error, Result, Section};
use claimdex_embed::HashEmbedder;
use claimdex_retrieval::{
    render_context, ActiveIndex, ComputationRequest, ComputationTool, GenerationBuilder, GenerationManifest, IndexGeneration,
    QueryEngine, QueryRouter, RouteCategory, RoutePath, SectionFilterResolver,
};
use claimdex_vector::MemoryIndex;

fn claim_sections() -> Vec<Section> {
    vec![
        Section::new(
            "POLICY INFORMATION",
            "policy_information",
            "Policy POL-2024-88 covers the insured sedan. The collision deductible is $750 per incident.",
        ),
        Section::new(
            "Witness Statements",
            "witness_statements",
            "Maria Lopez saw the blue truck run the red light at Oak Street. She stayed until officers arrived.",
        ),
        Section::new(
            "RENTAL DOCUMENTATION",
            "rental_documentation",
            "Rental car pickup on March 16, 2024. Rental car returned on March 28, 2024 after repairs finished.",
        )
        .with_timestamp("March 16, 2024"),
    ]
}

fn embedder() -> Arc<dyn Embedder> { Arc::new(HashEmbedder::new(512)) }

fn build(active: &ActiveIndex, sections: &[Section]) -> IndexGeneration {
    let id = active.next_generation_id();
    GenerationBuilder::new(&Settings::default(), embedder())
        .build(id, sections, Box::new(MemoryIndex::new()), Box::new(MemoryIndex::new()))
        .expect("build generation")
}

fn engine(sections: &[Section]) -> QueryEngine {
    let active = Arc::new(ActiveIndex::new());
    let generation = build(&active, sections);
    active.swap(generation).expect("swap");
    QueryEngine::new(active, embedder(), RetrievalConfig::default())
}

#[test]
fn needle_question_finds_the_deductible() {
    let outcome = engine(&claim_sections()).ask("What was the exact deductible?").unwrap();
    assert_eq!(outcome.route.path, RoutePath::Needle);
    let top = outcome.result.top().expect("a fragment");
    assert!(top.text.contains("$750"));
    assert_eq!(top.section_title, "POLICY INFORMATION");
}

#[test]
fn summary_question_reads_the_summary_index_only() {
    let sections =
        vec![Section::new("Complete Document", "insurance_claim", "Long claim narrative. It has details.").with_summary(
            "Rear-end collision on March 15, 2024; claim approved and closed.",
        )];
    let outcome = engine(&sections).ask("Summarize what happened").unwrap();
    assert_eq!(outcome.route.path, RoutePath::Summary);
    assert_eq!(outcome.result.len(), 1);
    let entry = &outcome.result.fragments[0];
    assert_eq!(entry.level, None, "summary entries are not chunks");
    assert_eq!(entry.text, "Rear-end collision on March 15, 2024; claim approved and closed.");
}

#[test]
fn section_named_in_other_case_resolves_at_tier_two() {
    let outcome = engine(&claim_sections()).ask("What did the WITNESS STATEMENTS say about the truck?").unwrap();
    assert_eq!(outcome.route.path, RoutePath::Section { label: "WITNESS STATEMENTS".to_string() });
    assert_eq!(outcome.result.tier, Some(ProvenanceTier::Partial));
    assert!(!outcome.result.is_empty());
    assert!(outcome.result.fragments.iter().all(|f| f.section_title == "Witness Statements"));
}

#[test]
fn explicit_section_prefix_with_exact_title_is_tier_one() {
    let outcome = engine(&claim_sections()).ask("POLICY INFORMATION|deductible").unwrap();
    assert_eq!(outcome.route.question, "deductible");
    assert_eq!(outcome.result.tier, Some(ProvenanceTier::Exact));
}

#[test]
fn misspelled_section_still_returns_context() {
    let active = ActiveIndex::new();
    let generation = build(&active, &claim_sections());
    let config = RetrievalConfig::default();
    let e = embedder();
    let resolver = SectionFilterResolver::new(&generation.tree, generation.chunk_index.as_ref(), e.as_ref(), &config);
    let result = resolver.resolve("who saw the truck", "WITNES STATMENTS", 3).unwrap();
    assert!(!result.is_empty());
    assert_eq!(result.tier.map(|t| t.number()), Some(3));
}

#[test]
fn router_priority_and_ambiguity() {
    let router = QueryRouter::new(["INCIDENT TIMELINE", "POLICY INFORMATION", "POLICY"]);

    let d = router.route("Give me the exact timeline of events");
    assert_eq!(d.path, RoutePath::Needle);
    assert_eq!(d.matched, vec![RouteCategory::Needle, RouteCategory::Summary]);
    assert!(d.ambiguous);

    let d = router.route("What does the policy information say?");
    assert_eq!(d.path, RoutePath::Section { label: "policy information".to_string() });

    let d = router.route("Calculate the estimated payout for the incident timeline");
    assert_eq!(d.path, RoutePath::Section { label: "incident timeline".to_string() });
    assert!(d.matched.contains(&RouteCategory::Computation));

    assert_eq!(router.route("How many days was the car in the shop?").path, RoutePath::Computation);
    assert_eq!(router.route("Give me an overview").path, RoutePath::Summary);
    assert_eq!(router.route("Anything about the weather?").path, RoutePath::Hybrid);
    assert!(!router.route("Anything about the weather?").ambiguous);
}

#[test]
fn hybrid_concatenates_without_duplicates() {
    let outcome = engine(&claim_sections()).ask("Tell me about the blue truck").unwrap();
    assert_eq!(outcome.route.path, RoutePath::Hybrid);
    let ids: Vec<&str> = outcome.result.ids();
    let unique: HashSet<&str> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
    assert!(outcome.result.fragments[0].level.is_none(), "summaries come first");
    assert!(outcome.result.fragments.iter().any(|f| f.level.is_some()));
}

struct DayCounter;

impl ComputationTool for DayCounter {
    fn name(&self) -> &str { "day-counter" }

    fn compute(&self, request: &ComputationRequest) -> Result<serde_json::Value> {
        let dates: Vec<&str> = request
            .operands
            .iter()
            .filter(|o| o.kind == claimdex_retrieval::OperandKind::Date)
            .map(|o| o.text.as_str())
            .collect();
        Ok(serde_json::json!({ "dates": dates }))
    }
}

#[test]
fn computation_hands_operands_to_the_tool() {
    let outcome = engine(&claim_sections()).with_tool(Box::new(DayCounter)).ask("How many days was the rental car out?").unwrap();
    assert_eq!(outcome.route.path, RoutePath::Computation);
    let request = outcome.computation.expect("operands located");
    let texts: Vec<&str> = request.operands.iter().map(|o| o.text.as_str()).collect();
    assert!(texts.contains(&"March 16, 2024"));
    assert!(texts.contains(&"March 28, 2024"));
    let dates = outcome.tool_output.expect("tool ran")["dates"].as_array().map(|a| a.len()).unwrap_or(0);
    assert!(dates >= 2);
}

#[test]
fn computation_without_tool_returns_request() {
    let outcome = engine(&claim_sections()).ask("Calculate the deductible").unwrap();
    assert_eq!(outcome.route.path, RoutePath::Computation);
    assert!(outcome.computation.is_some());
    assert!(outcome.tool_output.is_none());
}

struct RefusingTool;

impl ComputationTool for RefusingTool {
    fn name(&self) -> &str { "refusing" }

    fn compute(&self, _request: &ComputationRequest) -> Result<serde_json::Value> {
        Err(Error::Operation("no usable operands".to_string()))
    }
}

#[test]
fn tool_failure_is_reported_not_raised() {
    let outcome = engine(&claim_sections()).with_tool(Box::new(RefusingTool)).ask("Calculate the deductible").unwrap();
    assert_eq!(outcome.route.path, RoutePath::Computation);
    assert!(!outcome.result.is_empty(), "context survives");
    assert!(outcome.computation.is_some());
    assert!(outcome.tool_output.is_none());
    assert_eq!(outcome.tool_error.as_deref(), Some("Operation failed: no usable operands"));
}

#[test]
fn generation_router_knows_its_sections() {
    let active = ActiveIndex::new();
    let generation = build(&active, &claim_sections());
    let d = generation.router.route("What is in the rental documentation?");
    assert_eq!(d.path, RoutePath::Section { label: "rental documentation".to_string() });
    let d = generation.router.route("What was the exact deductible | collision amount?");
    assert_eq!(d.path, RoutePath::Needle);
}

struct DownIndex;

impl VectorIndex for DownIndex {
    fn upsert(&mut self, _id: &str, _embedding: &[f32], _meta: &Meta) -> Result<()> { Ok(()) }

    fn query(&self, _embedding: &[f32], _k: usize, _filter: Option<&Filter>) -> Result<Vec<SearchHit>> {
        Err(Error::IndexUnavailable("store offline".to_string()))
    }

    fn len(&self) -> usize { 0 }
}

#[test]
fn index_outage_is_not_an_empty_result() {
    let active = Arc::new(ActiveIndex::new());
    let generation = GenerationBuilder::new(&Settings::default(), embedder())
        .build(active.next_generation_id(), &claim_sections(), Box::new(DownIndex), Box::new(DownIndex))
        .unwrap();
    active.swap(generation).unwrap();
    let engine = QueryEngine::new(active, embedder(), RetrievalConfig::default());
    for question in ["What was the exact deductible?", "Summarize what happened", "Tell me about it"] {
        let err = engine.ask(question).unwrap_err();
        assert!(matches!(err, Error::IndexUnavailable(_)), "{}", question);
    }
}

#[test]
fn swap_is_atomic_for_readers() {
    let active = Arc::new(ActiveIndex::new());
    assert!(matches!(active.current(), Err(Error::NotFound(_))));

    let first = build(&active, &claim_sections()[..1]);
    assert!(active.swap(first).unwrap().is_none());
    let reader = active.current().unwrap();

    let second = build(&active, &claim_sections());
    let previous = active.swap(second).unwrap().expect("old generation handed back");
    assert_eq!(previous.id, reader.id);
    assert_eq!(reader.section_titles(), vec!["POLICY INFORMATION".to_string()], "held snapshot unchanged");
    assert_eq!(active.current().unwrap().section_titles().len(), 3);
    assert!(active.current().unwrap().id > reader.id);
}

#[test]
fn manifest_round_trip_restores_answers() {
    let tmp = TempDir::new().unwrap();
    let active = ActiveIndex::new();
    let generation = build(&active, &claim_sections());
    let manifest = generation.manifest();
    manifest.save(tmp.path()).unwrap();

    let loaded = GenerationManifest::load(tmp.path(), generation.id).unwrap();
    assert_eq!(loaded.chunks.len(), generation.tree.len());
    let restored = GenerationBuilder::new(&Settings::default(), embedder())
        .restore(loaded, Box::new(MemoryIndex::new()), Box::new(MemoryIndex::new()), true)
        .unwrap();
    assert_eq!(restored.summaries.len(), 3);

    let active = Arc::new(ActiveIndex::new());
    active.swap(restored).unwrap();
    let outcome = QueryEngine::new(active, embedder(), RetrievalConfig::default()).ask("What was the exact deductible?").unwrap();
    assert!(outcome.result.top().map_or(false, |f| f.text.contains("$750")));

    assert!(matches!(GenerationManifest::load(tmp.path(), 99), Err(Error::NotFound(_))));
}

#[test]
fn rendered_context_numbers_fragments() {
    let outcome = engine(&claim_sections()).ask("POLICY INFORMATION|deductible").unwrap();
    let text = render_context(&outcome.result.fragments, true);
    assert!(text.contains("--- Result 1 (Score: "));
    assert!(text.contains("Section: POLICY INFORMATION"));
    assert!(text.contains("Provenance Tier: 1"));
    let bare = render_context(&outcome.result.fragments, false);
    assert!(!bare.contains("Section:"));
}
