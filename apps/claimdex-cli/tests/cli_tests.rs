use std::fs;
use std::sync::Arc;

use claimdex_cli::{build_in_memory, load_sections, ClaimCalculator, DaySpanTool, PayoutTool};
use claimdex_core::config::Settings;
use claimdex_core::traits::Embedder;
use claimdex_core::Section;
use claimdex_retrieval::{ActiveIndex, ComputationRequest, ComputationTool, OperandKind, OperandSpan, QueryEngine, RoutePath};

fn operand(kind: OperandKind, text: &str) -> OperandSpan { led(kind, "", text) }

fn led(kind: OperandKind, lead: &str, text: &str) -> OperandSpan {
    OperandSpan {
        kind,
        text: text.to_string(),
        fragment_id: "s-1".to_string(),
        start: 0,
        end: text.len(),
        lead: lead.to_string(),
    }
}

fn engine_over(sections: &[Section]) -> QueryEngine {
    let settings = Settings::default();
    let embedder: Arc<dyn Embedder> = Arc::new(claimdex_embed::HashEmbedder::new(256));
    let active = Arc::new(ActiveIndex::new());
    let generation = build_in_memory(&settings, embedder.clone(), &active, sections).unwrap();
    active.swap(generation).unwrap();
    QueryEngine::new(active, embedder, settings.retrieval.clone()).with_tool(Box::new(ClaimCalculator))
}

#[test]
fn day_span_counts_between_earliest_and_latest() {
    let request = ComputationRequest {
        question: "How many days was the rental?".to_string(),
        operands: vec![
            operand(OperandKind::Date, "March 28, 2024"),
            operand(OperandKind::Date, "03/16/2024"),
            operand(OperandKind::Amount, "$45.00"),
        ],
    };
    let out = DaySpanTool.compute(&request).unwrap();
    assert_eq!(out["span"]["days"], 12);
    assert_eq!(out["span"]["from"], "2024-03-16");
    assert_eq!(out["amounts"][0], "$45.00");
}

#[test]
fn day_span_without_operands_is_an_error() {
    let request = ComputationRequest { question: "How long?".to_string(), operands: vec![] };
    assert!(DaySpanTool.compute(&request).is_err());
}

#[test]
fn text_file_to_answer_in_memory() {
    let tmp = tempfile::tempdir().unwrap();
    let banner = "=".repeat(80);
    let doc = format!(
        "{b}\nSECTION 1: RENTAL DOCUMENTATION\n{b}\nRental car picked up on March 16, 2024 and returned on March 28, 2024.\n\n\
         {b}\nSECTION 2: POLICY INFORMATION\n{b}\nThe collision deductible is $750.\n",
        b = banner
    );
    let path = tmp.path().join("claim.txt");
    fs::write(&path, doc).unwrap();

    let sections = load_sections(&path).unwrap();
    assert_eq!(sections.len(), 2);

    let settings = Settings::default();
    let embedder: Arc<dyn Embedder> = Arc::new(claimdex_embed::HashEmbedder::new(256));
    let active = Arc::new(ActiveIndex::new());
    let generation = build_in_memory(&settings, embedder.clone(), &active, &sections).unwrap();
    assert_eq!(generation.report.sections_indexed, 2);
    active.swap(generation).unwrap();

    let engine = QueryEngine::new(active, embedder, settings.retrieval.clone()).with_tool(Box::new(DaySpanTool));
    let outcome = engine.ask("How many days was the rental car out?").unwrap();
    assert_eq!(outcome.route.path, RoutePath::Computation);
    assert_eq!(outcome.tool_output.unwrap()["span"]["days"], 12);
}

#[test]
fn payout_subtracts_deductible_and_applies_limit() {
    let request = ComputationRequest {
        question: "Estimate the payout".to_string(),
        operands: vec![
            led(OperandKind::Amount, "The collision deductible is", "$750"),
            led(OperandKind::Amount, "Body shop repair estimate totals", "$4,200.00"),
            led(OperandKind::Amount, "Rental daily rate", "$45.00"),
        ],
    };
    let out = PayoutTool.compute(&request).unwrap();
    assert_eq!(out["damage_amount"], 4200.0);
    assert_eq!(out["deductible"], 750.0);
    assert_eq!(out["estimated_payout"], 3450.0);
    assert_eq!(out["out_of_pocket"], 750.0);
    assert_eq!(out["coverage_percentage"], 82.1);
    assert_eq!(out["payout_limited_by_policy"], false);

    let mut capped = request.clone();
    capped.operands.push(led(OperandKind::Amount, "Collision coverage limit", "$3,000"));
    let out = PayoutTool.compute(&capped).unwrap();
    assert_eq!(out["estimated_payout"], 3000.0);
    assert_eq!(out["payout_limited_by_policy"], true);
}

#[test]
fn payout_without_deductible_is_an_error() {
    let request = ComputationRequest {
        question: "Estimate the payout".to_string(),
        operands: vec![led(OperandKind::Amount, "Repairs came to", "$4,200.00")],
    };
    assert!(PayoutTool.compute(&request).is_err());
}

#[test]
fn payout_question_through_the_engine() {
    let sections = vec![
        Section::new("POLICY INFORMATION", "policy_information", "The collision deductible is $750 per incident."),
        Section::new("REPAIR ESTIMATE", "repair_estimate", "Body shop repair estimate totals $4,200.00 for the sedan."),
    ];
    let outcome = engine_over(&sections).ask("Estimate the payout after the deductible for the repair").unwrap();
    assert_eq!(outcome.route.path, RoutePath::Computation);
    assert!(outcome.tool_error.is_none());
    assert_eq!(outcome.tool_output.unwrap()["estimated_payout"], 3450.0);
}

#[test]
fn tool_failure_keeps_the_retrieved_context() {
    let sections = vec![Section::new(
        "Witness Statements",
        "witness_statements",
        "Maria Lopez saw the blue truck run the red light at Oak Street.",
    )];
    let outcome = engine_over(&sections).ask("Estimate the payout for the blue truck damage").unwrap();
    assert_eq!(outcome.route.path, RoutePath::Computation);
    assert!(!outcome.result.is_empty());
    assert!(outcome.tool_output.is_none());
    assert!(outcome.tool_error.unwrap().contains("deductible"));
}
