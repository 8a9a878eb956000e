//! Wiring shared by the `claimdex` binaries: settings, logging, section input
//! and index generations for the configured backend.

use anyhow::Context;
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use claimdex_core::config::{Config, IndexBackend, Settings};
use claimdex_core::sections::SectionLoader;
use claimdex_core::traits::Embedder;
use claimdex_core::{Error, Section};
use claimdex_embed::default_embedder;
use claimdex_retrieval::{
    ActiveIndex, ComputationRequest, ComputationTool, GenerationBuilder, IndexGeneration, OperandKind, OperandSpan,
};
use claimdex_vector::MemoryIndex;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    info!(env = config.env_name(), "configuration loaded");
    Ok(config.settings()?)
}

pub fn load_sections(input: &Path) -> anyhow::Result<Vec<Section>> {
    SectionLoader::new().load_path(input).with_context(|| format!("loading sections from {}", input.display()))
}

pub fn embedder(settings: &Settings) -> anyhow::Result<Arc<dyn Embedder>> { Ok(Arc::from(default_embedder(&settings.embedding)?)) }

/// Directory holding the LanceDB tables and generation manifests.
pub fn index_dir(settings: &Settings, override_dir: Option<PathBuf>) -> PathBuf {
    override_dir.unwrap_or_else(|| claimdex_core::config::expand_path(&settings.index.lancedb_dir))
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{spinner} embedding [{bar:40}] {pos}/{len} chunks") {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

fn builder(settings: &Settings, embedder: Arc<dyn Embedder>, pb: &ProgressBar) -> GenerationBuilder {
    let bar = pb.clone();
    GenerationBuilder::new(settings, embedder).on_progress(move |done, total| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    })
}

/// Build a generation into in-process collections.
pub fn build_in_memory(
    settings: &Settings,
    embedder: Arc<dyn Embedder>,
    active: &ActiveIndex,
    sections: &[Section],
) -> anyhow::Result<IndexGeneration> {
    let pb = progress_bar();
    let generation = builder(settings, embedder, &pb).build(
        active.next_generation_id(),
        sections,
        Box::new(MemoryIndex::new()),
        Box::new(MemoryIndex::new()),
    )?;
    pb.finish_and_clear();
    Ok(generation)
}

/// Build a generation for the configured backend. LanceDB generations are
/// written to fresh tables and published once complete.
pub fn build_generation(
    settings: &Settings,
    embedder: Arc<dyn Embedder>,
    active: &ActiveIndex,
    sections: &[Section],
    dir: &Path,
) -> anyhow::Result<IndexGeneration> {
    match settings.index.backend {
        IndexBackend::Memory => build_in_memory(settings, embedder, active, sections),
        IndexBackend::Lance => lance_backend::build(settings, embedder, active, sections, dir),
    }
}

/// Reopen the published generation, if the backend keeps one.
pub fn open_generation(
    settings: &Settings,
    embedder: Arc<dyn Embedder>,
    dir: &Path,
) -> anyhow::Result<Option<IndexGeneration>> {
    match settings.index.backend {
        IndexBackend::Memory => Ok(None),
        IndexBackend::Lance => lance_backend::open(settings, embedder, dir),
    }
}

const DATE_FORMATS: [&str; 3] = ["%B %d, %Y", "%m/%d/%Y", "%Y-%m-%d"];

fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS.iter().find_map(|f| NaiveDate::parse_from_str(text, f).ok())
}

/// Day count between the earliest and latest date operand, plus the amounts
/// found, for date-math questions.
#[derive(Debug, Default, Clone, Copy)]
pub struct DaySpanTool;

impl ComputationTool for DaySpanTool {
    fn name(&self) -> &str { "day-span" }

    fn compute(&self, request: &ComputationRequest) -> claimdex_core::Result<serde_json::Value> {
        let mut dates: Vec<NaiveDate> = request
            .operands
            .iter()
            .filter(|o| o.kind == OperandKind::Date)
            .filter_map(|o| parse_date(&o.text))
            .collect();
        dates.sort();
        let amounts: Vec<&str> =
            request.operands.iter().filter(|o| o.kind == OperandKind::Amount).map(|o| o.text.as_str()).collect();
        let span = match (dates.first(), dates.last()) {
            (Some(first), Some(last)) if dates.len() >= 2 => serde_json::json!({
                "from": first.to_string(),
                "to": last.to_string(),
                "days": (*last - *first).num_days(),
            }),
            _ => serde_json::Value::Null,
        };
        if span.is_null() && amounts.is_empty() {
            return Err(Error::Operation("no usable dates or amounts in the retrieved context".to_string()));
        }
        Ok(serde_json::json!({ "span": span, "amounts": amounts }))
    }
}

/// "$4,200.00" -> 4200.0
fn parse_amount(text: &str) -> Option<f64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    digits.parse().ok()
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn lead_mentions(op: &OperandSpan, words: &[&str]) -> bool {
    let lead = op.lead.to_lowercase();
    words.iter().any(|w| lead.contains(w))
}

/// Coverage payout: damage minus deductible, capped by the policy limit.
///
/// The deductible and limit are the amounts whose preceding text names them;
/// the damage is the largest remaining amount.
#[derive(Debug, Default, Clone, Copy)]
pub struct PayoutTool;

impl ComputationTool for PayoutTool {
    fn name(&self) -> &str { "coverage-payout" }

    fn compute(&self, request: &ComputationRequest) -> claimdex_core::Result<serde_json::Value> {
        let amounts: Vec<(&OperandSpan, f64)> = request
            .operands
            .iter()
            .filter(|o| o.kind == OperandKind::Amount)
            .filter_map(|o| parse_amount(&o.text).map(|v| (o, v)))
            .collect();
        let deductible = amounts.iter().find(|(o, _)| lead_mentions(o, &["deductible"]));
        let limit = amounts.iter().find(|(o, _)| lead_mentions(o, &["limit", "maximum"]));
        let damage = amounts
            .iter()
            .filter(|(o, _)| !lead_mentions(o, &["deductible", "limit", "maximum"]))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let (Some(&(_, damage)), Some(&(_, deductible))) = (damage, deductible) else {
            return Err(Error::Operation("payout needs a damage amount and a deductible in the retrieved context".to_string()));
        };
        let limit = limit.map(|&(_, v)| v);
        let before_limit = (damage - deductible).max(0.0);
        let payout = limit.map_or(before_limit, |l| before_limit.min(l));
        let coverage = if damage > 0.0 { payout / damage * 100.0 } else { 0.0 };
        Ok(serde_json::json!({
            "damage_amount": round_to(damage, 2),
            "deductible": round_to(deductible, 2),
            "policy_limit": limit,
            "estimated_payout": round_to(payout, 2),
            "out_of_pocket": round_to(damage - payout, 2),
            "coverage_percentage": round_to(coverage, 1),
            "payout_limited_by_policy": payout < before_limit,
            "fully_covered": payout == before_limit && payout > 0.0,
        }))
    }
}

const PAYOUT_TERMS: [&str; 5] = ["payout", "deductible", "reimburse", "owed", "coverage"];

/// Tool registered by `claimdex ask`: payout questions go to `PayoutTool`,
/// everything else to `DaySpanTool`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaimCalculator;

impl ComputationTool for ClaimCalculator {
    fn name(&self) -> &str { "claim-calculator" }

    fn compute(&self, request: &ComputationRequest) -> claimdex_core::Result<serde_json::Value> {
        let question = request.question.to_lowercase();
        if PAYOUT_TERMS.iter().any(|t| question.contains(t)) {
            PayoutTool.compute(request)
        } else {
            DaySpanTool.compute(request)
        }
    }
}

#[cfg(feature = "lance")]
mod lance_backend {
    use super::*;
    use claimdex_retrieval::generation::ACTIVE_GENERATION_KEY;
    use claimdex_retrieval::{generation_table, GenerationManifest};
    use claimdex_vector::LanceStore;

    pub fn build(
        settings: &Settings,
        embedder: Arc<dyn Embedder>,
        active: &ActiveIndex,
        sections: &[Section],
        dir: &Path,
    ) -> anyhow::Result<IndexGeneration> {
        let store = LanceStore::open(dir)?;
        if let Some(published) = store.get_meta(ACTIVE_GENERATION_KEY)?.and_then(|v| v.parse::<u64>().ok()) {
            active.reserve_through(published);
        }
        let id = active.next_generation_id();
        let dim = embedder.dim();
        let chunks = store.index(&generation_table(&settings.index.chunks_table, id), dim)?;
        let summaries = store.index(&generation_table(&settings.index.summaries_table, id), dim)?;

        let pb = progress_bar();
        let generation = builder(settings, embedder, &pb).build(id, sections, Box::new(chunks), Box::new(summaries))?;
        pb.finish_and_clear();

        generation.manifest().save(dir)?;
        store.set_meta(ACTIVE_GENERATION_KEY, &id.to_string())?;
        info!(generation = id, dir = %dir.display(), "published generation");
        Ok(generation)
    }

    pub fn open(settings: &Settings, embedder: Arc<dyn Embedder>, dir: &Path) -> anyhow::Result<Option<IndexGeneration>> {
        if !dir.exists() {
            return Ok(None);
        }
        let store = LanceStore::open(dir)?;
        let Some(id) = store.get_meta(ACTIVE_GENERATION_KEY)?.and_then(|v| v.parse::<u64>().ok()) else {
            return Ok(None);
        };
        let manifest = GenerationManifest::load(dir, id)?;
        let dim = embedder.dim();
        let chunks = store.index(&generation_table(&settings.index.chunks_table, id), dim)?;
        let summaries = store.index(&generation_table(&settings.index.summaries_table, id), dim)?;
        let generation = GenerationBuilder::new(settings, embedder).restore(manifest, Box::new(chunks), Box::new(summaries), false)?;
        Ok(Some(generation))
    }
}

#[cfg(not(feature = "lance"))]
mod lance_backend {
    use super::*;

    fn missing() -> anyhow::Error {
        anyhow::anyhow!("index.backend = \"lance\" needs claimdex-cli built with the `lance` feature")
    }

    pub fn build(
        _settings: &Settings,
        _embedder: Arc<dyn Embedder>,
        _active: &ActiveIndex,
        _sections: &[Section],
        _dir: &Path,
    ) -> anyhow::Result<IndexGeneration> {
        Err(missing())
    }

    pub fn open(_settings: &Settings, _embedder: Arc<dyn Embedder>, _dir: &Path) -> anyhow::Result<Option<IndexGeneration>> {
        Err(missing())
    }
}
