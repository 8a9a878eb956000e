//! Per-section summaries in their own vector collection, queried directly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use claimdex_core::traits::{Embedder, VectorIndex};
use claimdex_core::types::{meta_keys, Fragment, Meta, RetrievalResult, Section};
use claimdex_core::{Error, Result};

pub const SUMMARY_LEVEL: &str = "summary";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub id: String,
    pub section_index: usize,
    pub section_title: String,
    pub doc_type: String,
    pub timestamp: Option<String>,
    pub text: String,
}

impl SectionSummary {
    pub fn new(section_index: usize, section: &Section, text: impl Into<String>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(section_index as u64).to_le_bytes());
        hasher.update(section.title.as_bytes());
        let hex = hasher.finalize().to_hex();
        Self {
            id: format!("sum-{}", &hex.as_str()[..16]),
            section_index,
            section_title: section.title.clone(),
            doc_type: section.doc_type.clone(),
            timestamp: section.timestamp.clone().filter(|t| !t.trim().is_empty()),
            text: text.into(),
        }
    }

    fn filter_metadata(&self) -> Meta {
        let mut meta = Meta::new();
        meta.insert(meta_keys::SECTION_TITLE.to_string(), self.section_title.clone());
        meta.insert(meta_keys::DOC_TYPE.to_string(), self.doc_type.clone());
        meta.insert(meta_keys::TIMESTAMP.to_string(), self.timestamp.clone().unwrap_or_default());
        meta.insert(meta_keys::CHUNK_LEVEL.to_string(), SUMMARY_LEVEL.to_string());
        meta.insert(meta_keys::PARENT_ID.to_string(), String::new());
        meta
    }

    fn to_fragment(&self, score: f32) -> Fragment {
        Fragment {
            id: self.id.clone(),
            text: self.text.clone(),
            section_title: self.section_title.clone(),
            doc_type: self.doc_type.clone(),
            timestamp: self.timestamp.clone(),
            level: None,
            score,
            provenance_tier: None,
            merged_from: Vec::new(),
        }
    }
}

/// Produces a summary for a section that arrives without one.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, section: &Section) -> Result<String>;
}

/// Leading sentences of the section, up to a word budget. A first sentence
/// longer than the budget is cut at the budget.
#[derive(Debug, Clone)]
pub struct LeadSummarizer {
    max_words: usize,
}

impl LeadSummarizer {
    pub fn new(max_words: usize) -> Self { Self { max_words: max_words.max(1) } }
}

impl Default for LeadSummarizer {
    fn default() -> Self { Self::new(60) }
}

impl Summarizer for LeadSummarizer {
    fn summarize(&self, section: &Section) -> Result<String> {
        let mut out: Vec<&str> = Vec::new();
        let mut sentence: Vec<&str> = Vec::new();
        for word in section.text.split_whitespace() {
            sentence.push(word);
            let ends = word.trim_end_matches(['"', '\'', ')', ']']).ends_with(['.', '!', '?']);
            if ends {
                if !out.is_empty() && out.len() + sentence.len() > self.max_words {
                    break;
                }
                out.append(&mut sentence);
                if out.len() >= self.max_words {
                    break;
                }
            }
        }
        if out.is_empty() {
            out = sentence;
        }
        out.truncate(self.max_words);
        Ok(out.join(" "))
    }
}

pub struct SummaryIndex {
    entries: HashMap<String, SectionSummary>,
    order: Vec<String>,
    index: Box<dyn VectorIndex>,
}

impl SummaryIndex {
    pub fn new(index: Box<dyn VectorIndex>) -> Self { Self { entries: HashMap::new(), order: Vec::new(), index } }

    /// Summaries for the given sections: the section's own summary when present,
    /// otherwise the summarizer's.
    pub fn summarize_sections<'s>(
        sections: impl IntoIterator<Item = (usize, &'s Section)>,
        summarizer: &dyn Summarizer,
    ) -> Result<Vec<SectionSummary>> {
        let mut out = Vec::new();
        for (index, section) in sections {
            let text = match section.summary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                Some(given) => given.to_string(),
                None => summarizer.summarize(section)?,
            };
            out.push(SectionSummary::new(index, section, text));
        }
        Ok(out)
    }

    /// Embed and store `summaries`, then flush the collection.
    pub fn insert_all(&mut self, summaries: Vec<SectionSummary>, embedder: &dyn Embedder, batch_size: usize) -> Result<()> {
        for batch in summaries.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts)?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!("expected {} vectors, got {}", batch.len(), vectors.len())));
            }
            for (summary, vector) in batch.iter().zip(&vectors) {
                self.index.upsert(&summary.id, vector, &summary.filter_metadata())?;
            }
        }
        self.index.flush()?;
        for summary in summaries {
            if !self.entries.contains_key(&summary.id) {
                self.order.push(summary.id.clone());
            }
            self.entries.insert(summary.id.clone(), summary);
        }
        info!(summaries = self.order.len(), "summary index ready");
        Ok(())
    }

    /// Register summaries whose vectors are already stored in the collection.
    pub fn attach(&mut self, summaries: Vec<SectionSummary>) {
        for summary in summaries {
            if !self.entries.contains_key(&summary.id) {
                self.order.push(summary.id.clone());
            }
            self.entries.insert(summary.id.clone(), summary);
        }
    }

    pub fn query(&self, embedder: &dyn Embedder, question: &str, k: usize) -> Result<RetrievalResult> {
        let embedding = embedder.embed_one(question)?;
        let hits = self.index.query(&embedding, k, None)?;
        let fragments: Vec<Fragment> =
            hits.iter().filter_map(|h| self.entries.get(&h.id).map(|s| s.to_fragment(h.score))).collect();
        debug!(hits = fragments.len(), "summary retrieval");
        Ok(RetrievalResult::new(fragments))
    }

    pub fn get(&self, id: &str) -> Option<&SectionSummary> { self.entries.get(id) }

    pub fn summaries(&self) -> impl Iterator<Item = &SectionSummary> + '_ { self.order.iter().filter_map(|id| self.entries.get(id)) }

    pub fn len(&self) -> usize { self.order.len() }

    pub fn is_empty(&self) -> bool { self.order.is_empty() }
}
