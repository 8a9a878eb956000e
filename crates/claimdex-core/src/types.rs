//! Domain types shared by the chunk builder, the vector indexes and the retrievers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;
pub type Meta = HashMap<String, String>;
/// Equality-only predicate map; every entry must match.
pub type Filter = BTreeMap<String, String>;

/// Metadata keys written onto every indexed record.
pub mod meta_keys {
    pub const SECTION_TITLE: &str = "section_title";
    pub const DOC_TYPE: &str = "doc_type";
    pub const TIMESTAMP: &str = "timestamp";
    pub const CHUNK_LEVEL: &str = "chunk_level";
    pub const PARENT_ID: &str = "parent_id";

    pub const ALL: [&str; 5] = [SECTION_TITLE, DOC_TYPE, TIMESTAMP, CHUNK_LEVEL, PARENT_ID];
}

fn default_doc_type() -> String { "general".to_string() }

/// A titled unit of source text as handed over by the document loader.
///
/// `summary` is optional: when a pre-computed summary exists upstream it is
/// used verbatim by the summary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl Section {
    pub fn new(title: impl Into<String>, doc_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self { title: title.into(), doc_type: doc_type.into(), text: text.into(), timestamp: None, summary: None }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self { self.timestamp = Some(timestamp.into()); self }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self { self.summary = Some(summary.into()); self }
}

/// Chunk granularity, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkLevel {
    Large,
    Medium,
    Small,
}

impl ChunkLevel {
    pub const ALL: [ChunkLevel; 3] = [ChunkLevel::Large, ChunkLevel::Medium, ChunkLevel::Small];

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkLevel::Large => "large",
            ChunkLevel::Medium => "medium",
            ChunkLevel::Small => "small",
        }
    }

    pub(crate) fn letter(self) -> char {
        match self {
            ChunkLevel::Large => 'l',
            ChunkLevel::Medium => 'm',
            ChunkLevel::Small => 's',
        }
    }

    /// The next-coarser level, `None` for `Large`.
    pub fn parent(self) -> Option<ChunkLevel> {
        match self {
            ChunkLevel::Large => None,
            ChunkLevel::Medium => Some(ChunkLevel::Large),
            ChunkLevel::Small => Some(ChunkLevel::Medium),
        }
    }

    /// The next-finer level, `None` for `Small`.
    pub fn child(self) -> Option<ChunkLevel> {
        match self {
            ChunkLevel::Large => Some(ChunkLevel::Medium),
            ChunkLevel::Medium => Some(ChunkLevel::Small),
            ChunkLevel::Small => None,
        }
    }
}

impl fmt::Display for ChunkLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ChunkLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "large" => Ok(ChunkLevel::Large),
            "medium" => Ok(ChunkLevel::Medium),
            "small" => Ok(ChunkLevel::Small),
            other => Err(Error::InvalidConfig(format!("unknown chunk level '{}'", other))),
        }
    }
}

/// Byte range into the owning section's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self { Self { start, end } }
    pub fn len(&self) -> usize { self.end.saturating_sub(self.start) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn contains(&self, other: &Span) -> bool { self.start <= other.start && other.end <= self.end }
}

/// Section-level facts copied onto every chunk so indexes can filter without
/// walking up the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub section_index: usize,
    pub section_title: String,
    pub doc_type: String,
    pub timestamp: Option<String>,
}

/// One node of the chunk tree.
///
/// - `id`: stable identifier derived from section, level and span
/// - `text`: exact slice `section.text[span.start..span.end]`
/// - `parent_id`: the containing chunk one level up, `None` for large chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub level: ChunkLevel,
    pub parent_id: Option<ChunkId>,
    pub span: Span,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Flat metadata handed to the vector index alongside the embedding.
    pub fn filter_metadata(&self) -> Meta {
        let mut meta = Meta::new();
        meta.insert(meta_keys::SECTION_TITLE.to_string(), self.metadata.section_title.clone());
        meta.insert(meta_keys::DOC_TYPE.to_string(), self.metadata.doc_type.clone());
        meta.insert(meta_keys::TIMESTAMP.to_string(), self.metadata.timestamp.clone().unwrap_or_default());
        meta.insert(meta_keys::CHUNK_LEVEL.to_string(), self.level.as_str().to_string());
        meta.insert(meta_keys::PARENT_ID.to_string(), self.parent_id.clone().unwrap_or_default());
        meta
    }
}

/// Raw nearest-neighbour hit. `score` is cosine similarity, higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
}

impl SearchHit {
    pub fn new(id: impl Into<ChunkId>, score: f32) -> Self { Self { id: id.into(), score } }
}

/// Which stage of the section filter produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ProvenanceTier {
    Exact = 1,
    Partial = 2,
    Unfiltered = 3,
}

impl ProvenanceTier {
    pub fn number(self) -> u8 { self as u8 }
}

impl From<ProvenanceTier> for u8 {
    fn from(tier: ProvenanceTier) -> u8 { tier.number() }
}

impl TryFrom<u8> for ProvenanceTier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ProvenanceTier::Exact),
            2 => Ok(ProvenanceTier::Partial),
            3 => Ok(ProvenanceTier::Unfiltered),
            n => Err(format!("provenance tier must be 1..=3, got {}", n)),
        }
    }
}

/// A ranked piece of context for the answer generator.
///
/// `level` is `None` for summary-index entries. `merged_from` lists the finer
/// chunks a promoted parent replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: ChunkId,
    pub text: String,
    pub section_title: String,
    pub doc_type: String,
    pub timestamp: Option<String>,
    pub level: Option<ChunkLevel>,
    pub score: f32,
    pub provenance_tier: Option<ProvenanceTier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<ChunkId>,
}

impl Fragment {
    pub fn from_chunk(chunk: &Chunk, score: f32) -> Self {
        Self {
            id: chunk.id.clone(),
            text: chunk.text.clone(),
            section_title: chunk.metadata.section_title.clone(),
            doc_type: chunk.metadata.doc_type.clone(),
            timestamp: chunk.metadata.timestamp.clone(),
            level: Some(chunk.level),
            score,
            provenance_tier: None,
            merged_from: Vec::new(),
        }
    }
}

/// Ordered output of one retrieval call. An empty result means "no evidence
/// found" and is not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub fragments: Vec<Fragment>,
    pub tier: Option<ProvenanceTier>,
}

impl RetrievalResult {
    pub fn new(fragments: Vec<Fragment>) -> Self { Self { fragments, tier: None } }

    pub fn empty() -> Self { Self::default() }

    /// Stamp the satisfying section-filter tier on the result and every fragment.
    pub fn with_tier(mut self, tier: ProvenanceTier) -> Self {
        for f in &mut self.fragments { f.provenance_tier = Some(tier); }
        self.tier = Some(tier);
        self
    }

    pub fn len(&self) -> usize { self.fragments.len() }
    pub fn is_empty(&self) -> bool { self.fragments.is_empty() }
    pub fn top(&self) -> Option<&Fragment> { self.fragments.first() }
    pub fn ids(&self) -> Vec<&str> { self.fragments.iter().map(|f| f.id.as_str()).collect() }
}
