//! Three-level chunk tree.
//!
//! Every section is cut into large chunks, every large chunk into medium
//! chunks and every medium chunk into small chunks. Children are always cut
//! from their parent's token range, so a child's span lies inside exactly one
//! parent. Cuts prefer a paragraph break, then a sentence end, inside the
//! second half of the budget window and fall back to a hard token cut.
//!
//! The tree is arena storage: chunks keyed by id with child lists per parent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::{ChunkingConfig, LevelBudget};
use crate::error::{Error, Result};
use crate::types::{Chunk, ChunkId, ChunkLevel, ChunkMetadata, Section, Span};

#[derive(Debug, Clone, Copy)]
struct Token {
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    None,
    Sentence,
    Paragraph,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() { tokens.push(Token { start: s, end: i }); }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start { tokens.push(Token { start: s, end: text.len() }); }
    tokens
}

/// Boundary that follows each token.
fn boundaries(text: &str, tokens: &[Token]) -> Vec<Boundary> {
    tokens
        .iter()
        .enumerate()
        .map(|(i, tok)| {
            let gap_end = tokens.get(i + 1).map_or(text.len(), |t| t.start);
            if text[tok.end..gap_end].matches('\n').count() >= 2 {
                return Boundary::Paragraph;
            }
            let word = text[tok.start..tok.end]
                .trim_end_matches(|c: char| matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}'));
            if word.ends_with(['.', '!', '?']) { Boundary::Sentence } else { Boundary::None }
        })
        .collect()
}

/// Exclusive cut position in `floor..=hard`, paragraph breaks first.
fn pick_cut(bounds: &[Boundary], floor: usize, hard: usize) -> Option<usize> {
    let find = |kind: Boundary| (floor..=hard).rev().find(|&e| bounds[e - 1] == kind);
    find(Boundary::Paragraph).or_else(|| find(Boundary::Sentence))
}

/// Split token range `lo..hi` into windows of at most `budget.max_tokens`,
/// each starting `overlap_tokens` before the previous end.
fn split_range(bounds: &[Boundary], lo: usize, hi: usize, budget: LevelBudget) -> Vec<(usize, usize)> {
    let max = budget.max_tokens.max(1);
    let overlap = budget.overlap_tokens();
    let mut windows = Vec::new();
    let mut start = lo;
    loop {
        if hi - start <= max {
            windows.push((start, hi));
            break;
        }
        let hard = start + max;
        let floor = start + (max / 2).max(1);
        let end = pick_cut(bounds, floor, hard).unwrap_or(hard);
        windows.push((start, end));
        start = end.saturating_sub(overlap).max(start + 1);
    }
    windows
}

fn chunk_id(section_index: usize, title: &str, level: ChunkLevel, span: Span, parent: Option<&str>) -> ChunkId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(section_index as u64).to_le_bytes());
    hasher.update(title.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(level.as_str().as_bytes());
    hasher.update(&(span.start as u64).to_le_bytes());
    hasher.update(&(span.end as u64).to_le_bytes());
    hasher.update(parent.unwrap_or("").as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{}-{}", level.letter(), &hex.as_str()[..16])
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub large: usize,
    pub medium: usize,
    pub small: usize,
}

impl LevelCounts {
    fn bump(&mut self, level: ChunkLevel) {
        match level {
            ChunkLevel::Large => self.large += 1,
            ChunkLevel::Medium => self.medium += 1,
            ChunkLevel::Small => self.small += 1,
        }
    }

    pub fn total(&self) -> usize { self.large + self.medium + self.small }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSection {
    pub index: usize,
    pub title: String,
    pub reason: String,
}

/// Outcome of one build batch. Section problems are collected here instead of
/// aborting the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub sections_seen: usize,
    pub sections_indexed: usize,
    pub skipped: Vec<SkippedSection>,
    pub counts: LevelCounts,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub tree: ChunkTree,
    pub report: BuildReport,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkTreeBuilder {
    config: ChunkingConfig,
}

impl ChunkTreeBuilder {
    pub fn new(config: ChunkingConfig) -> Self { Self { config } }

    pub fn config(&self) -> &ChunkingConfig { &self.config }

    pub fn build(&self, sections: &[Section]) -> BuildOutput {
        let mut tree = ChunkTree::default();
        let mut report = BuildReport { sections_seen: sections.len(), ..BuildReport::default() };
        for (index, section) in sections.iter().enumerate() {
            match self.chunk_section(index, section) {
                Ok(chunks) => {
                    debug!(section = %section.title, chunks = chunks.len(), "chunked section");
                    for chunk in chunks { tree.insert(chunk); }
                    report.sections_indexed += 1;
                }
                Err(Error::MalformedSection { index, reason }) => {
                    report.skipped.push(SkippedSection { index, title: section.title.clone(), reason });
                }
                Err(e) => {
                    report.skipped.push(SkippedSection { index, title: section.title.clone(), reason: e.to_string() });
                }
            }
        }
        report.counts = tree.level_counts();
        if !report.skipped.is_empty() {
            let detail = report
                .skipped
                .iter()
                .map(|s| format!("#{} '{}': {}", s.index, s.title, s.reason))
                .collect::<Vec<_>>()
                .join("; ");
            warn!(skipped = report.skipped.len(), "skipped malformed sections: {}", detail);
        }
        info!(
            sections = report.sections_indexed,
            large = report.counts.large,
            medium = report.counts.medium,
            small = report.counts.small,
            "built chunk tree"
        );
        BuildOutput { tree, report }
    }

    /// Chunk one section into its three-level tree, parents before children.
    ///
    /// A section shorter than the small budget still yields one chunk per level.
    pub fn chunk_section(&self, index: usize, section: &Section) -> Result<Vec<Chunk>> {
        if section.title.trim().is_empty() {
            return Err(Error::MalformedSection { index, reason: "missing title".to_string() });
        }
        let tokens = tokenize(&section.text);
        if tokens.is_empty() {
            return Err(Error::MalformedSection { index, reason: "empty text".to_string() });
        }
        let bounds = boundaries(&section.text, &tokens);
        let metadata = ChunkMetadata {
            section_index: index,
            section_title: section.title.clone(),
            doc_type: section.doc_type.clone(),
            timestamp: section.timestamp.clone().filter(|t| !t.trim().is_empty()),
        };
        let make = |level: ChunkLevel, lo: usize, hi: usize, parent: Option<&ChunkId>| {
            let span = Span::new(tokens[lo].start, tokens[hi - 1].end);
            Chunk {
                id: chunk_id(index, &section.title, level, span, parent.map(String::as_str)),
                text: section.text[span.start..span.end].to_string(),
                level,
                parent_id: parent.cloned(),
                span,
                metadata: metadata.clone(),
            }
        };

        let mut out = Vec::new();
        for (l_lo, l_hi) in split_range(&bounds, 0, tokens.len(), self.config.large) {
            let large = make(ChunkLevel::Large, l_lo, l_hi, None);
            let large_id = large.id.clone();
            out.push(large);
            for (m_lo, m_hi) in split_range(&bounds, l_lo, l_hi, self.config.medium) {
                let medium = make(ChunkLevel::Medium, m_lo, m_hi, Some(&large_id));
                let medium_id = medium.id.clone();
                out.push(medium);
                for (s_lo, s_hi) in split_range(&bounds, m_lo, m_hi, self.config.small) {
                    out.push(make(ChunkLevel::Small, s_lo, s_hi, Some(&medium_id)));
                }
            }
        }
        Ok(out)
    }
}

/// Forest of three-level chunk trees, one per section. Read-only once built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "Vec<Chunk>", try_from = "Vec<Chunk>")]
pub struct ChunkTree {
    chunks: HashMap<ChunkId, Chunk>,
    order: Vec<ChunkId>,
    children: HashMap<ChunkId, Vec<ChunkId>>,
}

impl ChunkTree {
    fn insert(&mut self, chunk: Chunk) {
        if self.chunks.contains_key(&chunk.id) { return; }
        if let Some(parent) = &chunk.parent_id {
            self.children.entry(parent.clone()).or_default().push(chunk.id.clone());
        }
        self.order.push(chunk.id.clone());
        self.chunks.insert(chunk.id.clone(), chunk);
    }

    /// Rebuild from a flat chunk list (e.g. a persisted manifest) and validate it.
    pub fn from_chunks(chunks: Vec<Chunk>) -> Result<Self> {
        let mut tree = Self::default();
        for chunk in chunks { tree.insert(chunk); }
        tree.validate()?;
        Ok(tree)
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> { self.chunks.get(id) }

    pub fn parent(&self, chunk: &Chunk) -> Option<&Chunk> { chunk.parent_id.as_deref().and_then(|p| self.get(p)) }

    pub fn children(&self, id: &str) -> &[ChunkId] { self.children.get(id).map_or(&[], Vec::as_slice) }

    pub fn child_count(&self, id: &str) -> usize { self.children(id).len() }

    /// Number of chunks sharing this chunk's parent, itself included.
    pub fn sibling_count(&self, chunk: &Chunk) -> usize {
        chunk.parent_id.as_deref().map_or(1, |p| self.child_count(p))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> + '_ { self.order.iter().filter_map(|id| self.chunks.get(id)) }

    pub fn at_level(&self, level: ChunkLevel) -> impl Iterator<Item = &Chunk> + '_ { self.iter().filter(move |c| c.level == level) }

    pub fn roots(&self) -> impl Iterator<Item = &Chunk> + '_ { self.at_level(ChunkLevel::Large) }

    pub fn len(&self) -> usize { self.order.len() }

    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    /// Distinct section titles in first-seen order.
    pub fn section_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = Vec::new();
        for root in self.roots() {
            if !titles.contains(&root.metadata.section_title) { titles.push(root.metadata.section_title.clone()); }
        }
        titles
    }

    pub fn level_counts(&self) -> LevelCounts {
        let mut counts = LevelCounts::default();
        for chunk in self.iter() { counts.bump(chunk.level); }
        counts
    }

    /// Check parent links, level ordering and span containment.
    pub fn validate(&self) -> Result<()> {
        for chunk in self.iter() {
            match (chunk.level.parent(), chunk.parent_id.as_deref()) {
                (None, None) => {}
                (None, Some(p)) => {
                    return Err(Error::Operation(format!("large chunk {} has parent {}", chunk.id, p)));
                }
                (Some(_), None) => {
                    return Err(Error::Operation(format!("{} chunk {} has no parent", chunk.level, chunk.id)));
                }
                (Some(expected), Some(p)) => {
                    let parent = self
                        .get(p)
                        .ok_or_else(|| Error::NotFound(format!("parent {} of chunk {}", p, chunk.id)))?;
                    if parent.level != expected {
                        return Err(Error::Operation(format!(
                            "chunk {} ({}) has {} parent {}",
                            chunk.id, chunk.level, parent.level, parent.id
                        )));
                    }
                    if parent.metadata.section_index != chunk.metadata.section_index || !parent.span.contains(&chunk.span) {
                        return Err(Error::Operation(format!("span of {} escapes parent {}", chunk.id, parent.id)));
                    }
                }
            }
        }
        Ok(())
    }
}

impl From<ChunkTree> for Vec<Chunk> {
    fn from(mut tree: ChunkTree) -> Self {
        let order = std::mem::take(&mut tree.order);
        order.into_iter().filter_map(|id| tree.chunks.remove(&id)).collect()
    }
}

impl TryFrom<Vec<Chunk>> for ChunkTree {
    type Error = Error;

    fn try_from(chunks: Vec<Chunk>) -> Result<Self> { ChunkTree::from_chunks(chunks) }
}
