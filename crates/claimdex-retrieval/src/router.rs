//! Keyword router: one question in, one retrieval path out.
//!
//! Keywords are matched as whole word sequences on the lowercased question, so
//! "time" does not fire on "timeline". When several categories match, the
//! fixed priority needle > section > computation > summary decides; nothing
//! matching means hybrid.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const NEEDLE_TERMS: &[&str] = &["exact", "exactly", "specific", "specifically", "amount", "time", "who", "whom", "when", "how much"];

const SUMMARY_TERMS: &[&str] = &[
    "summary",
    "summarize",
    "summarise",
    "overview",
    "timeline",
    "chronology",
    "chronological",
    "what happened",
];

const COMPUTATION_TERMS: &[&str] = &[
    "calculate",
    "calculation",
    "compute",
    "estimate",
    "estimated",
    "how many days",
    "how long",
    "days between",
];

/// Route categories in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteCategory {
    Needle,
    Section,
    Computation,
    Summary,
    Hybrid,
}

impl RouteCategory {
    pub const PRIORITY: [RouteCategory; 5] = [
        RouteCategory::Needle,
        RouteCategory::Section,
        RouteCategory::Computation,
        RouteCategory::Summary,
        RouteCategory::Hybrid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RouteCategory::Needle => "needle",
            RouteCategory::Section => "section",
            RouteCategory::Computation => "computation",
            RouteCategory::Summary => "summary",
            RouteCategory::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for RouteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "lowercase")]
pub enum RoutePath {
    Summary,
    Needle,
    /// `label` is the section name as written in the question.
    Section { label: String },
    Computation,
    Hybrid,
}

impl RoutePath {
    pub fn category(&self) -> RouteCategory {
        match self {
            RoutePath::Summary => RouteCategory::Summary,
            RoutePath::Needle => RouteCategory::Needle,
            RoutePath::Section { .. } => RouteCategory::Section,
            RoutePath::Computation => RouteCategory::Computation,
            RoutePath::Hybrid => RouteCategory::Hybrid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub path: RoutePath,
    /// Every category whose keywords matched, in priority order.
    pub matched: Vec<RouteCategory>,
    /// More than one category matched; `path` came from the priority order.
    pub ambiguous: bool,
    /// The question without any explicit `SECTION|` prefix.
    pub question: String,
}

/// A word of the question with its byte range.
struct Word {
    lower: String,
    start: usize,
    end: usize,
}

fn words(text: &str) -> Vec<Word> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, ch) in text.char_indices() {
        if ch.is_alphanumeric() {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            spans.push((s, i));
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans.into_iter().map(|(start, end)| Word { lower: text[start..end].to_lowercase(), start, end }).collect()
}

fn phrase_words(phrase: &str) -> Vec<String> { words(phrase).into_iter().map(|w| w.lower).collect() }

/// Position of the first occurrence of `phrase` as a contiguous word run.
fn find_phrase(haystack: &[Word], phrase: &[String]) -> Option<usize> {
    if phrase.is_empty() || phrase.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - phrase.len()).find(|&i| phrase.iter().enumerate().all(|(j, p)| haystack[i + j].lower == *p))
}

fn any_phrase(haystack: &[Word], phrases: &[&str]) -> bool {
    phrases.iter().any(|p| find_phrase(haystack, &phrase_words(p)).is_some())
}

/// Longest text accepted as an unknown explicit section label.
const MAX_LABEL_WORDS: usize = 6;

/// Upper-case, short and free of routing keywords, like "INCIDENT TIMELINE".
fn looks_like_label(label: &str, lwords: &[Word]) -> bool {
    lwords.len() <= MAX_LABEL_WORDS
        && label.chars().any(char::is_alphabetic)
        && !label.chars().any(char::is_lowercase)
        && ![NEEDLE_TERMS, SUMMARY_TERMS, COMPUTATION_TERMS].iter().any(|terms| any_phrase(lwords, terms))
}

#[derive(Debug, Clone, Default)]
pub struct QueryRouter {
    section_labels: Vec<Vec<String>>,
}

impl QueryRouter {
    /// `section_labels` are the titles present in the index.
    pub fn new<I, S>(section_labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut labels: Vec<Vec<String>> =
            section_labels.into_iter().map(|l| phrase_words(l.as_ref())).filter(|w| !w.is_empty()).collect();
        // Longest label first so "POLICY INFORMATION" beats "POLICY".
        labels.sort_by(|a, b| b.len().cmp(&a.len()));
        labels.dedup();
        Self { section_labels: labels }
    }

    fn find_section<'q>(&self, question: &'q str, qwords: &[Word]) -> Option<&'q str> {
        self.section_labels.iter().find_map(|label| {
            find_phrase(qwords, label).map(|i| &question[qwords[i].start..qwords[i + label.len() - 1].end])
        })
    }

    /// `LABEL|question`, when the text before the pipe names a known section
    /// or reads as a section heading. Any other pipe is part of the question.
    fn explicit_section<'q>(&self, question: &'q str) -> Option<(&'q str, &'q str)> {
        let (label, rest) = question.split_once('|')?;
        let label = label.trim();
        let lwords = words(label);
        if lwords.is_empty() {
            return None;
        }
        let lower: Vec<String> = lwords.iter().map(|w| w.lower.clone()).collect();
        let known = self.section_labels.contains(&lower);
        (known || looks_like_label(label, &lwords)).then(|| (label, rest.trim()))
    }

    pub fn route(&self, question: &str) -> RouteDecision {
        if let Some((label, rest)) = self.explicit_section(question) {
            debug!(label, "explicit section route");
            return RouteDecision {
                path: RoutePath::Section { label: label.to_string() },
                matched: vec![RouteCategory::Section],
                ambiguous: false,
                question: rest.to_string(),
            };
        }

        let qwords = words(question);
        let section = self.find_section(question, &qwords);
        let mut matched = Vec::new();
        if any_phrase(&qwords, NEEDLE_TERMS) {
            matched.push(RouteCategory::Needle);
        }
        if section.is_some() {
            matched.push(RouteCategory::Section);
        }
        if any_phrase(&qwords, COMPUTATION_TERMS) {
            matched.push(RouteCategory::Computation);
        }
        if any_phrase(&qwords, SUMMARY_TERMS) {
            matched.push(RouteCategory::Summary);
        }

        let path = match matched.first() {
            Some(RouteCategory::Needle) => RoutePath::Needle,
            Some(RouteCategory::Section) => RoutePath::Section { label: section.unwrap_or_default().to_string() },
            Some(RouteCategory::Computation) => RoutePath::Computation,
            Some(RouteCategory::Summary) => RoutePath::Summary,
            Some(RouteCategory::Hybrid) | None => RoutePath::Hybrid,
        };
        let decision = RouteDecision { ambiguous: matched.len() > 1, path, matched, question: question.trim().to_string() };
        debug!(path = %decision.path.category(), matched = ?decision.matched, ambiguous = decision.ambiguous, "routed question");
        decision
    }
}
