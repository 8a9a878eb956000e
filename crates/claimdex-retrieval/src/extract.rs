//! Operand spans for the computation path.
//!
//! Dates and currency amounts are located, never parsed; interpreting them is
//! the computation tool's job.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

use claimdex_core::sections::date_patterns;
use claimdex_core::types::Fragment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandKind {
    Date,
    Amount,
}

/// A candidate operand: its text, the fragment it was found in, and the byte
/// range inside that fragment's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandSpan {
    pub kind: OperandKind,
    pub text: String,
    pub fragment_id: String,
    pub start: usize,
    pub end: usize,
    /// Up to `LEAD_BYTES` of fragment text just before the operand, so a tool
    /// can tell a deductible from a repair total.
    #[serde(default)]
    pub lead: String,
}

const LEAD_BYTES: usize = 48;

fn lead_before(text: &str, start: usize) -> String {
    let mut from = start.saturating_sub(LEAD_BYTES);
    while !text.is_char_boundary(from) {
        from += 1;
    }
    text[from..start].trim().to_string()
}

fn amount_pattern() -> Option<&'static Regex> {
    static AMOUNT: OnceLock<Option<Regex>> = OnceLock::new();
    AMOUNT.get_or_init(|| Regex::new(r"\$\d[\d,]*(?:\.\d{2})?").ok()).as_ref()
}

/// Operands in fragment order, then text order, first occurrence of each text.
pub fn find_operands(fragments: &[Fragment]) -> Vec<OperandSpan> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for fragment in fragments {
        let mut spans: Vec<(OperandKind, usize, usize)> = Vec::new();
        for re in date_patterns() {
            spans.extend(re.find_iter(&fragment.text).map(|m| (OperandKind::Date, m.start(), m.end())));
        }
        if let Some(re) = amount_pattern() {
            spans.extend(re.find_iter(&fragment.text).map(|m| (OperandKind::Amount, m.start(), m.end())));
        }
        spans.sort_by_key(|&(_, start, end)| (start, std::cmp::Reverse(end)));

        let mut covered_to = 0usize;
        for (kind, start, end) in spans {
            if start < covered_to {
                continue;
            }
            covered_to = end;
            let text = fragment.text[start..end].to_string();
            if seen.insert(text.clone()) {
                let lead = lead_before(&fragment.text, start);
                out.push(OperandSpan { kind, text, fragment_id: fragment.id.clone(), start, end, lead });
            }
        }
    }
    out
}
