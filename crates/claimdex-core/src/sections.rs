//! Section loader: turns claim files on disk into `Section`s.
//!
//! Text files are split on banner headers of the form
//! `====… SECTION <n>: <TITLE> ====…`; a file without banners becomes a single
//! "Complete Document" section. `.json` files hold a list of sections as-is.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::types::Section;

const HEADER_PATTERN: &str = r"={70,}\s*SECTION\s+(\d+):\s+([A-Z\s]+)\s*={70,}";

const DATE_PATTERNS: [&str; 3] = [
    r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},\s+\d{4}\b",
    r"\b\d{1,2}/\d{1,2}/\d{4}\b",
    r"\b\d{4}-\d{2}-\d{2}\b",
];

fn header_regex() -> Option<&'static Regex> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    HEADER.get_or_init(|| Regex::new(HEADER_PATTERN).ok()).as_ref()
}

/// Compiled date patterns, most specific first.
pub fn date_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| DATE_PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect())
}

/// First date in `text`, trying the long month form before numeric forms.
pub fn first_date(text: &str) -> Option<String> {
    date_patterns().iter().find_map(|re| re.find(text).map(|m| m.as_str().to_string()))
}

/// Document type derived from keywords in a section title.
pub fn classify_section(title: &str) -> &'static str {
    let t = title.to_lowercase();
    let has = |w: &str| t.contains(w);
    if has("policy") {
        "policy_information"
    } else if has("timeline") || has("incident") {
        "timeline"
    } else if has("witness") {
        "witness_statements"
    } else if has("police") {
        "police_report"
    } else if has("medical") {
        "medical_documentation"
    } else if has("damage") || has("vehicle") {
        "damage_assessment"
    } else if has("rental") {
        "rental_documentation"
    } else if has("financial") {
        "financial_summary"
    } else if has("closure") {
        "closure_documentation"
    } else {
        "general"
    }
}

#[derive(Debug, Default, Clone)]
pub struct SectionLoader;

impl SectionLoader {
    pub fn new() -> Self { Self }

    /// Load a single file or every `.txt`/`.json` file below a directory.
    pub fn load_path(&self, path: &Path) -> Result<Vec<Section>> {
        if !path.exists() {
            return Err(Error::NotFound(format!("input path {}", path.display())));
        }
        if path.is_file() {
            return self.load_file(path);
        }
        let files = self.list_input_files(path);
        if files.is_empty() {
            warn!(dir = %path.display(), "no .txt or .json files found");
            return Ok(vec![]);
        }
        let mut sections = Vec::new();
        for (i, file) in files.iter().enumerate() {
            debug!(file = %file.display(), "loading {}/{}", i + 1, files.len());
            sections.extend(self.load_file(file)?);
        }
        info!(files = files.len(), sections = sections.len(), "loaded sections");
        Ok(sections)
    }

    pub fn load_file(&self, path: &Path) -> Result<Vec<Section>> {
        let content = read_file_content(path)?;
        let is_json = path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&content)
                .map_err(|e| Error::Operation(format!("invalid section list in {}: {}", path.display(), e)))
        } else {
            Ok(self.parse_text(&content))
        }
    }

    /// Split banner-delimited text into sections.
    pub fn parse_text(&self, content: &str) -> Vec<Section> {
        let headers: Vec<_> = header_regex().map(|re| re.captures_iter(content).collect()).unwrap_or_default();
        if headers.is_empty() {
            debug!("no section headers found, treating input as one section");
            let mut section = Section::new("Complete Document", "insurance_claim", content.trim());
            section.timestamp = first_date(content);
            return vec![section];
        }

        let mut sections = Vec::with_capacity(headers.len());
        for (i, caps) in headers.iter().enumerate() {
            let (Some(whole), Some(title)) = (caps.get(0), caps.get(2)) else { continue };
            let title = title.as_str().trim();
            let end = headers.get(i + 1).and_then(|next| next.get(0)).map_or(content.len(), |m| m.start());
            let body = content[whole.end()..end].trim();
            let mut section = Section::new(title, classify_section(title), body);
            section.timestamp = first_date(body);
            sections.push(section);
        }
        sections
    }

    fn list_input_files(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("json"))
            })
            .collect();
        files.sort();
        files
    }
}

fn read_file_content(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
    Ok(match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}
