//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (nested keys separated by `__`, e.g. `APP_RETRIEVAL__NEEDLE_K=5`). Every
//! setting has a default so an empty environment yields a working setup.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::ChunkLevel;

pub struct Config {
    figment: Figment,
    env_name: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment, env_name };
        config.settings()?;
        Ok(config)
    }

    /// Wrap an already assembled figment (tests, embedding applications).
    pub fn from_figment(figment: Figment) -> Self { Self { figment, env_name: "custom".to_string() } }

    pub fn env_name(&self) -> &str { &self.env_name }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{}': {}", key, e)))
    }

    /// Typed settings with defaults for every missing key, validated.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(format!("Failed to extract settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Token budget and overlap for one chunk level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelBudget {
    pub max_tokens: usize,
    pub overlap_percent: f32,
}

impl LevelBudget {
    pub fn new(max_tokens: usize, overlap_percent: f32) -> Self { Self { max_tokens, overlap_percent } }

    /// Overlap in tokens; identical for every chunk of the level.
    pub fn overlap_tokens(&self) -> usize {
        let overlap = (self.max_tokens as f32 * self.overlap_percent).round() as usize;
        overlap.min(self.max_tokens.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub large: LevelBudget,
    pub medium: LevelBudget,
    pub small: LevelBudget,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            large: LevelBudget::new(2048, 0.2),
            medium: LevelBudget::new(512, 0.2),
            small: LevelBudget::new(128, 0.2),
        }
    }
}

impl ChunkingConfig {
    pub fn budget(&self, level: ChunkLevel) -> LevelBudget {
        match level {
            ChunkLevel::Large => self.large,
            ChunkLevel::Medium => self.medium,
            ChunkLevel::Small => self.small,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for level in ChunkLevel::ALL {
            let b = self.budget(level);
            if b.max_tokens == 0 {
                return Err(Error::InvalidConfig(format!("chunking.{}.max_tokens must be > 0", level)));
            }
            if !(0.0..1.0).contains(&b.overlap_percent) {
                return Err(Error::InvalidConfig(format!(
                    "chunking.{}.overlap_percent must be in [0, 1), got {}",
                    level, b.overlap_percent
                )));
            }
        }
        if !(self.large.max_tokens > self.medium.max_tokens && self.medium.max_tokens > self.small.max_tokens) {
            return Err(Error::InvalidConfig(format!(
                "chunk budgets must decrease large > medium > small, got {}/{}/{}",
                self.large.max_tokens, self.medium.max_tokens, self.small.max_tokens
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub needle_k: usize,
    pub summary_k: usize,
    pub section_k: usize,
    pub computation_k: usize,
    /// Promote a sibling group when retrieved/total strictly exceeds this.
    pub merge_threshold: f32,
    /// Candidate pool multiplier for the partial section match.
    pub overfetch_multiplier: usize,
    /// Below this many small-level hits the retriever widens to medium.
    pub min_coverage: usize,
    /// Restrict section-filtered queries to one level; `None` searches all.
    pub section_level: Option<ChunkLevel>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            needle_k: 3,
            summary_k: 3,
            section_k: 3,
            computation_k: 5,
            merge_threshold: 0.5,
            overfetch_multiplier: 3,
            min_coverage: 2,
            section_level: None,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        let ks = [
            ("needle_k", self.needle_k),
            ("summary_k", self.summary_k),
            ("section_k", self.section_k),
            ("computation_k", self.computation_k),
            ("overfetch_multiplier", self.overfetch_multiplier),
        ];
        for (name, value) in ks {
            if value == 0 { return Err(Error::InvalidConfig(format!("retrieval.{} must be > 0", name))); }
        }
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            return Err(Error::InvalidConfig(format!(
                "retrieval.merge_threshold must be in [0, 1], got {}",
                self.merge_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Memory,
    Lance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub lancedb_dir: String,
    pub chunks_table: String,
    pub summaries_table: String,
    pub embed_batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Memory,
            lancedb_dir: "./data/indexes/lancedb".to_string(),
            chunks_table: "chunks".to_string(),
            summaries_table: "summaries".to_string(),
            embed_batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingProvider {
    #[serde(rename = "hash")]
    Hash,
    #[serde(rename = "bge-m3")]
    BgeM3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub dimension: usize,
    pub model_dir: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self { Self { provider: EmbeddingProvider::Hash, dimension: 1024, model_dir: None } }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.retrieval.validate()?;
        if self.index.embed_batch_size == 0 {
            return Err(Error::InvalidConfig("index.embed_batch_size must be > 0".to_string()));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::InvalidConfig("embedding.dimension must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
