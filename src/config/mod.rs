use crate::error::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod secret;

pub use secret::Secret;

/// Default manifest file name looked up at the project root
pub const MANIFEST_FILE: &str = "semindex.json";

/// Default index directory, relative to the project root
pub const DEFAULT_INDEX_DIR: &str = ".vectorindex";

/// Project configuration consumed by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub enabled: bool,

    pub storage: StorageKind,

    /// Provider-qualified model, e.g. `local:bge-small` or `openai:text-embedding-3-small`
    pub embedding_model: String,

    pub embedding: EmbeddingConfig,

    pub contextual_retrieval: ContextualMode,

    pub enrichment: EnrichmentConfig,

    pub codebase: CodebaseConfig,

    pub database: DatabaseConfig,

    pub search: SearchConfig,

    pub refresh: RefreshConfig,

    /// Index directory, relative to the project root
    pub index_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Cloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextualMode {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Syntax-tree boundaries with sliding-window fallback
    Semantic,
    /// Always use the sliding window
    Sliding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingConfig {
    /// Texts per request, further capped by the provider ceiling
    pub batch_size: usize,

    /// Embedding inputs longer than this are truncated (stored content is not)
    pub max_input_chars: usize,

    /// Maximum in-flight batch requests
    pub max_concurrency: usize,

    /// Timeout for a single batch request
    pub request_timeout_secs: u64,

    /// Indirect credential reference, e.g. `env:OPENAI_API_KEY`
    pub api_key: Option<Secret>,

    /// Override for the provider endpoint
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnrichmentConfig {
    pub api_key: Option<Secret>,
    pub model: String,
    pub base_url: Option<String>,
    /// Under `auto`, enrichment runs only when the codebase is at least this many tokens
    pub auto_threshold_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodebaseConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub chunk_strategy: ChunkStrategy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub enabled: bool,
    /// Indirect connection reference; only consumed by external schema sources
    pub connection: Option<Secret>,
    #[serde(rename = "type")]
    pub db_type: Option<String>,
    /// Path of a SQL schema file, relative to the project root
    pub schema: Option<PathBuf>,
    /// Tables whose rows are indexed alongside their schema
    pub config_tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchConfig {
    /// Weight of the vector signal in hybrid fusion
    pub hybrid_weight: f32,
    pub top_k: usize,
    pub reranking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshConfig {
    pub on_git_change: bool,
    pub on_session_start: bool,
    /// Maximum index age before it is reported stale, e.g. `24h`
    pub max_age: String,
    /// Wall-clock budget for one refresh pass
    pub budget_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: StorageKind::Local,
            embedding_model: "local:bge-small".to_string(),
            embedding: EmbeddingConfig::default(),
            contextual_retrieval: ContextualMode::Auto,
            enrichment: EnrichmentConfig::default(),
            codebase: CodebaseConfig::default(),
            database: DatabaseConfig::default(),
            search: SearchConfig::default(),
            refresh: RefreshConfig::default(),
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_input_chars: 8_000,
            max_concurrency: 4,
            request_timeout_secs: 60,
            api_key: None,
            base_url: None,
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-3-5-haiku-latest".to_string(),
            base_url: None,
            auto_threshold_tokens: 50_000,
        }
    }
}

impl Default for CodebaseConfig {
    fn default() -> Self {
        Self {
            include: vec!["**/*".to_string()],
            exclude: Vec::new(),
            chunk_strategy: ChunkStrategy::Semantic,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hybrid_weight: 0.7,
            top_k: 10,
            reranking: false,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            on_git_change: true,
            on_session_start: false,
            max_age: "24h".to_string(),
            budget_secs: 1800,
        }
    }
}

impl Config {
    /// Load the manifest at `path`, or the default manifest under `root`.
    ///
    /// A missing default manifest yields `Config::default()`; a missing
    /// explicit path is an error.
    pub fn load(root: &Path, path: Option<&Path>) -> Result<Self> {
        let (manifest, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (root.join(MANIFEST_FILE), false),
        };

        if !manifest.exists() {
            if explicit {
                return Err(Error::config(format!(
                    "config file not found: {}",
                    manifest.display()
                )));
            }
            tracing::debug!("No manifest at {}, using defaults", manifest.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&manifest)?;
        let config = Self::from_json(&raw)?;
        tracing::debug!("Loaded config from {}", manifest.display());
        Ok(config)
    }

    /// Parse and validate a JSON manifest.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::config(format!("invalid manifest: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that would otherwise surface mid-refresh.
    pub fn validate(&self) -> Result<()> {
        if self.storage == StorageKind::Cloud {
            return Err(Error::config(
                "cloud storage is not supported by this engine; use \"local\"",
            ));
        }
        if !(0.0..=1.0).contains(&self.search.hybrid_weight) {
            return Err(Error::config(format!(
                "search.hybridWeight must be within [0, 1], got {}",
                self.search.hybrid_weight
            )));
        }
        if self.search.top_k == 0 {
            return Err(Error::config("search.topK must be greater than zero"));
        }
        if self.embedding.batch_size == 0 || self.embedding.max_concurrency == 0 {
            return Err(Error::config(
                "embedding.batchSize and embedding.maxConcurrency must be greater than zero",
            ));
        }
        self.include_set()?;
        self.exclude_set()?;
        self.max_age()?;
        crate::embed::ProviderKind::parse(&self.embedding_model)?;
        Ok(())
    }

    pub fn include_set(&self) -> Result<GlobSet> {
        build_glob_set(&self.codebase.include)
    }

    pub fn exclude_set(&self) -> Result<GlobSet> {
        build_glob_set(&self.codebase.exclude)
    }

    pub fn max_age(&self) -> Result<Duration> {
        parse_duration(&self.refresh.max_age)
    }

    pub fn refresh_budget(&self) -> Duration {
        Duration::from_secs(self.refresh.budget_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.request_timeout_secs)
    }

    /// Absolute index directory for a project root
    pub fn index_path(&self, root: &Path) -> PathBuf {
        if self.index_dir.is_absolute() {
            self.index_dir.clone()
        } else {
            root.join(&self.index_dir)
        }
    }
}

/// Compile glob patterns into a set. Invalid globs are configuration errors.
pub fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns.iter().filter(|p| !p.trim().is_empty()) {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::config(format!("invalid glob `{pattern}`: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::config(format!("invalid glob set: {e}")))
}

/// Parse `90s`, `30m`, `24h`, `7d` (or bare seconds).
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::config(format!("invalid duration `{raw}`")))?;

    let secs = match unit {
        "" | "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        _ => return Err(Error::config(format!("invalid duration unit in `{raw}`"))),
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search.hybrid_weight, 0.7);
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.index_dir, PathBuf::from(".vectorindex"));
    }

    #[test]
    fn test_parse_manifest() {
        let raw = r#"{
            "enabled": true,
            "storage": "local",
            "embeddingModel": "openai:text-embedding-3-small",
            "embedding": { "apiKey": "env:OPENAI_API_KEY" },
            "contextualRetrieval": "never",
            "codebase": { "include": ["src/**"], "exclude": ["**/*.gen.ts"], "chunkStrategy": "sliding" },
            "database": { "enabled": true, "type": "postgres", "schema": "db/schema.sql", "configTables": ["settings"] },
            "search": { "hybridWeight": 0.5, "topK": 5, "reranking": false },
            "refresh": { "maxAge": "12h" }
        }"#;

        let config = Config::from_json(raw).unwrap();
        assert_eq!(config.contextual_retrieval, ContextualMode::Never);
        assert_eq!(config.codebase.chunk_strategy, ChunkStrategy::Sliding);
        assert_eq!(config.database.db_type.as_deref(), Some("postgres"));
        assert_eq!(config.database.config_tables, vec!["settings".to_string()]);
        assert_eq!(config.max_age().unwrap(), Duration::from_secs(12 * 3600));
        assert!(config.include_set().unwrap().is_match("src/main.rs"));
        assert!(config.exclude_set().unwrap().is_match("web/api.gen.ts"));
    }

    #[test]
    fn test_rejects_literal_secret() {
        let raw = r#"{ "embedding": { "apiKey": "sk-live-123" } }"#;
        assert!(matches!(
            Config::from_json(raw),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_cloud_storage() {
        let raw = r#"{ "storage": "cloud" }"#;
        assert!(Config::from_json(raw).is_err());
    }

    #[test]
    fn test_rejects_invalid_glob() {
        let mut config = Config::default();
        config.codebase.exclude = vec!["src/[".to_string()];
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_out_of_range_weight() {
        let mut config = Config::default();
        config.search.hybrid_weight = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("3w").is_err());
    }

    #[test]
    fn test_load_missing_default_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path(), None).unwrap();
        assert!(config.enabled);

        let missing = dir.path().join("nope.json");
        assert!(Config::load(dir.path(), Some(&missing)).is_err());
    }
}
