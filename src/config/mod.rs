//! Configuration management for stacks
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Environment variable name for Qdrant API key
    #[serde(default = "default_qdrant_api_key_env")]
    pub qdrant_api_key_env: String,

    /// Prefix for per-workspace Qdrant collections
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retrieval and fusion configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Index build configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Background task configuration
    #[serde(default)]
    pub tasks: TaskConfig,

    /// Text generation provider configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Coverage query configuration
    #[serde(default)]
    pub coverage: CoverageConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Base URL of the embedding backend
    #[serde(default = "default_embedding_backend_url")]
    pub backend_url: String,

    /// Texts per embedding request
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Embedding requests in flight at once
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,

    /// Cache vectors by content hash in the metadata database
    #[serde(default = "default_embedding_cache")]
    pub cache: bool,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first failed request
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: usize,

    /// Base delay between retries in milliseconds
    #[serde(default = "default_embedding_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

/// Lookup the expected embedding dimension for a known model
pub fn embedding_dimension_for_model(model: &str) -> Option<usize> {
    match model {
        "BAAI/bge-small-en-v1.5" => Some(384),
        "BAAI/bge-base-en-v1.5" => Some(768),
        "BAAI/bge-large-en-v1.5" => Some(1024),
        "sentence-transformers/all-MiniLM-L6-v2" => Some(384),
        "nomic-ai/nomic-embed-text-v1.5" => Some(768),
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

impl EmbeddingConfig {
    /// Resolve the effective embedding dimension based on the configured model
    pub fn resolved_dimension(&self) -> usize {
        if let Some(expected) = embedding_dimension_for_model(&self.model) {
            if expected != self.dimension {
                warn!(
                    "Embedding dimension {} does not match model '{}' ({}); using {}",
                    self.dimension, self.model, expected, expected
                );
            }
            expected
        } else {
            self.dimension
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Mode used when a query does not name one (vector, bm25, hybrid)
    #[serde(default = "default_retrieval_mode")]
    pub default_mode: String,

    /// Default number of hits
    #[serde(default = "default_retrieval_top_k")]
    pub default_top_k: usize,

    /// Weight of the normalized dense score
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// Weight of the normalized BM25 score
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f32,

    /// Candidates fetched per side = top_k * multiplier (hybrid or diverse queries)
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Per-document cap applied by the diversity filter
    #[serde(default = "default_max_per_doc")]
    pub max_per_doc: usize,

    /// Distinct documents the diversity filter tries to represent first
    #[serde(default = "default_min_docs")]
    pub min_docs: usize,
}

/// Index build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Chunks fetched, embedded and upserted per batch
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,
}

/// Task orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Maximum number of tasks running at once
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Running tasks are marked alive this often; a new scheduler fails
    /// tasks whose mark is several intervals old
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

/// Generation provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// OpenAI-compatible base URL; unset means generation is not configured
    #[serde(default)]
    pub url: Option<String>,

    /// Model name sent with each request
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_generation_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

/// Coverage query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Token budget for each per-document evidence note
    #[serde(default = "default_map_token_budget")]
    pub map_token_budget: usize,

    /// Token budget for the final answer
    #[serde(default = "default_reduce_token_budget")]
    pub reduce_token_budget: usize,

    /// Word count at which a query is treated as scope-wide
    #[serde(default = "default_global_word_threshold")]
    pub global_word_threshold: usize,

    /// Characters per token used when truncating to a budget
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for stacks data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Directory holding BM25 snapshots
    pub sparse_dir: PathBuf,
}

impl PathsConfig {
    fn under(base: PathBuf, config_file: PathBuf) -> Self {
        Self {
            config_file,
            db_file: base.join("metadata.db"),
            sparse_dir: base.join("bm25"),
            base_dir: base,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            qdrant_api_key_env: default_qdrant_api_key_env(),
            collection_prefix: default_collection_prefix(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            index: IndexConfig::default(),
            tasks: TaskConfig::default(),
            generation: GenerationConfig::default(),
            coverage: CoverageConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            backend_url: default_embedding_backend_url(),
            batch_size: default_embedding_batch_size(),
            concurrency: default_embedding_concurrency(),
            cache: default_embedding_cache(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_max_retries(),
            retry_base_delay_ms: default_embedding_retry_base_delay_ms(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_mode: default_retrieval_mode(),
            default_top_k: default_retrieval_top_k(),
            vector_weight: default_vector_weight(),
            bm25_weight: default_bm25_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            max_per_doc: default_max_per_doc(),
            min_docs: default_min_docs(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: default_index_batch_size(),
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_generation_model(),
            api_key_env: default_generation_api_key_env(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            map_token_budget: default_map_token_budget(),
            reduce_token_budget: default_reduce_token_budget(),
            global_word_threshold: default_global_word_threshold(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

impl Config {
    /// Get the default base directory for stacks (~/.stacks)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".stacks")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        let config_file = base.join("config.toml");
        self.paths = PathsConfig::under(base, config_file);
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig::under(base, config_path.to_path_buf());

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Get the Qdrant API key from environment
    pub fn qdrant_api_key(&self) -> Option<String> {
        if self.qdrant_api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.qdrant_api_key_env).ok()
    }

    /// Get the generation API key from environment
    pub fn generation_api_key(&self) -> Option<String> {
        std::env::var(&self.generation.api_key_env).ok()
    }

    /// Check if stacks is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }

        if self.embedding.concurrency == 0 {
            return Err(Error::Config(
                "embedding.concurrency must be positive".to_string(),
            ));
        }

        if self.index.batch_size == 0 {
            return Err(Error::Config("index.batch_size must be positive".to_string()));
        }

        if self.tasks.worker_pool_size == 0 {
            return Err(Error::Config(
                "tasks.worker_pool_size must be positive".to_string(),
            ));
        }

        if self.tasks.heartbeat_secs == 0 {
            return Err(Error::Config("tasks.heartbeat_secs must be positive".to_string()));
        }

        for (name, weight) in [
            ("retrieval.vector_weight", self.retrieval.vector_weight),
            ("retrieval.bm25_weight", self.retrieval.bm25_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(Error::Config(format!("{} must be between 0.0 and 1.0", name)));
            }
        }

        if (self.retrieval.vector_weight + self.retrieval.bm25_weight - 1.0).abs() > 1e-3 {
            return Err(Error::Config(
                "retrieval.vector_weight + retrieval.bm25_weight must equal 1.0".to_string(),
            ));
        }

        if self.retrieval.max_per_doc == 0 {
            return Err(Error::Config(
                "retrieval.max_per_doc must be at least 1".to_string(),
            ));
        }

        if self.retrieval.candidate_multiplier == 0 {
            return Err(Error::Config(
                "retrieval.candidate_multiplier must be at least 1".to_string(),
            ));
        }

        if !matches!(
            self.retrieval.default_mode.to_lowercase().as_str(),
            "vector" | "bm25" | "hybrid"
        ) {
            return Err(Error::Config(format!(
                "retrieval.default_mode must be vector, bm25 or hybrid (got '{}')",
                self.retrieval.default_mode
            )));
        }

        if self.coverage.chars_per_token == 0 {
            return Err(Error::Config(
                "coverage.chars_per_token must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
