use std::path::{Path, PathBuf};

use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::errors::{OragError, Result};
use crate::semantic::chunker::Chunker;
use crate::semantic::index::SimilarityMetric;
use crate::semantic::searcher::SearchDefaults;

/// Global config file name inside the config directory
pub const CONFIG_FILE: &str = "config.yaml";
/// Per-vault config file name, its presence marks a vault root
pub const VAULT_CONFIG_FILE: &str = ".orag.yaml";

/// How many parent directories `find_vault_root` inspects
const VAULT_SEARCH_DEPTH: usize = 5;

const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CHUNK_SIZE: usize = 512;
const DEFAULT_CHUNK_OVERLAP: usize = 50;
const DEFAULT_TOP_K: usize = 5;
const DEFAULT_MIN_SCORE: f32 = 0.3;
const DEFAULT_MAX_CHARS: usize = 10_000;
const DEFAULT_MAX_SOURCES: usize = 5;
const DEFAULT_RAG_TOP_K: usize = 20;
const DEFAULT_CHECKPOINT_EVERY: usize = 32;
const DEFAULT_VECTOR_STORE: &str = ".vector_store";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Local,
    Remote,
}

/// Embedding model selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    /// Model name (e.g., "all-MiniLM-L6-v2" locally, "nomic-embed-text" remotely)
    #[serde(default = "default_model")]
    pub model: String,

    /// Expected vector size; probed from the model when unset
    #[serde(default)]
    pub dimensions: Option<usize>,

    /// OpenAI-compatible embeddings URL, remote backend only
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Name of the environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model: DEFAULT_MODEL.to_string(),
            dimensions: None,
            endpoint: None,
            api_key_env: None,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub size: usize,

    /// Characters shared by consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_min_score")]
    pub default_min_score: f32,

    #[serde(default = "default_max_chars")]
    pub default_max_chars: usize,

    #[serde(default = "default_max_sources")]
    pub default_max_sources: usize,

    /// Chunks retrieved before RAG assembly
    #[serde(default = "default_rag_top_k")]
    pub rag_top_k: usize,

    #[serde(default)]
    pub metric: SimilarityMetric,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            default_min_score: DEFAULT_MIN_SCORE,
            default_max_chars: DEFAULT_MAX_CHARS,
            default_max_sources: DEFAULT_MAX_SOURCES,
            rag_top_k: DEFAULT_RAG_TOP_K,
            metric: SimilarityMetric::Cosine,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Parallelism for embedding generation: "auto" or a positive integer
    #[serde(default = "default_parallelism")]
    pub parallelism: String,

    /// Documents embedded between two writes of the index file
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    #[serde(default)]
    pub show_progress: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            show_progress: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_min_score() -> f32 {
    DEFAULT_MIN_SCORE
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}

fn default_max_sources() -> usize {
    DEFAULT_MAX_SOURCES
}

fn default_rag_top_k() -> usize {
    DEFAULT_RAG_TOP_K
}

fn default_parallelism() -> String {
    "auto".to_string()
}

fn default_checkpoint_every() -> usize {
    DEFAULT_CHECKPOINT_EVERY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_vector_store() -> PathBuf {
    PathBuf::from(DEFAULT_VECTOR_STORE)
}

/// User-wide settings, shared by every vault.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl GlobalConfig {
    pub fn validate(&self) -> Result<()> {
        self.chunker()?;

        let emb = &self.embedding;
        if emb.model.trim().is_empty() {
            return Err(OragError::config("embedding.model must not be empty"));
        }
        if emb.dimensions == Some(0) {
            return Err(OragError::config("embedding.dimensions must be greater than 0"));
        }
        if emb.download_timeout_secs == 0 {
            return Err(OragError::config(
                "embedding.download_timeout_secs must be greater than 0",
            ));
        }
        if emb.request_timeout_secs == 0 {
            return Err(OragError::config(
                "embedding.request_timeout_secs must be greater than 0",
            ));
        }
        if emb.backend == EmbeddingBackend::Remote && emb.endpoint.is_none() {
            return Err(OragError::config(
                "embedding.endpoint is required for the remote backend",
            ));
        }

        let search = &self.search;
        if search.default_top_k == 0 {
            return Err(OragError::config("search.default_top_k must be at least 1"));
        }
        if search.rag_top_k == 0 {
            return Err(OragError::config("search.rag_top_k must be at least 1"));
        }
        if search.default_max_chars == 0 {
            return Err(OragError::config(
                "search.default_max_chars must be greater than 0",
            ));
        }
        if search.default_max_sources == 0 {
            return Err(OragError::config(
                "search.default_max_sources must be at least 1",
            ));
        }
        if !search.metric.accepts_min_score(search.default_min_score) {
            return Err(OragError::config(format!(
                "search.default_min_score {} is out of range for {:?} similarity",
                search.default_min_score, search.metric
            )));
        }

        // validate parallelism: "auto" or positive integer
        parse_parallelism(&self.indexing.parallelism)?;

        if self.indexing.checkpoint_every == 0 {
            return Err(OragError::config(
                "indexing.checkpoint_every must be at least 1",
            ));
        }

        Ok(())
    }

    /// Config directory: `$ORAG_CONFIG_DIR`, else `~/.config/orag`.
    pub fn default_base_path() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("ORAG_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }

        let home = my_home()
            .map_err(|e| OragError::config(format!("could not determine home directory: {e}")))?
            .ok_or_else(|| OragError::config("home directory path is empty"))?;
        Ok(home.join(".config").join("orag"))
    }

    pub fn load() -> Result<Self> {
        Self::load_with(&Self::default_base_path()?)
    }

    /// Load `config.yaml` from `base_path`, writing the defaults first if
    /// the file does not exist yet.
    pub fn load_with(base_path: &Path) -> Result<Self> {
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            let default = Self {
                base_path: base_path.to_path_buf(),
                ..Self::default()
            };
            default.save()?;
            log::info!("Created default config at {}", path.display());
        }

        let config_str = std::fs::read_to_string(&path)
            .map_err(|e| OragError::config(format!("failed to read {}: {e}", path.display())))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .map_err(|e| OragError::config(format!("{} is malformed: {e}", path.display())))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if serde_yml::to_string(&config).is_ok_and(|s| s != config_str) {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_path).map_err(|e| {
            OragError::config(format!("failed to create {}: {e}", self.base_path.display()))
        })?;

        let config_str = serde_yml::to_string(self)
            .map_err(|e| OragError::config(format!("failed to serialize config: {e}")))?;
        let path = self.base_path.join(CONFIG_FILE);
        std::fs::write(&path, config_str)
            .map_err(|e| OragError::config(format!("failed to write {}: {e}", path.display())))
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Directory holding config.yaml and downloaded models.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn chunker(&self) -> Result<Chunker> {
        Chunker::new(self.chunking.size, self.chunking.overlap)
    }

    pub fn search_defaults(&self) -> SearchDefaults {
        SearchDefaults {
            top_k: self.search.default_top_k,
            min_score: self.search.default_min_score,
        }
    }

    /// Worker thread count, `None` for "auto".
    pub fn parallelism(&self) -> Option<usize> {
        parse_parallelism(&self.indexing.parallelism).ok().flatten()
    }

    /// Bearer token for the remote backend, read from `api_key_env`.
    pub fn api_key(&self) -> Option<String> {
        let var = self.embedding.api_key_env.as_deref()?;
        std::env::var(var)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

fn parse_parallelism(value: &str) -> Result<Option<usize>> {
    if value == "auto" {
        return Ok(None);
    }
    match value.parse::<usize>() {
        Ok(0) | Err(_) => Err(OragError::config(format!(
            "indexing.parallelism must be 'auto' or a positive integer, got '{value}'"
        ))),
        Ok(n) => Ok(Some(n)),
    }
}

/// Settings of a single vault, read from `<vault>/.orag.yaml`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Display name, defaults to the vault directory name
    #[serde(default)]
    pub name: Option<String>,

    /// Vector store directory, relative to the vault root
    #[serde(default = "default_vector_store")]
    pub vector_store: PathBuf,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: None,
            vector_store: default_vector_store(),
        }
    }
}

impl VaultConfig {
    pub fn load(vault_root: &Path) -> Result<Self> {
        let path = vault_root.join(VAULT_CONFIG_FILE);
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            OragError::config(format!("no vault config at {}: {e}", path.display()))
        })?;

        // an empty file is a valid vault marker
        if config_str.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yml::from_str(&config_str)
            .map_err(|e| OragError::config(format!("{} is malformed: {e}", path.display())))
    }

    pub fn name(&self, vault_root: &Path) -> String {
        self.name.clone().unwrap_or_else(|| {
            vault_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| vault_root.to_string_lossy().into_owned())
        })
    }

    pub fn store_dir(&self, vault_root: &Path) -> PathBuf {
        vault_root.join(&self.vector_store)
    }
}

/// Walk up from `start` looking for a directory containing `.orag.yaml`.
pub fn find_vault_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .take(VAULT_SEARCH_DEPTH + 1)
        .find(|dir| dir.join(VAULT_CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
}
