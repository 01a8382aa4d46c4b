//! Configuration types for lore.
//!
//! Precedence for every layered value: explicit override (CLI flag) >
//! source-specific value > global default. Resolution happens once per
//! command through the `*_options` helpers; engines only see resolved
//! option structs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LoreError, Result};
use crate::types::SourceKind;

/// Pick the first present layer.
pub fn layered<T>(explicit: Option<T>, source: Option<T>, global: T) -> T {
    explicit.or(source).unwrap_or(global)
}

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoreConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Global ingest defaults.
    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub folder: FolderConfig,

    #[serde(default)]
    pub code: CodeConfig,

    #[serde(default)]
    pub crawl: CrawlConfig,

    #[serde(default)]
    pub drive: DriveConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite store file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// SQLite cache size in KB (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Records buffered before an automatic flush.
    #[serde(default = "default_write_buffer")]
    pub write_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            cache_size: default_cache_size(),
            write_buffer: default_write_buffer(),
        }
    }
}

/// Kind of embedding backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ollama `/api/embeddings`.
    Ollama,
    /// OpenAI-compatible `/v1/embeddings`.
    OpenAi,
    /// Deterministic in-process embedder.
    Mock,
}

/// One candidate embedding backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Base URL (ignored for `mock`).
    #[serde(default)]
    pub url: String,

    /// Environment variable holding a bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backends in probe priority order.
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Declared vector length of `model`.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Requests per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff unit.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Hard timeout per embed call.
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Launch a local backend when none answers.
    #[serde(default)]
    pub auto_setup: bool,

    /// How long to wait for an auto-started backend.
    #[serde(default = "default_auto_setup_wait")]
    pub auto_setup_wait_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            model: default_model(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_embed_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            auto_setup: false,
            auto_setup_wait_secs: default_auto_setup_wait(),
        }
    }
}

/// Global ingest defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Documents shorter than this are skipped as too short.
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,

    /// Capacity of the prefetch queue.
    #[serde(default = "default_max_prefetch")]
    pub max_prefetch: usize,

    /// Flush the store every N processed documents.
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,

    /// Keep original text on stored records.
    #[serde(default = "default_true")]
    pub store_content: bool,

    /// Split documents longer than this many characters.
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_content_length: default_min_content_length(),
            max_prefetch: default_max_prefetch(),
            flush_every: default_flush_every(),
            store_content: true,
            chunk_max_chars: default_chunk_max_chars(),
        }
    }
}

/// Folder sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Extensions picked up by folder sync (without dot).
    #[serde(default = "default_folder_extensions")]
    pub extensions: Vec<String>,

    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,

    #[serde(default)]
    pub min_content_length: Option<usize>,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            extensions: default_folder_extensions(),
            ignored_dirs: default_ignored_dirs(),
            min_content_length: None,
        }
    }
}

/// Code-tree sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeConfig {
    #[serde(default = "default_code_max_depth")]
    pub max_depth: usize,

    /// Files larger than this many bytes are skipped.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Index files that look binary.
    #[serde(default)]
    pub include_binary: bool,

    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,

    #[serde(default)]
    pub min_content_length: Option<usize>,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            max_depth: default_code_max_depth(),
            max_file_size: default_max_file_size(),
            include_binary: false,
            ignored_dirs: default_ignored_dirs(),
            min_content_length: None,
        }
    }
}

/// Boilerplate analysis settings for crawls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Documents collected before analysis runs.
    #[serde(default = "default_dedup_sample")]
    pub sample_size: usize,

    /// Distinct documents a phrase must appear in.
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: usize,

    #[serde(default = "default_max_phrases")]
    pub max_phrases: usize,

    /// Word n-gram lengths.
    #[serde(default = "default_ngram_sizes")]
    pub ngram_sizes: Vec<usize>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_size: default_dedup_sample(),
            min_occurrences: default_min_occurrences(),
            max_phrases: default_max_phrases(),
            ngram_sizes: default_ngram_sizes(),
        }
    }
}

/// Crawl configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    #[serde(default = "default_crawl_depth")]
    pub max_depth: usize,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Pages fetched concurrently per depth-level batch.
    #[serde(default = "default_crawl_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,

    /// Re-fetch indexed pages and update the ones that changed.
    #[serde(default)]
    pub refresh: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Directory for crawl checkpoints.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub min_content_length: Option<usize>,

    #[serde(default)]
    pub dedup: DedupConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: default_crawl_depth(),
            max_pages: default_max_pages(),
            concurrency: default_crawl_concurrency(),
            page_timeout_secs: default_page_timeout(),
            refresh: false,
            user_agent: default_user_agent(),
            state_dir: default_state_dir(),
            min_content_length: None,
            dedup: DedupConfig::default(),
        }
    }
}

/// Remote drive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    /// Root folder id to sync.
    #[serde(default)]
    pub folder_id: Option<String>,

    /// Environment variable holding the OAuth access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_drive_api")]
    pub api_base: String,

    /// Sync state file.
    #[serde(default = "default_drive_state")]
    pub state_path: PathBuf,

    /// Files processed per invocation.
    #[serde(default)]
    pub max_files: Option<usize>,

    /// Process exactly one file per invocation.
    #[serde(default)]
    pub incremental: bool,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default)]
    pub min_content_length: Option<usize>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            token_env: default_token_env(),
            api_base: default_drive_api(),
            state_path: default_drive_state(),
            max_files: None,
            incremental: false,
            page_size: default_page_size(),
            min_content_length: None,
        }
    }
}

/// Long-running server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Folder kept in sync in the background.
    #[serde(default)]
    pub folder: Option<PathBuf>,

    /// Seconds between file-change checks.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Minimum seconds between two full re-syncs.
    #[serde(default = "default_min_resync")]
    pub min_resync_interval_secs: u64,

    /// Missing files tolerated before a re-sync is triggered.
    #[serde(default = "default_deletion_threshold")]
    pub deletion_threshold: usize,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Characters of content shown per result.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            folder: None,
            check_interval_secs: default_check_interval(),
            min_resync_interval_secs: default_min_resync(),
            deletion_threshold: default_deletion_threshold(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

/// Ingest options resolved for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    pub source: SourceKind,
    pub min_content_length: usize,
    pub max_prefetch: usize,
    pub flush_every: usize,
    pub store_content: bool,
    pub chunk_max_chars: usize,
}

impl LoreConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| LoreError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })?;
        Ok(config)
    }

    /// Load from an explicit path, else the user config, else `./lore.toml`, else defaults.
    pub fn load_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(LoreError::config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            return Self::load(path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("lore").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        let local_config = PathBuf::from("lore.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Resolve ingest options for a source, with an optional explicit minimum length.
    pub fn ingest_options(&self, source: SourceKind, min_override: Option<usize>) -> IngestOptions {
        let source_min = match source {
            SourceKind::Folder => self.folder.min_content_length,
            SourceKind::Code => self.code.min_content_length,
            SourceKind::Crawl => self.crawl.min_content_length,
            SourceKind::Drive => self.drive.min_content_length,
            SourceKind::Manual => None,
        };

        IngestOptions {
            source,
            min_content_length: layered(min_override, source_min, self.ingest.min_content_length),
            max_prefetch: self.ingest.max_prefetch.max(1),
            flush_every: self.ingest.flush_every.max(1),
            store_content: self.ingest.store_content,
            chunk_max_chars: self.ingest.chunk_max_chars,
        }
    }

    /// Serialize to TOML, used by `lore init`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LoreError::config(e.to_string()))
    }
}

fn default_true() -> bool {
    true
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lore")
}

fn default_store_path() -> PathBuf {
    data_dir().join("lore.db")
}

fn default_state_dir() -> PathBuf {
    data_dir().join("state")
}

fn default_drive_state() -> PathBuf {
    data_dir().join("state").join("drive-sync.json")
}

fn default_cache_size() -> i32 {
    -64000
}

fn default_write_buffer() -> usize {
    64
}

fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            kind: BackendKind::Ollama,
            url: "http://localhost:11434".to_string(),
            api_key_env: None,
        },
        BackendConfig {
            kind: BackendKind::OpenAi,
            url: "http://localhost:1234".to_string(),
            api_key_env: None,
        },
    ]
}

fn default_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_dimension() -> usize {
    768
}

fn default_batch_size() -> usize {
    10
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_embed_timeout() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    2000
}

fn default_auto_setup_wait() -> u64 {
    15
}

fn default_min_content_length() -> usize {
    50
}

fn default_max_prefetch() -> usize {
    5
}

fn default_flush_every() -> usize {
    50
}

fn default_chunk_max_chars() -> usize {
    4000
}

fn default_folder_extensions() -> Vec<String> {
    ["txt", "md", "markdown", "html", "htm", "csv", "json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ignored_dirs() -> Vec<String> {
    [".git", "node_modules", "target", "dist", "build", "__pycache__", ".venv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_code_max_depth() -> usize {
    20
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

fn default_dedup_sample() -> usize {
    10
}

fn default_min_occurrences() -> usize {
    3
}

fn default_max_phrases() -> usize {
    1000
}

fn default_ngram_sizes() -> Vec<usize> {
    vec![3, 5, 7, 10]
}

fn default_crawl_depth() -> usize {
    2
}

fn default_max_pages() -> usize {
    100
}

fn default_crawl_concurrency() -> usize {
    4
}

fn default_page_timeout() -> u64 {
    15
}

fn default_user_agent() -> String {
    format!("lore/{}", env!("CARGO_PKG_VERSION"))
}

fn default_token_env() -> String {
    "LORE_DRIVE_TOKEN".to_string()
}

fn default_drive_api() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_check_interval() -> u64 {
    60
}

fn default_min_resync() -> u64 {
    300
}

fn default_deletion_threshold() -> usize {
    5
}

fn default_top_k() -> usize {
    5
}

fn default_max_top_k() -> usize {
    50
}

fn default_snippet_chars() -> usize {
    300
}
