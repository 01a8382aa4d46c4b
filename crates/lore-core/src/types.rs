//! Core domain types for the lore index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{LoreError, Result};

/// Content type of an extracted item, determines how text is pulled out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Rust,
    Python,
    TypeScript,
    JavaScript,
    Go,
    Java,
    Cpp,
    C,
    Ruby,
    Shell,
    Markdown,
    Html,
    Json,
    Yaml,
    Toml,
    Csv,
    Xml,
    PlainText,
    Unknown,
}

impl ContentType {
    /// Detect content type from file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "rs" => Self::Rust,
            "py" | "pyi" => Self::Python,
            "ts" | "tsx" => Self::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "go" => Self::Go,
            "java" => Self::Java,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" => Self::Cpp,
            "c" | "h" => Self::C,
            "rb" => Self::Ruby,
            "sh" | "bash" | "zsh" => Self::Shell,
            "md" | "markdown" | "mdx" => Self::Markdown,
            "html" | "htm" | "xhtml" => Self::Html,
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            "toml" => Self::Toml,
            "csv" | "tsv" => Self::Csv,
            "xml" => Self::Xml,
            "txt" | "text" | "log" | "rst" => Self::PlainText,
            _ => Self::Unknown,
        }
    }

    /// Detect content type from a file path or name.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }

    /// Detect content type from an HTTP `Content-Type` header value.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or("").trim().to_lowercase();
        match essence.as_str() {
            "text/html" | "application/xhtml+xml" => Self::Html,
            "text/markdown" | "text/x-markdown" => Self::Markdown,
            "text/csv" | "text/tab-separated-values" => Self::Csv,
            "application/json" => Self::Json,
            "application/xml" | "text/xml" => Self::Xml,
            "text/plain" => Self::PlainText,
            _ => Self::Unknown,
        }
    }

    /// Check if this is a programming language source file.
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            Self::Rust
                | Self::Python
                | Self::TypeScript
                | Self::JavaScript
                | Self::Go
                | Self::Java
                | Self::Cpp
                | Self::C
                | Self::Ruby
                | Self::Shell
        )
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Rust => "Rust",
            Self::Python => "Python",
            Self::TypeScript => "TypeScript",
            Self::JavaScript => "JavaScript",
            Self::Go => "Go",
            Self::Java => "Java",
            Self::Cpp => "C++",
            Self::C => "C",
            Self::Ruby => "Ruby",
            Self::Shell => "Shell",
            Self::Markdown => "Markdown",
            Self::Html => "HTML",
            Self::Json => "JSON",
            Self::Yaml => "YAML",
            Self::Toml => "TOML",
            Self::Csv => "CSV",
            Self::Xml => "XML",
            Self::PlainText => "Plain Text",
            Self::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Folder,
    Drive,
    Crawl,
    Code,
    Manual,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Drive => "drive",
            Self::Crawl => "crawl",
            Self::Code => "code",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = LoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "folder" => Ok(Self::Folder),
            "drive" => Ok(Self::Drive),
            "crawl" => Ok(Self::Crawl),
            "code" => Ok(Self::Code),
            "manual" => Ok(Self::Manual),
            other => Err(LoreError::config(format!(
                "unknown source kind '{}' (expected folder, drive, crawl, code or manual)",
                other
            ))),
        }
    }
}

/// Document metadata: an open map restricted to the keys in [`METADATA_SCHEMA`].
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Recognized metadata keys.
pub mod keys {
    pub const SOURCE: &str = "source";
    pub const FILE_PATH: &str = "filePath";
    pub const FILE_NAME: &str = "fileName";
    pub const EXTENSION: &str = "extension";
    pub const URL: &str = "url";
    pub const TITLE: &str = "title";
    pub const DEPTH: &str = "depth";
    pub const DRIVE_FILE_ID: &str = "driveFileId";
    pub const MIME_TYPE: &str = "mimeType";
    pub const MODIFIED_TIME: &str = "modifiedTime";
    pub const MTIME: &str = "mtime";
    pub const SIZE: &str = "size";
    pub const PAGE: &str = "page";
    pub const ROW_INDEX: &str = "rowIndex";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const START_LINE: &str = "startLine";
    pub const END_LINE: &str = "endLine";
    pub const LANGUAGE: &str = "language";
    pub const CONTENT_HASH: &str = "contentHash";
    pub const CRAWLED_AT: &str = "crawledAt";
    /// Hash of a crawled page's whole extracted text, its change signature.
    pub const PAGE_HASH: &str = "pageHash";
    pub const INDEXED_AT: &str = "indexedAt";
}

/// Value type accepted for a metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    Text,
    Integer,
}

/// Allow-list of metadata keys and their value types.
pub const METADATA_SCHEMA: &[(&str, MetadataKind)] = &[
    (keys::SOURCE, MetadataKind::Text),
    (keys::FILE_PATH, MetadataKind::Text),
    (keys::FILE_NAME, MetadataKind::Text),
    (keys::EXTENSION, MetadataKind::Text),
    (keys::URL, MetadataKind::Text),
    (keys::TITLE, MetadataKind::Text),
    (keys::DEPTH, MetadataKind::Integer),
    (keys::DRIVE_FILE_ID, MetadataKind::Text),
    (keys::MIME_TYPE, MetadataKind::Text),
    (keys::MODIFIED_TIME, MetadataKind::Text),
    (keys::MTIME, MetadataKind::Integer),
    (keys::SIZE, MetadataKind::Integer),
    (keys::PAGE, MetadataKind::Integer),
    (keys::ROW_INDEX, MetadataKind::Integer),
    (keys::CHUNK_INDEX, MetadataKind::Integer),
    (keys::START_LINE, MetadataKind::Integer),
    (keys::END_LINE, MetadataKind::Integer),
    (keys::LANGUAGE, MetadataKind::Text),
    (keys::CONTENT_HASH, MetadataKind::Text),
    (keys::CRAWLED_AT, MetadataKind::Text),
    (keys::PAGE_HASH, MetadataKind::Text),
    (keys::INDEXED_AT, MetadataKind::Text),
];

/// Reject keys outside the allow-list and values of the wrong type.
pub fn validate_metadata(metadata: &Metadata) -> Result<()> {
    for (key, value) in metadata {
        let kind = METADATA_SCHEMA
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| LoreError::InvalidMetadata {
                key: key.clone(),
                reason: "not in the metadata allow-list".to_string(),
            })?;

        let ok = match kind {
            MetadataKind::Text => value.is_string(),
            MetadataKind::Integer => value.is_i64() || value.is_u64(),
        };
        if !ok {
            return Err(LoreError::InvalidMetadata {
                key: key.clone(),
                reason: format!("expected {:?}, got {}", kind, value),
            });
        }
    }
    Ok(())
}

/// A candidate document produced by extraction, not yet embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Caller-supplied id, scoped by source (path, file id + page, URL, row).
    pub id: String,

    /// Extracted text.
    pub content: String,

    /// Provenance metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document with empty metadata.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata insert.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Get a text metadata value.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// A stored document: content identity plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Unique id within the store.
    pub id: String,

    /// Embedding vector, length equals the store dimension.
    pub vector: Vec<f32>,

    /// Original text (omitted when the store is configured not to keep it).
    pub content: Option<String>,

    /// Provenance metadata.
    #[serde(default)]
    pub metadata: Metadata,

    /// Hex content hash, the dedup identity.
    pub checksum: String,

    /// Embedding-scheme tag the vector was produced under.
    pub version: String,
}

impl IndexRecord {
    /// Get a text metadata value.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Source kind recorded in metadata, if any.
    pub fn source(&self) -> Option<SourceKind> {
        self.meta_str(keys::SOURCE).and_then(|s| s.parse().ok())
    }
}

/// A nearest-neighbor hit from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    /// Cosine similarity, higher is better.
    pub score: f32,
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A search result with rank, score and snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result rank (1-indexed).
    pub rank: u32,

    /// Relevance score (higher is better).
    pub score: f32,

    /// Document id.
    pub id: String,

    /// Originating path or URL.
    pub source_ref: Option<String>,

    /// Short excerpt of the content.
    pub snippet: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

/// Search results container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    /// The original query.
    pub query: String,

    /// Total results returned.
    pub total_results: usize,

    /// Search latency in milliseconds.
    pub latency_ms: u64,

    /// Individual results.
    pub results: Vec<SearchResult>,
}

/// Identifies the tool version and model a vector was produced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingScheme {
    pub tool_version: String,
    pub model: String,
}

impl EmbeddingScheme {
    /// Scheme for the running build and the given model.
    pub fn current(model: impl Into<String>) -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            model: model.into(),
        }
    }

    /// Version tag stored on every record.
    pub fn tag(&self) -> String {
        format!("{}/{}", self.tool_version, self.model)
    }
}
