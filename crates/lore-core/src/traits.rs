//! Core traits defining the interfaces between components.

use async_trait::async_trait;
use std::path::Path;

use crate::error::{LoreError, Result};
use crate::types::{ContentType, Document, IndexRecord, Metadata, ScoredDocument, SourceKind};

/// Vector storage layer.
///
/// Writes may be buffered; `flush` makes them durable. Reads observe
/// buffered writes.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Vector length every record must have.
    fn dimension(&self) -> usize;

    /// Insert or replace a record by id.
    ///
    /// Fails with `DimensionMismatch` when the vector length differs from
    /// [`VectorStore::dimension`].
    async fn put(&self, record: IndexRecord) -> Result<()>;

    /// Id of the live record with this checksum, if any.
    async fn get_by_checksum(&self, checksum: &str) -> Result<Option<String>>;

    /// Fetch one record.
    async fn get(&self, id: &str) -> Result<Option<IndexRecord>>;

    /// Every record in the store.
    async fn get_all(&self) -> Result<Vec<IndexRecord>>;

    /// Delete records by id, returning how many existed.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize>;

    /// Nearest neighbors by cosine similarity, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>>;

    /// Number of records.
    async fn count(&self) -> Result<usize>;

    /// Record counts grouped by `metadata.source`.
    async fn count_by_source(&self) -> Result<Vec<(String, usize)>>;

    /// Id and metadata of every record tagged with a source kind.
    async fn provenance(&self, source: SourceKind) -> Result<Vec<(String, Metadata)>>;

    /// Ids of records whose text metadata `key` equals `value`.
    async fn ids_for_metadata(&self, key: &str, value: &str) -> Result<Vec<String>>;

    /// Delete records whose text metadata `key` equals `value`.
    async fn delete_by_metadata(&self, key: &str, value: &str) -> Result<usize>;

    /// Persist buffered writes.
    async fn flush(&self) -> Result<()>;

    /// Flush and release the underlying handle.
    async fn close(&self) -> Result<()>;

    /// Index maintenance capability, if this store has one.
    fn as_indexing(&self) -> Option<&dyn SupportsIndexing> {
        None
    }
}

/// Capability for stores that keep a search index beside their records.
#[async_trait]
pub trait SupportsIndexing: Send + Sync {
    /// Rebuild the search index from the stored records.
    async fn build_index(&self) -> Result<()>;

    /// Whether the index reflects every stored record.
    fn is_indexed(&self) -> bool;
}

/// A network-reachable service that turns text into vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Short backend name used in logs and probe reports.
    fn name(&self) -> &str;

    /// Model this backend embeds with.
    fn model(&self) -> &str;

    /// Declared vector length.
    fn dimension(&self) -> usize;

    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Lightweight liveness probe.
    async fn check_connection(&self) -> bool;

    /// Ask the backend to install the configured model.
    async fn provision_model(&self) -> Result<()> {
        Err(LoreError::ModelNotFound {
            model: self.model().to_string(),
        })
    }
}

/// Input to an extractor.
#[derive(Debug, Clone, Copy)]
pub enum ExtractSource<'a> {
    /// A file on disk.
    Path(&'a Path),

    /// Downloaded bytes with a display name.
    Bytes {
        name: &'a str,
        data: &'a [u8],
        content_type: ContentType,
    },
}

impl ExtractSource<'_> {
    /// Display name for errors and ids.
    pub fn name(&self) -> String {
        match self {
            Self::Path(p) => p.display().to_string(),
            Self::Bytes { name, .. } => name.to_string(),
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Path(p) => ContentType::from_path(p),
            Self::Bytes { content_type, .. } => *content_type,
        }
    }
}

/// Per-call extraction options.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Source kind recorded on every document.
    pub source: SourceKind,

    /// Prefix for document ids; defaults to the source name.
    pub id_prefix: Option<String>,

    /// Maximum characters per document before splitting.
    pub max_chars: usize,

    /// Metadata copied onto every produced document.
    pub base_metadata: Metadata,
}

impl ExtractOptions {
    pub fn new(source: SourceKind, max_chars: usize) -> Self {
        Self {
            source,
            id_prefix: None,
            max_chars,
            base_metadata: Metadata::new(),
        }
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.base_metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Turns one source item into candidate documents.
///
/// Supported formats with empty but valid input yield an empty vec.
pub trait Extractor: Send + Sync {
    /// Whether this extractor handles the content type.
    fn supports(&self, content_type: ContentType) -> bool;

    /// Extract documents from a file or buffer.
    fn extract(&self, source: ExtractSource<'_>, options: &ExtractOptions) -> Result<Vec<Document>>;
}
