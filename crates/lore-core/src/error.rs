//! Error types for the lore index.

use thiserror::Error;

/// Result type alias using LoreError.
pub type Result<T> = std::result::Result<T, LoreError>;

/// Errors that can occur while indexing, syncing or searching.
#[derive(Error, Debug)]
pub enum LoreError {
    /// A configured source (folder, seed URL, drive folder) does not exist.
    #[error("Source not found: {source_ref} - {remedy}")]
    SourceNotFound { source_ref: String, remedy: String },

    /// The source could not be listed at all.
    #[error("Failed to enumerate {source_ref}: {message}")]
    Enumeration { source_ref: String, message: String },

    /// Vector length does not match the store's configured dimension.
    #[error(
        "Vector dimension mismatch: store expects {expected}, got {actual}. \
         Re-create the store or configure a model with {expected} dimensions"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    /// No embedding backend answered its liveness probe.
    #[error(
        "No embedding backend is reachable (probed: {}). \
         Start one of them or enable embedding.auto_setup",
        .attempted.join(", ")
    )]
    BackendUnavailable { attempted: Vec<String> },

    /// The backend does not have the requested model installed.
    #[error("Embedding model not found on backend: {model}")]
    ModelNotFound { model: String },

    /// Metadata key outside the allow-list or with the wrong value type.
    #[error("Invalid metadata key '{key}': {reason}")]
    InvalidMetadata { key: String, reason: String },

    /// The store file is held open for writing by another process.
    #[error("Store {path} is locked by another process; only one writer may hold it open")]
    StoreLocked { path: String },

    /// A network call timed out.
    #[error("Timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    /// Transient network failure (connect, 5xx, 429).
    #[error("Network error: {message}")]
    Network { message: String },

    /// Remote API answered with a non-retryable error.
    #[error("Remote API error {status}: {message}")]
    Remote { status: u16, message: String },

    /// Failed to extract text from a source item.
    #[error("Failed to extract {item}: {reason}")]
    Extraction { item: String, reason: String },

    /// Format not handled by the extractor.
    #[error("Unsupported format: {item}")]
    Unsupported { item: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Embedding backend error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Sync error.
    #[error("Sync error: {message}")]
    Sync { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LoreError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a transient network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a sync error.
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an extraction error for one item.
    pub fn extraction(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            item: item.into(),
            reason: reason.into(),
        }
    }

    /// Configuration errors abort the whole command.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound { .. }
                | Self::DimensionMismatch { .. }
                | Self::BackendUnavailable { .. }
                | Self::StoreLocked { .. }
                | Self::Config { .. }
        )
    }

    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Get a stable error code for protocol responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SourceNotFound { .. } => "SOURCE_NOT_FOUND",
            Self::Enumeration { .. } => "ENUMERATION_FAILED",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            Self::InvalidMetadata { .. } => "INVALID_METADATA",
            Self::StoreLocked { .. } => "STORE_LOCKED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::Remote { .. } => "REMOTE_ERROR",
            Self::Extraction { .. } => "EXTRACTION_FAILED",
            Self::Unsupported { .. } => "UNSUPPORTED_FORMAT",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Sync { .. } => "SYNC_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
