//! lore-embed - Embedding backends and the embedding queue
//!
//! This crate turns text into vectors through a pluggable
//! [`EmbeddingBackend`]:
//!
//! - [`OllamaBackend`] and [`OpenAiBackend`] talk to local or remote HTTP services
//! - [`MockEmbedder`] is a deterministic in-process backend for tests
//! - [`BackendRegistry`] probes configured backends in priority order and
//!   caches the first live one for the process lifetime
//! - [`EmbeddingQueue`] batches requests and runs a bounded number of
//!   batches concurrently, with retry and model auto-provisioning

mod detect;
mod http;
mod mock;
mod ollama;
mod openai;
mod queue;

pub use detect::{build_backend, BackendRegistry};
pub use mock::MockEmbedder;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use queue::{EmbeddingQueue, QueueOptions};

// Re-export the backend trait for convenience
pub use lore_core::EmbeddingBackend;
