//! Shared fixtures for engine tests.

use std::sync::Arc;

use lore_core::{LoreConfig, SourceKind, VectorStore};
use lore_embed::{EmbeddingQueue, MockEmbedder, QueueOptions};
use lore_store::SqliteStore;

use crate::indexer::Indexer;

/// In-memory store plus mock embedder behind a real queue.
pub fn indexer_with(min_length: usize) -> Indexer {
    let store: Arc<dyn VectorStore> = Arc::new(SqliteStore::open_memory(256).unwrap());
    let queue = Arc::new(EmbeddingQueue::new(
        Arc::new(MockEmbedder::new()),
        QueueOptions::default(),
    ));
    let options = LoreConfig::default().ingest_options(SourceKind::Manual, Some(min_length));
    Indexer::new(store, queue, &options).unwrap()
}

pub fn shared_indexer(min_length: usize) -> Arc<Indexer> {
    Arc::new(indexer_with(min_length))
}
