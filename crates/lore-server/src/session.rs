//! Process-wide state shared by every command and the server.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use lore_core::{Extractor, LoreConfig, LoreError, Result, SourceKind, VectorStore};
use lore_embed::{BackendRegistry, EmbeddingQueue, QueueOptions};
use lore_extract::TextExtractor;
use lore_store::SqliteStore;
use lore_sync::{FolderSync, Indexer, QueryConfig, SearchEngine};

/// Store, embedding backend and resolved configuration for one process.
///
/// The store is opened eagerly. The embedding backend is probed on the
/// first call that needs vectors and cached from then on, so commands
/// that only read or delete records work without a backend.
pub struct Session {
    config: LoreConfig,
    store: Arc<dyn VectorStore>,
    store_path: String,
    registry: BackendRegistry,
    queue: OnceCell<Arc<EmbeddingQueue>>,
    extractor: Arc<dyn Extractor>,
}

impl Session {
    /// Open the configured store.
    pub fn open(config: LoreConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.store.path, config.embedding.dimension)?
            .with_write_buffer(config.store.write_buffer)
            .with_cache_size(config.store.cache_size)?;
        let store_path = store.path().to_string();
        Ok(Self::with_store(config, Arc::new(store), store_path))
    }

    /// Session over an already opened store.
    pub fn with_store(config: LoreConfig, store: Arc<dyn VectorStore>, store_path: String) -> Self {
        Self {
            registry: BackendRegistry::new(config.embedding.clone()),
            config,
            store,
            store_path,
            queue: OnceCell::new(),
            extractor: Arc::new(TextExtractor::new()),
        }
    }

    pub fn config(&self) -> &LoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn store_path(&self) -> &str {
        &self.store_path
    }

    pub fn extractor(&self) -> Arc<dyn Extractor> {
        self.extractor.clone()
    }

    /// The embedding queue, probing for a backend on first use.
    pub async fn queue(&self) -> Result<Arc<EmbeddingQueue>> {
        self.queue
            .get_or_try_init(|| async {
                let backend = self.registry.get().await?;
                info!(
                    model = %backend.model(),
                    dimension = backend.dimension(),
                    "Embedding backend ready"
                );
                Ok::<_, LoreError>(Arc::new(EmbeddingQueue::new(
                    backend,
                    QueueOptions::from(&self.config.embedding),
                )))
            })
            .await
            .cloned()
    }

    /// Model of the backend, once one has been probed.
    pub fn backend_model(&self) -> Option<String> {
        self.queue.get().map(|q| q.backend().model().to_string())
    }

    /// Indexer for one source, minimum length resolved from the config.
    pub async fn indexer(
        &self,
        source: SourceKind,
        min_override: Option<usize>,
    ) -> Result<Arc<Indexer>> {
        let options = self.config.ingest_options(source, min_override);
        Ok(Arc::new(Indexer::new(self.store.clone(), self.queue().await?, &options)?))
    }

    pub async fn folder_sync(&self, min_override: Option<usize>) -> Result<FolderSync> {
        let indexer = self.indexer(SourceKind::Folder, min_override).await?;
        Ok(FolderSync::new(
            indexer,
            self.extractor(),
            &self.config.folder,
            self.config.ingest_options(SourceKind::Folder, min_override),
        ))
    }

    pub async fn search_engine(&self) -> Result<SearchEngine> {
        Ok(SearchEngine::new(self.store.clone(), self.queue().await?))
    }

    /// Query defaults from the server section.
    pub fn query_config(&self, top_k: Option<usize>) -> QueryConfig {
        QueryConfig::from_server(&self.config.server, top_k)
    }

    /// Wait for pending embeddings and release the store.
    pub async fn close(&self) -> Result<()> {
        if let Some(queue) = self.queue.get() {
            queue.drain().await;
        }
        self.store.flush().await?;
        self.store.close().await?;
        info!(path = %self.store_path, "Store closed");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use lore_core::{BackendConfig, BackendKind};
    use tempfile::TempDir;

    /// Mock-backed config with its store under `dir`.
    pub fn config(dir: &TempDir) -> LoreConfig {
        let mut config = LoreConfig::default();
        config.store.path = dir.path().join("lore.db");
        config.embedding.dimension = 256;
        config.embedding.backends = vec![BackendConfig {
            kind: BackendKind::Mock,
            url: String::new(),
            api_key_env: None,
        }];
        config.folder.min_content_length = Some(10);
        config
    }
}
