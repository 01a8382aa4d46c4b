//! Ledger, embedding queue and store wired together.
//!
//! Every engine hands candidate documents to one [`Indexer`]. A document
//! is checked against the content ledger, embedded through the shared
//! queue and written to the store under its checksum and the active
//! embedding-scheme tag.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use lore_core::{
    keys, Admission, ContentLedger, Document, IndexRecord, IngestOptions, LoreError, Result,
    SkipReason, SyncSummary, VectorStore,
};
use lore_embed::EmbeddingQueue;

/// Re-embed requests kept in flight at once.
const REEMBED_CONCURRENCY: usize = 32;

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Embedded and written under this id.
    Indexed { id: String },
    Skipped(SkipReason),
}

/// Per-item tally of a group of documents.
#[derive(Debug, Default)]
pub struct ItemTally {
    pub indexed: usize,
    pub skipped: usize,
    pub errors: Vec<(String, LoreError)>,
}

impl ItemTally {
    pub fn record(&mut self, id: String, outcome: Result<IndexOutcome>) {
        match outcome {
            Ok(IndexOutcome::Indexed { .. }) => self.indexed += 1,
            Ok(IndexOutcome::Skipped(reason)) => {
                debug!(id = %id, reason = %reason, "Skipped document");
                self.skipped += 1;
            }
            Err(e) => self.errors.push((id, e)),
        }
    }
}

/// Shared write path from documents to the store.
pub struct Indexer {
    store: Arc<dyn VectorStore>,
    queue: Arc<EmbeddingQueue>,
    ledger: ContentLedger,
    store_content: bool,
    version: String,

    /// Checksums being embedded right now, mapped to the claiming id.
    in_flight: Mutex<HashMap<String, String>>,
}

impl Indexer {
    /// Fails with `DimensionMismatch` when the backend and store disagree.
    pub fn new(
        store: Arc<dyn VectorStore>,
        queue: Arc<EmbeddingQueue>,
        options: &IngestOptions,
    ) -> Result<Self> {
        if queue.dimension() != store.dimension() {
            return Err(LoreError::DimensionMismatch {
                expected: store.dimension(),
                actual: queue.dimension(),
            });
        }

        Ok(Self {
            version: queue.scheme().tag(),
            store,
            queue,
            ledger: ContentLedger::new(options.min_content_length),
            store_content: options.store_content,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<EmbeddingQueue> {
        &self.queue
    }

    /// Embedding-scheme tag written on new records.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Admit, embed and store one document.
    pub async fn index(&self, doc: Document) -> Result<IndexOutcome> {
        let checksum = match self.ledger.admit(self.store.as_ref(), &doc.content).await? {
            Admission::Accept { checksum } => checksum,
            Admission::Skip(reason) => return Ok(IndexOutcome::Skipped(reason)),
        };

        if let Some(existing_id) = self.claim(&checksum, &doc.id)? {
            return Ok(IndexOutcome::Skipped(SkipReason::Duplicate { existing_id }));
        }

        let result = self.embed_and_put(doc, &checksum).await;
        self.release(&checksum)?;
        result
    }

    /// Index a group of documents concurrently; the queue batches them.
    pub async fn index_all(&self, docs: Vec<Document>) -> ItemTally {
        let ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
        let outcomes = join_all(docs.into_iter().map(|doc| self.index(doc))).await;

        let mut tally = ItemTally::default();
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            tally.record(id, outcome);
        }
        tally
    }

    /// Remove every record whose metadata `key` equals `value`.
    pub async fn remove(&self, key: &str, value: &str) -> Result<usize> {
        let removed = self.store.delete_by_metadata(key, value).await?;
        if removed > 0 {
            debug!(key, value, removed, "Removed records");
        }
        Ok(removed)
    }

    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }

    /// Wait for outstanding embeds, flush, and rebuild the search index
    /// when the store changed and supports one.
    pub async fn finish(&self, summary: &SyncSummary) -> Result<()> {
        self.queue.drain().await;
        self.store.flush().await?;

        if summary.changed() {
            if let Some(indexing) = self.store.as_indexing() {
                indexing.build_index().await?;
            }
        }
        Ok(())
    }

    /// Re-embed records produced under another scheme, or every record
    /// when `all` is set. Ids are kept.
    pub async fn reembed(&self, all: bool) -> Result<SyncSummary> {
        let records = self.store.get_all().await?;
        let total = records.len();
        let stale: Vec<IndexRecord> = records
            .into_iter()
            .filter(|r| all || r.version != self.version)
            .collect();

        info!(total, stale = stale.len(), version = %self.version, "Re-embedding");

        let mut summary = SyncSummary::new();
        summary.skipped = total - stale.len();

        let results: Vec<(String, Result<()>)> = stream::iter(stale)
            .map(|record| async move {
                let id = record.id.clone();
                (id, self.reembed_one(record).await)
            })
            .buffer_unordered(REEMBED_CONCURRENCY)
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(()) => summary.updated += 1,
                Err(e) => {
                    warn!(id = %id, "Re-embed failed: {}", e);
                    summary.record_error(id, e.to_string());
                }
            }
        }

        self.finish(&summary).await?;
        Ok(summary)
    }

    async fn reembed_one(&self, record: IndexRecord) -> Result<()> {
        let content = record.content.ok_or_else(|| {
            LoreError::embedding("record was stored without content and cannot be re-embedded")
        })?;

        let checksum = ContentLedger::identify(&content);
        let vector = self.queue.embed(content.as_str()).await?;

        let mut metadata = record.metadata;
        metadata.insert(keys::CONTENT_HASH.to_string(), checksum.clone().into());
        metadata.insert(keys::INDEXED_AT.to_string(), Utc::now().to_rfc3339().into());

        self.store
            .put(IndexRecord {
                id: record.id,
                vector,
                content: Some(content),
                metadata,
                checksum,
                version: self.version.clone(),
            })
            .await
    }

    async fn embed_and_put(&self, doc: Document, checksum: &str) -> Result<IndexOutcome> {
        let vector = self.queue.embed(doc.content.as_str()).await?;

        let mut metadata = doc.metadata;
        metadata.insert(keys::CONTENT_HASH.to_string(), checksum.into());
        metadata.insert(keys::INDEXED_AT.to_string(), Utc::now().to_rfc3339().into());

        let id = doc.id;
        self.store
            .put(IndexRecord {
                id: id.clone(),
                vector,
                content: self.store_content.then_some(doc.content),
                metadata,
                checksum: checksum.to_string(),
                version: self.version.clone(),
            })
            .await?;

        Ok(IndexOutcome::Indexed { id })
    }

    /// Claim a checksum for `id`, returning the id that already holds it.
    fn claim(&self, checksum: &str, id: &str) -> Result<Option<String>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| LoreError::internal("in-flight checksum set poisoned"))?;
        if let Some(holder) = in_flight.get(checksum) {
            return Ok(Some(holder.clone()));
        }
        in_flight.insert(checksum.to_string(), id.to_string());
        Ok(None)
    }

    fn release(&self, checksum: &str) -> Result<()> {
        self.in_flight
            .lock()
            .map_err(|_| LoreError::internal("in-flight checksum set poisoned"))?
            .remove(checksum);
        Ok(())
    }
}
