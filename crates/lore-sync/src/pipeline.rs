//! Continuous processing pipeline.
//!
//! A prefetch task extracts documents from source items and pushes them
//! onto a bounded channel; it stalls when `max_prefetch` items are waiting.
//! The process loop pulls from the channel and hands each item's documents
//! to a [`TaskSupervisor`] without waiting for them to be embedded, so
//! extraction and embedding overlap.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use lore_core::{Document, IngestOptions, LoreError, Result, SyncSummary};

use crate::indexer::{Indexer, ItemTally};
use crate::state::Change;

/// Indexing tasks allowed to run at once.
const DEFAULT_MAX_OUTSTANDING: usize = 64;

/// Result of one supervised task.
#[derive(Debug)]
pub struct TaskReport {
    pub key: String,
    pub change: Change,
    pub tally: ItemTally,
}

/// Tracks fire-and-forget indexing tasks.
///
/// Tasks report through a dedicated channel; [`TaskSupervisor::join`]
/// waits for all of them and returns their reports.
pub struct TaskSupervisor {
    permits: Arc<Semaphore>,
    outstanding: Arc<AtomicUsize>,
    reports_tx: mpsc::UnboundedSender<TaskReport>,
    reports_rx: mpsc::UnboundedReceiver<TaskReport>,
}

impl TaskSupervisor {
    pub fn new(max_outstanding: usize) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            permits: Arc::new(Semaphore::new(max_outstanding.max(1))),
            outstanding: Arc::new(AtomicUsize::new(0)),
            reports_tx,
            reports_rx,
        }
    }

    /// Start a task, waiting only while the outstanding limit is reached.
    pub async fn spawn<F>(&self, key: String, change: Change, task: F) -> Result<()>
    where
        F: Future<Output = ItemTally> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LoreError::internal("task supervisor closed"))?;

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let outstanding = self.outstanding.clone();
        let reports = self.reports_tx.clone();

        tokio::spawn(async move {
            let tally = task.await;
            let _ = reports.send(TaskReport { key, change, tally });
            outstanding.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
        Ok(())
    }

    /// Tasks started and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait for every task and collect the reports.
    pub async fn join(self) -> Vec<TaskReport> {
        let Self {
            reports_tx,
            mut reports_rx,
            ..
        } = self;
        drop(reports_tx);

        let mut reports = Vec::new();
        while let Some(report) = reports_rx.recv().await {
            reports.push(report);
        }
        reports
    }
}

/// One source item scheduled for extraction.
#[derive(Debug, Clone)]
pub struct PipelineItem<T> {
    /// Provenance value identifying the item (path, file id, URL).
    pub key: String,
    pub change: Change,
    pub payload: T,
}

struct Prefetched {
    key: String,
    change: Change,
    documents: Result<Vec<Document>>,
}

/// Prefetching extractor in front of the indexer.
pub struct ContinuousPipeline {
    indexer: Arc<Indexer>,
    max_prefetch: usize,
    flush_every: usize,
    max_outstanding: usize,

    /// Metadata key whose records are removed before an updated item is
    /// indexed again.
    replace_key: Option<&'static str>,
}

impl ContinuousPipeline {
    pub fn new(indexer: Arc<Indexer>, options: &IngestOptions) -> Self {
        Self {
            indexer,
            max_prefetch: options.max_prefetch.max(1),
            flush_every: options.flush_every.max(1),
            max_outstanding: DEFAULT_MAX_OUTSTANDING,
            replace_key: None,
        }
    }

    /// Remove records tagged `key = item.key` before re-indexing an update.
    pub fn replacing(mut self, key: &'static str) -> Self {
        self.replace_key = Some(key);
        self
    }

    pub fn with_max_outstanding(mut self, max: usize) -> Self {
        self.max_outstanding = max.max(1);
        self
    }

    /// Extract and index every item. Returns once all indexing tasks have
    /// reported; the caller still owns the final drain and flush.
    pub async fn run<T, F>(&self, items: Vec<PipelineItem<T>>, extract: F) -> Result<SyncSummary>
    where
        T: Send + 'static,
        F: Fn(&T) -> Result<Vec<Document>> + Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Prefetched>(self.max_prefetch);
        let extract = Arc::new(extract);

        let prefetch = tokio::spawn(async move {
            for item in items {
                let PipelineItem {
                    key,
                    change,
                    payload,
                } = item;
                let extract = extract.clone();
                let documents = match tokio::task::spawn_blocking(move || extract(&payload)).await {
                    Ok(documents) => documents,
                    Err(e) => Err(LoreError::internal(format!("extraction task failed: {}", e))),
                };

                if tx
                    .send(Prefetched {
                        key,
                        change,
                        documents,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let supervisor = TaskSupervisor::new(self.max_outstanding);
        let mut summary = SyncSummary::new();
        let mut scheduled = 0usize;
        let mut since_flush = 0usize;

        while let Some(item) = rx.recv().await {
            let documents = match item.documents {
                Ok(documents) => documents,
                Err(e) => {
                    warn!(item = %item.key, "Extraction failed: {}", e);
                    summary.record_error(item.key, e.to_string());
                    continue;
                }
            };

            if item.change == Change::Update {
                if let Some(key) = self.replace_key {
                    if let Err(e) = self.indexer.remove(key, &item.key).await {
                        warn!(item = %item.key, "Failed to remove previous records: {}", e);
                        summary.record_error(item.key, e.to_string());
                        continue;
                    }
                }
            }

            if documents.is_empty() {
                debug!(item = %item.key, "No documents extracted");
                continue;
            }

            scheduled += documents.len();
            since_flush += documents.len();

            let indexer = self.indexer.clone();
            supervisor
                .spawn(item.key, item.change, async move {
                    indexer.index_all(documents).await
                })
                .await?;

            if since_flush >= self.flush_every {
                since_flush = 0;
                if let Err(e) = self.indexer.flush().await {
                    warn!("Periodic flush failed: {}", e);
                }
            }
        }

        prefetch
            .await
            .map_err(|e| LoreError::internal(format!("prefetch task failed: {}", e)))?;

        debug!(scheduled, outstanding = supervisor.outstanding(), "Waiting for indexing tasks");
        for report in supervisor.join().await {
            match report.change {
                Change::Add => summary.added += report.tally.indexed,
                Change::Update => summary.updated += report.tally.indexed,
            }
            summary.skipped += report.tally.skipped;
            for (id, e) in report.tally.errors {
                warn!(item = %report.key, id = %id, "Indexing failed: {}", e);
                summary.record_error(id, e.to_string());
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::shared_indexer;
    use lore_core::keys;

    fn item(key: &str, change: Change, body: &str) -> PipelineItem<String> {
        PipelineItem {
            key: key.to_string(),
            change,
            payload: body.to_string(),
        }
    }

    fn manual_options() -> IngestOptions {
        lore_core::LoreConfig::default().ingest_options(lore_core::SourceKind::Manual, Some(5))
    }

    fn as_documents(
        key: &str,
    ) -> impl Fn(&String) -> Result<Vec<Document>> + Send + Sync + 'static {
        let key = key.to_string();
        move |body: &String| {
            if body == "explode" {
                return Err(LoreError::extraction(&key, "bad input"));
            }
            Ok(body
                .split('|')
                .map(|text| {
                    Document::new(text, text)
                        .with_meta(keys::SOURCE, "manual")
                        .with_meta(keys::FILE_PATH, text.split(' ').next().unwrap_or(""))
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_supervisor_collects_every_report() {
        let supervisor = TaskSupervisor::new(2);
        for i in 0..5 {
            supervisor
                .spawn(format!("k{}", i), Change::Add, async move {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    ItemTally {
                        indexed: i,
                        ..Default::default()
                    }
                })
                .await
                .unwrap();
        }

        let reports = supervisor.join().await;
        assert_eq!(reports.len(), 5);
        assert_eq!(reports.iter().map(|r| r.tally.indexed).sum::<usize>(), 10);
    }

    #[tokio::test]
    async fn test_pipeline_indexes_all_items() {
        let indexer = shared_indexer(5);
        let options = manual_options();
        let pipeline = ContinuousPipeline::new(indexer.clone(), &options).with_max_outstanding(2);

        let items = vec![
            item("one", Change::Add, "first apple document|second apple document"),
            item("two", Change::Add, "third pear document"),
            item("three", Change::Add, "explode"),
            item("four", Change::Add, "third pear document"),
        ];

        let summary = pipeline.run(items, as_documents("x")).await.unwrap();
        indexer.finish(&summary).await.unwrap();

        assert_eq!(summary.added, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].key, "three");
        assert_eq!(indexer.store().count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_update_replaces_previous_records() {
        let indexer = shared_indexer(5);
        let options = manual_options();
        let pipeline =
            ContinuousPipeline::new(indexer.clone(), &options).replacing(keys::FILE_PATH);

        let first = pipeline
            .run(vec![item("/a", Change::Add, "/a original body text")], as_documents("x"))
            .await
            .unwrap();
        assert_eq!(first.added, 1);

        let second = pipeline
            .run(vec![item("/a", Change::Update, "/a rewritten body text here")], as_documents("x"))
            .await
            .unwrap();
        indexer.finish(&second).await.unwrap();

        assert_eq!(second.updated, 1);
        let records = indexer.store().get_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content.as_deref(), Some("/a rewritten body text here"));
    }
}
