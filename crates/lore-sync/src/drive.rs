//! Remote drive sync.
//!
//! State lives in a JSON file: the last seen `modifiedTime` of every file,
//! whether that version has been processed, and the pending work queue.
//! A run either resumes a non-empty queue or enumerates the drive, plans
//! against the processed entries and fills a new queue. Each processed
//! file is flushed and checkpointed before the next one starts, so a run
//! can stop anywhere and a later run continues where it left off.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use lore_core::{
    diff, keys, DriveConfig, ExtractOptions, ExtractSource, Extractor, IngestOptions, LoreError,
    Result, SourceKind, SyncSummary,
};

use crate::drive_client::{DriveClient, DriveFile};
use crate::indexer::{Indexer, ItemTally};
use crate::state::{load_json, save_json, Change, DriveFileState, DriveSyncState, WorkItem};

/// Resolved drive sync settings.
#[derive(Debug, Clone)]
pub struct DriveOptions {
    pub folder_id: String,
    pub state_path: PathBuf,

    /// Files processed per invocation.
    pub max_files: Option<usize>,

    /// Process exactly one file per invocation.
    pub incremental: bool,
}

impl DriveOptions {
    pub fn from_config(config: &DriveConfig) -> Result<Self> {
        let folder_id = config
            .folder_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| LoreError::SourceNotFound {
                source_ref: "drive".to_string(),
                remedy: "set drive.folder_id or pass --folder-id".to_string(),
            })?;

        Ok(Self {
            folder_id,
            state_path: config.state_path.clone(),
            max_files: config.max_files,
            incremental: config.incremental,
        })
    }

    fn per_run_limit(&self) -> usize {
        if self.incremental {
            1
        } else {
            self.max_files.unwrap_or(usize::MAX).max(1)
        }
    }
}

/// Resumable sync of one remote drive folder tree.
pub struct DriveSync {
    client: Arc<dyn DriveClient>,
    indexer: Arc<Indexer>,
    extractor: Arc<dyn Extractor>,
    options: DriveOptions,
    ingest: IngestOptions,
}

impl DriveSync {
    pub fn new(
        client: Arc<dyn DriveClient>,
        indexer: Arc<Indexer>,
        extractor: Arc<dyn Extractor>,
        options: DriveOptions,
        ingest: IngestOptions,
    ) -> Self {
        Self {
            client,
            indexer,
            extractor,
            options,
            ingest,
        }
    }

    pub async fn sync(&self) -> Result<SyncSummary> {
        let mut state: DriveSyncState = load_json(&self.options.state_path)?;
        let mut summary = SyncSummary::new();

        if state.work_queue.is_empty() {
            let files = self.enumerate().await?;
            self.plan(&mut state, files, &mut summary).await?;
        } else {
            info!(pending = state.work_queue.len(), "Resuming drive sync");
        }

        let limit = self.options.per_run_limit();
        let mut processed = 0usize;

        while processed < limit {
            let Some(item) = state.work_queue.first().cloned() else {
                break;
            };

            let entry = match state.file_metadata.get(&item.file_id) {
                Some(entry) if !entry.is_processed() => entry.clone(),
                Some(_) => {
                    debug!(file_id = %item.file_id, "Already processed, skipping");
                    state.work_queue.remove(0);
                    save_json(&self.options.state_path, &state)?;
                    continue;
                }
                None => {
                    state.work_queue.remove(0);
                    continue;
                }
            };

            let outcome = self.process(&item, &entry).await;
            let last_error = match outcome {
                Ok(tally) => {
                    match item.change {
                        Change::Add => summary.added += tally.indexed,
                        Change::Update => summary.updated += tally.indexed,
                    }
                    summary.skipped += tally.skipped;
                    let first_error = tally.errors.first().map(|(_, e)| e.to_string());
                    for (id, e) in tally.errors {
                        summary.record_error(id, e.to_string());
                    }
                    first_error
                }
                Err(e) => {
                    warn!(file_id = %item.file_id, name = %entry.name, "Drive file failed: {}", e);
                    summary.record_error(item.file_id.clone(), e.to_string());
                    Some(e.to_string())
                }
            };

            self.indexer.flush().await?;
            if let Some(entry) = state.file_metadata.get_mut(&item.file_id) {
                entry.processed_at = Some(Utc::now().to_rfc3339());
                entry.last_error = last_error;
            }
            state.work_queue.remove(0);
            save_json(&self.options.state_path, &state)?;
            processed += 1;
        }

        if state.work_queue.is_empty() {
            state.last_sync_time = Some(Utc::now().to_rfc3339());
            save_json(&self.options.state_path, &state)?;
        } else {
            info!(remaining = state.work_queue.len(), "Drive sync paused");
        }

        self.indexer.finish(&summary).await?;
        info!("Drive sync finished: {}", summary);
        Ok(summary)
    }

    /// Every non-folder file below the root folder.
    async fn enumerate(&self) -> Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut folders = VecDeque::from([self.options.folder_id.clone()]);
        let mut seen = HashSet::new();

        while let Some(folder) = folders.pop_front() {
            if !seen.insert(folder.clone()) {
                continue;
            }

            let mut page_token: Option<String> = None;
            loop {
                let page = self
                    .client
                    .list_children(&folder, page_token.as_deref())
                    .await
                    .map_err(|e| LoreError::Enumeration {
                        source_ref: format!("drive folder {}", folder),
                        message: e.to_string(),
                    })?;

                for file in page.files {
                    if file.is_folder() {
                        folders.push_back(file.id);
                    } else {
                        files.push(file);
                    }
                }

                match page.next_page_token {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }
        }

        info!(files = files.len(), folders = seen.len(), "Enumerated drive");
        Ok(files)
    }

    /// Diff the listing against processed state, apply deletions and
    /// queue additions and updates.
    async fn plan(
        &self,
        state: &mut DriveSyncState,
        files: Vec<DriveFile>,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let current: Vec<(String, String)> = files
            .iter()
            .map(|f| (f.id.clone(), f.modified_time.clone()))
            .collect();
        let known: HashMap<String, String> = state
            .file_metadata
            .iter()
            .filter(|(_, entry)| entry.is_processed())
            .map(|(id, entry)| (id.clone(), entry.modified_time.clone()))
            .collect();
        let plan = diff(&current, &known);

        info!(
            new = plan.to_add.len(),
            changed = plan.to_update.len(),
            removed = plan.to_delete.len(),
            unchanged = plan.unchanged.len(),
            "Drive sync planned"
        );
        summary.skipped += plan.unchanged.len();

        for file_id in &plan.to_delete {
            match self.indexer.remove(keys::DRIVE_FILE_ID, file_id).await {
                Ok(removed) => summary.removed += removed,
                Err(e) => summary.record_error(file_id.clone(), e.to_string()),
            }
        }

        let listed: HashMap<&str, &DriveFile> = files.iter().map(|f| (f.id.as_str(), f)).collect();
        state.file_metadata.retain(|id, _| listed.contains_key(id.as_str()));

        for (ids, change) in [(&plan.to_add, Change::Add), (&plan.to_update, Change::Update)] {
            for id in ids {
                let Some(file) = listed.get(id.as_str()) else {
                    continue;
                };
                state.file_metadata.insert(
                    id.clone(),
                    DriveFileState {
                        name: file.name.clone(),
                        mime_type: file.mime_type.clone(),
                        modified_time: file.modified_time.clone(),
                        processed_at: None,
                        last_error: None,
                    },
                );
                state.work_queue.push(WorkItem {
                    file_id: id.clone(),
                    change,
                });
            }
        }

        save_json(&self.options.state_path, state)
    }

    async fn process(&self, item: &WorkItem, entry: &DriveFileState) -> Result<ItemTally> {
        let file = DriveFile {
            id: item.file_id.clone(),
            name: entry.name.clone(),
            mime_type: entry.mime_type.clone(),
            modified_time: entry.modified_time.clone(),
        };

        let content_type = file.content_type();
        if !self.extractor.supports(content_type) {
            debug!(file_id = %file.id, mime = %file.mime_type, "Unsupported drive file");
            if item.change == Change::Update {
                self.indexer.remove(keys::DRIVE_FILE_ID, &file.id).await?;
            }
            return Ok(ItemTally {
                skipped: 1,
                ..Default::default()
            });
        }

        let data = self.client.download(&file).await?;
        let options = ExtractOptions::new(SourceKind::Drive, self.ingest.chunk_max_chars)
            .with_id_prefix(file.id.clone())
            .with_meta(keys::DRIVE_FILE_ID, file.id.clone())
            .with_meta(keys::FILE_NAME, file.name.clone())
            .with_meta(keys::MIME_TYPE, file.mime_type.clone())
            .with_meta(keys::MODIFIED_TIME, file.modified_time.clone());
        let documents = self.extractor.extract(
            ExtractSource::Bytes {
                name: &file.name,
                data: &data,
                content_type,
            },
            &options,
        )?;

        if item.change == Change::Update {
            self.indexer.remove(keys::DRIVE_FILE_ID, &file.id).await?;
        }
        Ok(self.indexer.index_all(documents).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive_client::{DrivePage, FOLDER_MIME};
    use crate::testing::shared_indexer;
    use async_trait::async_trait;
    use lore_extract::TextExtractor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeDrive {
        folders: Mutex<HashMap<String, Vec<DriveFile>>>,
        contents: Mutex<HashMap<String, String>>,
        downloads: AtomicUsize,
        fail_listing: bool,
    }

    impl FakeDrive {
        fn put(&self, folder: &str, id: &str, name: &str, modified: &str, body: &str) {
            self.folders
                .lock()
                .unwrap()
                .entry(folder.to_string())
                .or_default()
                .retain(|f| f.id != id);
            self.folders.lock().unwrap().get_mut(folder).unwrap().push(DriveFile {
                id: id.to_string(),
                name: name.to_string(),
                mime_type: "text/plain".to_string(),
                modified_time: modified.to_string(),
            });
            self.contents.lock().unwrap().insert(id.to_string(), body.to_string());
        }

        fn subfolder(&self, parent: &str, id: &str) {
            self.folders.lock().unwrap().entry(parent.to_string()).or_default().push(DriveFile {
                id: id.to_string(),
                name: id.to_string(),
                mime_type: FOLDER_MIME.to_string(),
                modified_time: String::new(),
            });
        }

        fn delete(&self, folder: &str, id: &str) {
            if let Some(files) = self.folders.lock().unwrap().get_mut(folder) {
                files.retain(|f| f.id != id);
            }
        }
    }

    #[async_trait]
    impl DriveClient for FakeDrive {
        async fn list_children(
            &self,
            folder_id: &str,
            _page_token: Option<&str>,
        ) -> Result<DrivePage> {
            if self.fail_listing {
                return Err(LoreError::network("connection refused"));
            }
            Ok(DrivePage {
                files: self.folders.lock().unwrap().get(folder_id).cloned().unwrap_or_default(),
                next_page_token: None,
            })
        }

        async fn download(&self, file: &DriveFile) -> Result<Vec<u8>> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.contents
                .lock()
                .unwrap()
                .get(&file.id)
                .map(|b| b.as_bytes().to_vec())
                .ok_or_else(|| LoreError::Remote {
                    status: 404,
                    message: "gone".to_string(),
                })
        }
    }

    struct Fixture {
        _dir: TempDir,
        drive: Arc<FakeDrive>,
        indexer: Arc<Indexer>,
        options: DriveOptions,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let drive = Arc::new(FakeDrive::default());
            drive.put("root", "f1", "one.txt", "t1", "Glaciers carve valleys over millennia.");
            drive.put("root", "f2", "two.txt", "t1", "Volcanoes build islands from lava flows.");
            drive.subfolder("root", "sub");
            drive.put("sub", "f3", "three.txt", "t1", "Coral reefs shelter thousands of species.");

            Self {
                options: DriveOptions {
                    folder_id: "root".to_string(),
                    state_path: dir.path().join("drive.json"),
                    max_files: None,
                    incremental: false,
                },
                _dir: dir,
                drive,
                indexer: shared_indexer(10),
            }
        }

        fn engine(&self, options: DriveOptions) -> DriveSync {
            let ingest =
                lore_core::LoreConfig::default().ingest_options(SourceKind::Drive, Some(10));
            DriveSync::new(
                self.drive.clone(),
                self.indexer.clone(),
                Arc::new(TextExtractor::new()),
                options,
                ingest,
            )
        }

        fn state(&self) -> DriveSyncState {
            load_json(&self.options.state_path).unwrap()
        }
    }

    #[tokio::test]
    async fn test_full_sync_then_idempotent() {
        let fx = Fixture::new();
        let first = fx.engine(fx.options.clone()).sync().await.unwrap();
        assert_eq!(first.added, 3);
        assert!(fx.state().last_sync_time.is_some());

        let second = fx.engine(fx.options.clone()).sync().await.unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(fx.drive.downloads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_interrupted_sync_resumes_remaining_items() {
        let fx = Fixture::new();
        let capped = DriveOptions {
            max_files: Some(2),
            ..fx.options.clone()
        };

        let first = fx.engine(capped.clone()).sync().await.unwrap();
        assert_eq!(first.added, 2);
        assert_eq!(fx.state().work_queue.len(), 1);
        assert!(fx.state().last_sync_time.is_none());

        let second = fx.engine(capped).sync().await.unwrap();
        assert_eq!(second.added, 1);
        assert!(fx.state().work_queue.is_empty());

        assert_eq!(first.added + second.added, 3);
        assert_eq!(fx.drive.downloads.load(Ordering::SeqCst), 3);
        assert_eq!(fx.indexer.store().count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_processed_item_left_in_queue_is_skipped() {
        let fx = Fixture::new();
        let mut state = DriveSyncState::default();
        state.file_metadata.insert(
            "f1".to_string(),
            DriveFileState {
                name: "one.txt".to_string(),
                mime_type: "text/plain".to_string(),
                modified_time: "t1".to_string(),
                processed_at: Some("2024-01-01T00:00:00Z".to_string()),
                last_error: None,
            },
        );
        state.work_queue.push(WorkItem {
            file_id: "f1".to_string(),
            change: Change::Add,
        });
        save_json(&fx.options.state_path, &state).unwrap();

        let summary = fx.engine(fx.options.clone()).sync().await.unwrap();
        assert_eq!(summary.added, 0);
        assert_eq!(fx.drive.downloads.load(Ordering::SeqCst), 0);
        assert!(fx.state().work_queue.is_empty());
    }

    #[tokio::test]
    async fn test_incremental_mode_processes_one_file() {
        let fx = Fixture::new();
        let one_at_a_time = DriveOptions {
            incremental: true,
            ..fx.options.clone()
        };

        let mut total = 0;
        for _ in 0..3 {
            total += fx.engine(one_at_a_time.clone()).sync().await.unwrap().added;
            assert!(fx.drive.downloads.load(Ordering::SeqCst) <= 3);
        }
        assert_eq!(total, 3);
        assert!(fx.state().work_queue.is_empty());
    }

    #[tokio::test]
    async fn test_modified_and_deleted_files() {
        let fx = Fixture::new();
        fx.engine(fx.options.clone()).sync().await.unwrap();

        fx.drive.put("root", "f1", "one.txt", "t2", "Glaciers retreat as the climate warms.");
        fx.drive.delete("root", "f2");

        let summary = fx.engine(fx.options.clone()).sync().await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.skipped, 1);

        let ids: Vec<String> = fx
            .indexer
            .store()
            .ids_for_metadata(keys::DRIVE_FILE_ID, "f1")
            .await
            .unwrap();
        let record = fx.indexer.store().get(&ids[0]).await.unwrap().unwrap();
        assert_eq!(record.content.as_deref(), Some("Glaciers retreat as the climate warms."));
        assert!(!fx.state().file_metadata.contains_key("f2"));
    }

    #[tokio::test]
    async fn test_failed_download_is_recorded_and_not_retried() {
        let fx = Fixture::new();
        fx.drive.contents.lock().unwrap().remove("f2");

        let summary = fx.engine(fx.options.clone()).sync().await.unwrap();
        assert_eq!(summary.added, 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].key, "f2");

        let entry = &fx.state().file_metadata["f2"];
        assert!(entry.is_processed());
        assert!(entry.last_error.is_some());
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let drive = Arc::new(FakeDrive {
            fail_listing: true,
            ..Default::default()
        });
        let engine = DriveSync::new(
            drive,
            shared_indexer(10),
            Arc::new(TextExtractor::new()),
            DriveOptions {
                folder_id: "root".to_string(),
                state_path: dir.path().join("drive.json"),
                max_files: None,
                incremental: false,
            },
            lore_core::LoreConfig::default().ingest_options(SourceKind::Drive, None),
        );
        let err = engine.sync().await.unwrap_err();
        assert_eq!(err.error_code(), "ENUMERATION_FAILED");
    }
}
