//! Background indexing monitor.
//!
//! Keeps a watched folder in sync while the server answers searches.
//! Full syncs run on their own task; searches never start or wait for one.
//! Every sync error is logged here and never reaches a request.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lore_core::{LoreError, Result, ServerConfig, VectorStore};
use lore_sync::{scan_files, FolderSync, ScanOptions};

/// Known file signatures: path to `(mtime, size)`.
type Signatures = HashMap<String, (i64, u64)>;

/// Monitor timing.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    /// Minimum time between two full syncs.
    pub min_resync_interval: Duration,
    /// Missing files tolerated before deletions count as a change.
    pub deletion_threshold: usize,
}

impl From<&ServerConfig> for MonitorSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.check_interval_secs.max(1)),
            min_resync_interval: Duration::from_secs(config.min_resync_interval_secs),
            deletion_threshold: config.deletion_threshold,
        }
    }
}

/// Point-in-time view for the `status` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub folder: String,
    pub indexing: bool,
    pub completed: bool,
    pub known_files: usize,
    pub last_check: Option<DateTime<Utc>>,
    pub last_full_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct MonitorState {
    task: Option<JoinHandle<()>>,
    completed: bool,
    last_check: Option<DateTime<Utc>>,
    last_full_sync: Option<Instant>,
    last_full_sync_at: Option<DateTime<Utc>>,
    known: Signatures,
    last_error: Option<String>,
}

impl MonitorState {
    fn indexing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

/// Watches one folder and re-syncs it when files change.
pub struct IndexMonitor {
    sync: Arc<FolderSync>,
    root: PathBuf,
    settings: MonitorSettings,
    state: Mutex<MonitorState>,
}

impl IndexMonitor {
    pub fn new(sync: Arc<FolderSync>, root: PathBuf, settings: MonitorSettings) -> Self {
        Self {
            sync,
            root,
            settings,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Schedule a full sync when the store is empty, otherwise take a
    /// baseline of the folder and consider indexing complete.
    pub async fn start(self: &Arc<Self>, store: &dyn VectorStore) -> Result<()> {
        if store.count().await? == 0 {
            info!(folder = %self.root.display(), "Store is empty, indexing in the background");
            self.schedule_full_sync().await;
            return Ok(());
        }

        let baseline = self.snapshot().await;
        let mut state = self.state.lock().await;
        state.completed = true;
        match baseline {
            Ok(known) => state.known = known,
            Err(e) => {
                warn!(folder = %self.root.display(), "Baseline scan failed: {}", e);
                state.last_error = Some(e.to_string());
            }
        }
        info!(known = state.known.len(), "Store already populated, skipping initial sync");
        Ok(())
    }

    /// Start a full sync unless one is running. Returns whether one started.
    pub async fn schedule_full_sync(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().await;
        if state.indexing() {
            debug!("Full sync already running");
            return false;
        }

        state.last_full_sync = Some(Instant::now());
        state.last_full_sync_at = Some(Utc::now());
        let monitor = self.clone();
        state.task = Some(tokio::spawn(async move { monitor.full_sync().await }));
        true
    }

    async fn full_sync(&self) {
        let outcome = self.sync.sync(&self.root).await;
        let snapshot = self.snapshot().await;

        let mut state = self.state.lock().await;
        state.completed = true;
        state.last_error = None;
        match outcome {
            Ok(summary) => info!(
                folder = %self.root.display(),
                "Background sync finished: {}", summary
            ),
            Err(e) => {
                warn!(folder = %self.root.display(), "Background sync failed: {}", e);
                state.last_error = Some(e.to_string());
            }
        }
        match snapshot {
            Ok(known) => state.known = known,
            Err(e) => warn!(folder = %self.root.display(), "Post-sync scan failed: {}", e),
        }
    }

    /// Current folder signatures.
    async fn snapshot(&self) -> Result<Signatures> {
        let root = self.root.clone();
        let options: ScanOptions = self.sync.scan_options().clone();
        let files = tokio::task::spawn_blocking(move || scan_files(&root, &options))
            .await
            .map_err(|e| LoreError::internal(format!("scan task failed: {}", e)))??;

        Ok(files
            .into_iter()
            .map(|f| (f.path.display().to_string(), (f.mtime, f.size)))
            .collect())
    }

    /// New or modified files, or more missing files than the threshold.
    pub async fn detect_changes(&self) -> Result<bool> {
        let current = self.snapshot().await?;
        let state = self.state.lock().await;

        let changed = current
            .iter()
            .filter(|(path, sig)| state.known.get(*path) != Some(*sig))
            .count();
        let missing = state
            .known
            .keys()
            .filter(|path| !current.contains_key(*path))
            .count();

        if changed > 0 || missing > self.settings.deletion_threshold {
            debug!(changed, missing, "Folder changes detected");
            return Ok(true);
        }
        Ok(false)
    }

    /// One periodic check. Returns whether a full sync was started.
    pub async fn tick(self: &Arc<Self>) -> bool {
        {
            let mut state = self.state.lock().await;
            state.last_check = Some(Utc::now());
            if state.indexing() {
                return false;
            }
        }

        let changed = match self.detect_changes().await {
            Ok(changed) => changed,
            Err(e) => {
                warn!(folder = %self.root.display(), "Change check failed: {}", e);
                return false;
            }
        };
        if !changed {
            return false;
        }

        let throttled = {
            let state = self.state.lock().await;
            state
                .last_full_sync
                .is_some_and(|at| at.elapsed() < self.settings.min_resync_interval)
        };
        if throttled {
            debug!("Changes detected but the last full sync was too recent");
            return false;
        }

        self.schedule_full_sync().await
    }

    /// Periodic checks until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.check_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// Wait for a running sync to finish.
    pub async fn wait_idle(&self) {
        let task = self.state.lock().await.task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Background sync task ended abnormally: {}", e);
            }
        }
    }

    /// Abort a running sync.
    pub async fn stop(&self) {
        if let Some(task) = self.state.lock().await.task.take() {
            task.abort();
        }
    }

    pub async fn status(&self) -> MonitorStatus {
        let state = self.state.lock().await;
        MonitorStatus {
            folder: self.root.display().to_string(),
            indexing: state.indexing(),
            completed: state.completed,
            known_files: state.known.len(),
            last_check: state.last_check,
            last_full_sync: state.last_full_sync_at,
            last_error: state.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{fixtures, Session};
    use tempfile::TempDir;

    struct Fixture {
        _data: TempDir,
        folder: TempDir,
        session: Session,
    }

    impl Fixture {
        fn new() -> Self {
            let data = TempDir::new().unwrap();
            let folder = TempDir::new().unwrap();
            let write = |name: &str, text: &str| std::fs::write(folder.path().join(name), text);
            write("a.txt", "Owls hunt at night over open fields.").unwrap();
            write("b.txt", "Otters float on their backs to eat.").unwrap();
            let session = Session::open(fixtures::config(&data)).unwrap();
            Self {
                _data: data,
                folder,
                session,
            }
        }

        async fn monitor(&self, settings: MonitorSettings) -> Arc<IndexMonitor> {
            let sync = Arc::new(self.session.folder_sync(None).await.unwrap());
            let root = self.folder.path().canonicalize().unwrap();
            Arc::new(IndexMonitor::new(sync, root, settings))
        }
    }

    fn settings(min_resync: Duration, deletion_threshold: usize) -> MonitorSettings {
        MonitorSettings {
            check_interval: Duration::from_secs(60),
            min_resync_interval: min_resync,
            deletion_threshold,
        }
    }

    #[tokio::test]
    async fn test_empty_store_triggers_background_sync() {
        let fx = Fixture::new();
        let monitor = fx.monitor(settings(Duration::ZERO, 5)).await;

        monitor.start(fx.session.store().as_ref()).await.unwrap();
        monitor.wait_idle().await;

        let status = monitor.status().await;
        assert!(status.completed);
        assert!(!status.indexing);
        assert_eq!(status.known_files, 2);
        assert_eq!(fx.session.store().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_populated_store_skips_initial_sync() {
        let fx = Fixture::new();
        let monitor = fx.monitor(settings(Duration::ZERO, 5)).await;
        monitor.start(fx.session.store().as_ref()).await.unwrap();
        monitor.wait_idle().await;

        let again = fx.monitor(settings(Duration::ZERO, 5)).await;
        again.start(fx.session.store().as_ref()).await.unwrap();
        let status = again.status().await;
        assert!(status.completed);
        assert!(!status.indexing);
        assert!(status.last_full_sync.is_none());
        assert!(!again.detect_changes().await.unwrap());
    }

    #[tokio::test]
    async fn test_new_file_triggers_resync() {
        let fx = Fixture::new();
        let monitor = fx.monitor(settings(Duration::ZERO, 5)).await;
        monitor.start(fx.session.store().as_ref()).await.unwrap();
        monitor.wait_idle().await;

        assert!(!monitor.tick().await);

        let fox = "Foxes cache food for the winter months.";
        std::fs::write(fx.folder.path().join("c.txt"), fox).unwrap();
        assert!(monitor.tick().await);
        monitor.wait_idle().await;
        assert_eq!(fx.session.store().count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_resync_is_throttled() {
        let fx = Fixture::new();
        let monitor = fx.monitor(settings(Duration::from_secs(3600), 5)).await;
        monitor.start(fx.session.store().as_ref()).await.unwrap();
        monitor.wait_idle().await;

        let fox = "Foxes cache food for the winter months.";
        std::fs::write(fx.folder.path().join("c.txt"), fox).unwrap();
        assert!(monitor.detect_changes().await.unwrap());
        assert!(!monitor.tick().await);
    }

    #[tokio::test]
    async fn test_few_deletions_are_tolerated() {
        let fx = Fixture::new();
        let monitor = fx.monitor(settings(Duration::ZERO, 1)).await;
        monitor.start(fx.session.store().as_ref()).await.unwrap();
        monitor.wait_idle().await;

        std::fs::remove_file(fx.folder.path().join("a.txt")).unwrap();
        assert!(!monitor.detect_changes().await.unwrap());

        std::fs::remove_file(fx.folder.path().join("b.txt")).unwrap();
        assert!(monitor.detect_changes().await.unwrap());
    }
}
