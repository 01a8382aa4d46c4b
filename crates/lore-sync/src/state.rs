//! Persisted sync state: drive sync progress and crawl checkpoints.
//!
//! Files are JSON with camelCase keys. Every field has a default so a file
//! written by an older release still loads. Writes go to a temporary file
//! that is renamed over the target.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use lore_core::{LoreError, Result};

/// Whether a queued item is new or replaces earlier records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    Add,
    Update,
}

/// Last known state of one remote file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveFileState {
    pub name: String,
    pub mime_type: String,
    pub modified_time: String,

    /// Set once the file at `modified_time` has been handled.
    pub processed_at: Option<String>,

    /// Failure recorded when the file was handled, if any.
    pub last_error: Option<String>,
}

impl DriveFileState {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// One pending unit of drive work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub file_id: String,
    pub change: Change,
}

/// Drive sync progress, read and written once per processed file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveSyncState {
    pub file_metadata: BTreeMap<String, DriveFileState>,
    pub work_queue: Vec<WorkItem>,
    pub last_sync_time: Option<String>,
}

/// A URL waiting to be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: usize,
}

/// Resumable position of an interrupted crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrawlCheckpoint {
    pub seed: String,
    pub frontier: Vec<FrontierEntry>,
    /// Pages fetched but not yet indexed; fetched again on resume.
    pub held: Vec<FrontierEntry>,
    pub visited: Vec<String>,
    pub fetched: usize,
    pub saved_at: Option<String>,
}

/// Checkpoint file for a crawl of `host`.
pub fn checkpoint_path(state_dir: &Path, host: &str) -> PathBuf {
    let safe: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    state_dir.join(format!("crawl-{}.json", safe))
}

/// Load a state file, returning the default when it does not exist.
pub fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).map_err(|e| {
            LoreError::sync(format!("state file {} is unreadable: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write a state file through a temporary sibling and rename.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "State saved");
    Ok(())
}

/// Delete a state file if present.
pub fn remove_state(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let state: DriveSyncState = load_json(&dir.path().join("nope.json")).unwrap();
        assert_eq!(state, DriveSyncState::default());
    }

    #[test]
    fn test_missing_fields_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("drive.json");
        std::fs::write(
            &path,
            r#"{"fileMetadata": {"f1": {"modifiedTime": "2024-01-01T00:00:00Z"}},
                "somethingNew": 1}"#,
        )
        .unwrap();

        let state: DriveSyncState = load_json(&path).unwrap();
        let entry = &state.file_metadata["f1"];
        assert_eq!(entry.modified_time, "2024-01-01T00:00:00Z");
        assert!(!entry.is_processed());
        assert!(state.work_queue.is_empty());
        assert!(state.last_sync_time.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("drive.json");

        let mut state = DriveSyncState::default();
        state.work_queue.push(WorkItem {
            file_id: "f2".to_string(),
            change: Change::Update,
        });
        save_json(&path, &state).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"workQueue\""));
        assert!(text.contains("\"fileId\": \"f2\""));
        assert!(text.contains("\"change\": \"update\""));
        assert_eq!(load_json::<DriveSyncState>(&path).unwrap(), state);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_checkpoint_path_is_filesystem_safe() {
        let path = checkpoint_path(Path::new("/state"), "docs.example.com:8080");
        assert_eq!(path, PathBuf::from("/state/crawl-docs.example.com_8080.json"));
    }
}
