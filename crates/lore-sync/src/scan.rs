//! Recursive directory listing shared by the folder and code engines and
//! the server's change monitor.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use lore_core::{LoreError, Result};

/// A listed file with its change signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    pub size: u64,
}

/// Listing filters.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Lowercase extensions without the dot; `None` accepts every file.
    pub extensions: Option<Vec<String>>,

    /// Directory names never descended into.
    pub ignored_dirs: Vec<String>,

    pub max_depth: Option<usize>,

    /// Files larger than this are left out.
    pub max_file_size: Option<u64>,
}

impl ScanOptions {
    fn is_ignored(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.ignored_dirs.iter().any(|d| *d == name)
    }

    fn accepts(&self, path: &Path) -> bool {
        match &self.extensions {
            None => true,
            Some(allowed) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
                .unwrap_or(false),
        }
    }
}

/// Existing directory, canonicalized, or a configuration error.
pub fn resolve_root(root: &Path) -> Result<PathBuf> {
    if !root.is_dir() {
        return Err(LoreError::SourceNotFound {
            source_ref: root.display().to_string(),
            remedy: "pass an existing directory".to_string(),
        });
    }
    Ok(root.canonicalize()?)
}

/// List files under `root`, sorted by path.
///
/// Unreadable entries below the root are logged and skipped; failing to
/// read the root itself is an enumeration error.
pub fn scan_files(root: &Path, options: &ScanOptions) -> Result<Vec<FileEntry>> {
    let mut walker = WalkDir::new(root).follow_links(false);
    if let Some(depth) = options.max_depth {
        walker = walker.max_depth(depth);
    }

    let mut files = Vec::new();
    for entry in walker.into_iter().filter_entry(|e| !options.is_ignored(e)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(LoreError::Enumeration {
                    source_ref: root.display().to_string(),
                    message: e.to_string(),
                })
            }
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !options.accepts(entry.path()) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %entry.path().display(), "Skipping file: {}", e);
                continue;
            }
        };
        if options.max_file_size.is_some_and(|max| metadata.len() > max) {
            continue;
        }

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);

        files.push(FileEntry {
            path: entry.into_path(),
            mtime,
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
