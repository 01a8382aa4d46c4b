//! lore-sync - Incremental sync engines for the lore index
//!
//! Every engine follows the same shape: enumerate the source, diff the
//! listing against what is already known, remove what disappeared and push
//! the rest through the shared [`Indexer`].
//!
//! # Engines
//!
//! - [`FolderSync`]: local folder, keyed by resolved path.
//! - [`CodeSync`]: source tree, keyed by path with an `(mtime, size)`
//!   signature, binary files skipped.
//! - [`DriveSync`]: remote drive, keyed by file id with `modifiedTime` as
//!   the signature; resumable through a persisted work queue.
//! - [`CrawlSync`]: breadth-first site crawl with boilerplate removal.
//!
//! [`ContinuousPipeline`] overlaps extraction with embedding for the
//! file-based engines, and [`SearchEngine`] answers queries.

mod code;
mod crawl;
mod dedup;
mod drive;
mod drive_client;
mod folder;
mod indexer;
mod pipeline;
mod scan;
mod search;
mod state;

#[cfg(test)]
mod testing;

pub use code::{language_for, looks_binary, CodeSync};
pub use crawl::{
    normalize_url, site_host, CrawlOptions, CrawlSync, FetchedPage, HttpFetcher, PageFetcher,
};
pub use dedup::DedupAnalyzer;
pub use drive::{DriveOptions, DriveSync};
pub use drive_client::{DriveClient, DriveFile, DrivePage, GoogleDriveClient, FOLDER_MIME};
pub use folder::{extract_file, FolderSync};
pub use indexer::{IndexOutcome, Indexer, ItemTally};
pub use pipeline::{ContinuousPipeline, PipelineItem, TaskReport, TaskSupervisor};
pub use scan::{resolve_root, scan_files, FileEntry, ScanOptions};
pub use search::{snippet, source_ref, QueryConfig, SearchEngine};
pub use state::{
    checkpoint_path, load_json, remove_state, save_json, Change, CrawlCheckpoint, DriveFileState,
    DriveSyncState, FrontierEntry, WorkItem,
};
