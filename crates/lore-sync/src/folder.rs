//! Folder sync.
//!
//! The store is the record of which files are known: every folder record
//! carries its `filePath`. A file is identified by its resolved path alone,
//! so the plan only ever adds and deletes; re-adding an unchanged file is a
//! no-op through checksum dedup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use lore_core::{
    diff, keys, ExtractOptions, ExtractSource, Extractor, FolderConfig, IngestOptions, Result,
    SourceKind, SyncSummary,
};

use crate::indexer::Indexer;
use crate::pipeline::{ContinuousPipeline, PipelineItem};
use crate::scan::{resolve_root, scan_files, ScanOptions};
use crate::state::Change;

/// Incremental sync of one local folder.
pub struct FolderSync {
    indexer: Arc<Indexer>,
    extractor: Arc<dyn Extractor>,
    scan: ScanOptions,
    ingest: IngestOptions,
}

impl FolderSync {
    pub fn new(
        indexer: Arc<Indexer>,
        extractor: Arc<dyn Extractor>,
        config: &FolderConfig,
        ingest: IngestOptions,
    ) -> Self {
        Self {
            indexer,
            extractor,
            scan: ScanOptions {
                extensions: Some(config.extensions.iter().map(|e| e.to_lowercase()).collect()),
                ignored_dirs: config.ignored_dirs.clone(),
                ..Default::default()
            },
            ingest,
        }
    }

    /// Listing filters, shared with the server's change monitor.
    pub fn scan_options(&self) -> &ScanOptions {
        &self.scan
    }

    /// Bring the store in line with the folder's current contents.
    pub async fn sync(&self, root: &Path) -> Result<SyncSummary> {
        let root = resolve_root(root)?;
        let files = scan_files(&root, &self.scan)?;

        let current: Vec<(String, ())> = files
            .iter()
            .map(|f| (f.path.display().to_string(), ()))
            .collect();
        let known = self.known_files(&root).await?;
        let plan = diff(&current, &known);

        info!(
            root = %root.display(),
            files = current.len(),
            new = plan.to_add.len(),
            removed = plan.to_delete.len(),
            "Folder sync planned"
        );

        let mut summary = SyncSummary::new();
        summary.skipped += plan.unchanged.len();

        for path in &plan.to_delete {
            match self.indexer.remove(keys::FILE_PATH, path).await {
                Ok(removed) => summary.removed += removed,
                Err(e) => {
                    warn!(path = %path, "Failed to remove: {}", e);
                    summary.record_error(path.clone(), e.to_string());
                }
            }
        }

        let items: Vec<PipelineItem<PathBuf>> = plan
            .to_add
            .into_iter()
            .map(|key| PipelineItem {
                payload: PathBuf::from(&key),
                key,
                change: Change::Add,
            })
            .collect();

        let extractor = self.extractor.clone();
        let max_chars = self.ingest.chunk_max_chars;
        let pipeline = ContinuousPipeline::new(self.indexer.clone(), &self.ingest);
        let indexed = pipeline
            .run(items, move |path: &PathBuf| {
                extract_file(extractor.as_ref(), path, max_chars)
            })
            .await?;
        summary.merge(indexed);

        self.indexer.finish(&summary).await?;
        info!(root = %root.display(), "Folder sync complete: {}", summary);
        Ok(summary)
    }

    /// Paths under `root` that already have records.
    async fn known_files(&self, root: &Path) -> Result<HashMap<String, ()>> {
        let prefix = root.display().to_string();
        Ok(self
            .indexer
            .store()
            .provenance(SourceKind::Folder)
            .await?
            .into_iter()
            .filter_map(|(_, metadata)| {
                metadata
                    .get(keys::FILE_PATH)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .filter(|path| Path::new(path).starts_with(&prefix))
            .map(|path| (path, ()))
            .collect())
    }
}

/// Extract one file with folder provenance attached.
pub fn extract_file(
    extractor: &dyn Extractor,
    path: &Path,
    max_chars: usize,
) -> Result<Vec<lore_core::Document>> {
    let path_str = path.display().to_string();
    let mut options = ExtractOptions::new(SourceKind::Folder, max_chars)
        .with_id_prefix(path_str.clone())
        .with_meta(keys::FILE_PATH, path_str);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        options = options.with_meta(keys::FILE_NAME, name);
    }
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        options = options.with_meta(keys::EXTENSION, ext.to_lowercase());
    }
    extractor.extract(ExtractSource::Path(path), &options)
}
