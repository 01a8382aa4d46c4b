//! Code-tree sync.
//!
//! Walks a source tree with depth and size limits, skips files that look
//! binary and tags each record with a best-effort language. The change
//! signature is `(mtime, size)`, read back from record metadata.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use lore_core::{
    diff, keys, CodeConfig, ContentType, Document, ExtractOptions, ExtractSource, Extractor,
    IngestOptions, Result, SourceKind, SyncSummary,
};

use crate::indexer::Indexer;
use crate::pipeline::{ContinuousPipeline, PipelineItem};
use crate::scan::{resolve_root, scan_files, FileEntry, ScanOptions};
use crate::state::Change;

/// Bytes inspected when deciding whether a file is binary.
const SNIFF_BYTES: usize = 8192;

/// Best-effort language name for a path.
pub fn language_for(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_str()?;
    let by_name = match name {
        "Dockerfile" | "Containerfile" => Some("dockerfile"),
        "Makefile" | "GNUmakefile" | "makefile" => Some("make"),
        "CMakeLists.txt" => Some("cmake"),
        "Gemfile" | "Rakefile" | "Podfile" => Some("ruby"),
        "Jenkinsfile" => Some("groovy"),
        "BUILD" | "WORKSPACE" | "BUILD.bazel" => Some("starlark"),
        ".bashrc" | ".zshrc" | ".profile" => Some("shell"),
        _ => None,
    };
    if by_name.is_some() {
        return by_name;
    }

    let ext = path.extension()?.to_str()?.to_lowercase();
    Some(match ext.as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "swift" => "swift",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hxx" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "lua" => "lua",
        "sh" | "bash" | "zsh" => "shell",
        "sql" => "sql",
        "html" | "htm" => "html",
        "css" | "scss" | "sass" => "css",
        "md" | "markdown" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "proto" => "protobuf",
        "ex" | "exs" => "elixir",
        "hs" => "haskell",
        "zig" => "zig",
        "dart" => "dart",
        "vue" => "vue",
        "svelte" => "svelte",
        _ => return None,
    })
}

/// Null bytes or invalid UTF-8 in the leading bytes.
pub fn looks_binary(sample: &[u8]) -> bool {
    if sample.contains(&0) {
        return true;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => false,
        // A multi-byte character cut off by the sample window is fine.
        Err(e) => e.error_len().is_some(),
    }
}

fn sniff(path: &Path) -> std::io::Result<bool> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; SNIFF_BYTES];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(looks_binary(&buf[..filled]))
}

/// Incremental sync of a source tree.
pub struct CodeSync {
    indexer: Arc<Indexer>,
    extractor: Arc<dyn Extractor>,
    scan: ScanOptions,
    include_binary: bool,
    ingest: IngestOptions,
}

impl CodeSync {
    pub fn new(
        indexer: Arc<Indexer>,
        extractor: Arc<dyn Extractor>,
        config: &CodeConfig,
        ingest: IngestOptions,
    ) -> Self {
        Self {
            indexer,
            extractor,
            scan: ScanOptions {
                extensions: None,
                ignored_dirs: config.ignored_dirs.clone(),
                max_depth: Some(config.max_depth),
                max_file_size: Some(config.max_file_size),
            },
            include_binary: config.include_binary,
            ingest,
        }
    }

    pub async fn sync(&self, root: &Path) -> Result<SyncSummary> {
        let root = resolve_root(root)?;
        let files = scan_files(&root, &self.scan)?;

        let mut summary = SyncSummary::new();
        let mut listed: HashMap<String, FileEntry> = HashMap::new();
        for file in files {
            if !self.include_binary {
                match sniff(&file.path) {
                    Ok(true) => {
                        debug!(path = %file.path.display(), "Skipping binary file");
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        summary.record_error(file.path.display().to_string(), e.to_string());
                        continue;
                    }
                }
            }
            listed.insert(file.path.display().to_string(), file);
        }

        let mut current: Vec<(String, (i64, u64))> = listed
            .iter()
            .map(|(key, f)| (key.clone(), (f.mtime, f.size)))
            .collect();
        current.sort();
        let known = self.known_files(&root).await?;
        let plan = diff(&current, &known);

        info!(
            root = %root.display(),
            files = current.len(),
            new = plan.to_add.len(),
            changed = plan.to_update.len(),
            removed = plan.to_delete.len(),
            "Code sync planned"
        );

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

        let mut items = Vec::with_capacity(plan.pending_len());
        let groups = [(plan.to_add, Change::Add), (plan.to_update, Change::Update)];
        for (keys_in_plan, change) in groups {
            for key in keys_in_plan {
                if let Some(entry) = listed.remove(&key) {
                    items.push(PipelineItem {
                        key,
                        change,
                        payload: entry,
                    });
                }
            }
        }

        let extractor = self.extractor.clone();
        let max_chars = self.ingest.chunk_max_chars;
        let pipeline =
            ContinuousPipeline::new(self.indexer.clone(), &self.ingest).replacing(keys::FILE_PATH);
        let indexed = pipeline
            .run(items, move |entry: &FileEntry| {
                extract_source_file(extractor.as_ref(), entry, max_chars)
            })
            .await?;
        summary.merge(indexed);

        self.indexer.finish(&summary).await?;
        info!(root = %root.display(), "Code sync complete: {}", summary);
        Ok(summary)
    }

    /// `(mtime, size)` per known path under `root`.
    async fn known_files(&self, root: &Path) -> Result<HashMap<String, (i64, u64)>> {
        let mut known = HashMap::new();
        for (_, metadata) in self.indexer.store().provenance(SourceKind::Code).await? {
            let Some(path) = metadata.get(keys::FILE_PATH).and_then(|v| v.as_str()) else {
                continue;
            };
            if !Path::new(path).starts_with(root) {
                continue;
            }
            let mtime = metadata.get(keys::MTIME).and_then(|v| v.as_i64()).unwrap_or(0);
            let size = metadata.get(keys::SIZE).and_then(|v| v.as_u64()).unwrap_or(0);
            known.insert(path.to_string(), (mtime, size));
        }
        Ok(known)
    }
}

fn extract_source_file(
    extractor: &dyn Extractor,
    entry: &FileEntry,
    max_chars: usize,
) -> Result<Vec<Document>> {
    let path = &entry.path;
    let path_str = path.display().to_string();
    let data = std::fs::read(path)?;

    let content_type = match ContentType::from_path(path) {
        ContentType::Unknown => ContentType::PlainText,
        known => known,
    };

    let mut options = ExtractOptions::new(SourceKind::Code, max_chars)
        .with_id_prefix(path_str.clone())
        .with_meta(keys::FILE_PATH, path_str.clone())
        .with_meta(keys::MTIME, entry.mtime)
        .with_meta(keys::SIZE, entry.size);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        options = options.with_meta(keys::FILE_NAME, name);
    }
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        options = options.with_meta(keys::EXTENSION, ext.to_lowercase());
    }
    if let Some(language) = language_for(path) {
        options = options.with_meta(keys::LANGUAGE, language);
    }

    extractor.extract(
        ExtractSource::Bytes {
            name: &path_str,
            data: &data,
            content_type,
        },
        &options,
    )
}
