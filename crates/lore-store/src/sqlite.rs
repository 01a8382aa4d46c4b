//! SQLite-based vector store implementation.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use lore_core::{
    keys, validate_metadata, IndexRecord, LoreError, Metadata, Result, ScoredDocument, SourceKind,
    SupportsIndexing, VectorStore,
};

use crate::index::{cosine_similarity, top_k, VectorIndex};
use crate::schema::{SCHEMA, SCHEMA_VERSION};

const DEFAULT_WRITE_BUFFER: usize = 64;

/// SQLite-backed [`VectorStore`].
///
/// Writes are buffered in memory and written in one transaction when the
/// buffer fills or on [`VectorStore::flush`]. File-backed stores hold an
/// exclusive lock for their whole lifetime, so a second writer fails fast.
pub struct SqliteStore {
    /// Connection; `None` after close.
    conn: Mutex<Option<Connection>>,

    /// Vector length enforced on every write.
    dimension: usize,

    /// Display path for errors.
    path: String,

    /// Pending writes.
    buffer: Mutex<Vec<IndexRecord>>,

    /// Records buffered before an automatic flush.
    write_buffer: usize,

    /// In-memory search index, valid while `indexed` is set.
    index: RwLock<Option<VectorIndex>>,
    indexed: AtomicBool,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| LoreError::database(format!("Failed to open store: {}", e)))?;

        Self::init(conn, dimension, &path.display().to_string(), true)
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory(dimension: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LoreError::database(format!("Failed to open in-memory store: {}", e)))?;

        Self::init(conn, dimension, ":memory:", false)
    }

    /// Set how many records are buffered before an automatic flush.
    pub fn with_write_buffer(mut self, size: usize) -> Self {
        self.write_buffer = size.max(1);
        self
    }

    /// Override the page cache size (negative = KB, positive = pages).
    pub fn with_cache_size(self, cache_size: i32) -> Result<Self> {
        self.with_conn(|conn| {
            conn.pragma_update(None, "cache_size", cache_size)
                .map_err(|e| LoreError::database(format!("Failed to set cache size: {}", e)))
        })?;
        Ok(self)
    }

    fn init(conn: Connection, dimension: usize, path: &str, exclusive: bool) -> Result<Self> {
        if dimension == 0 {
            return Err(LoreError::config("store dimension must be greater than zero"));
        }

        Self::configure_connection(&conn, exclusive)?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| Self::map_open_error(e, path))?;

        if exclusive {
            // Take the write lock now; EXCLUSIVE mode keeps it until close.
            conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;")
                .map_err(|e| Self::map_open_error(e, path))?;
        }

        Self::check_dimension(&conn, dimension)?;

        info!(path = %path, dimension, "Store opened");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            dimension,
            path: path.to_string(),
            buffer: Mutex::new(Vec::new()),
            write_buffer: DEFAULT_WRITE_BUFFER,
            index: RwLock::new(None),
            indexed: AtomicBool::new(false),
        })
    }

    fn configure_connection(conn: &Connection, exclusive: bool) -> Result<()> {
        if exclusive {
            conn.execute_batch("PRAGMA locking_mode = EXCLUSIVE; PRAGMA busy_timeout = 250;")
                .map_err(|e| LoreError::database(format!("Failed to configure locking: {}", e)))?;
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| LoreError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    fn map_open_error(e: rusqlite::Error, path: &str) -> LoreError {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                LoreError::StoreLocked {
                    path: path.to_string(),
                }
            }
            _ => LoreError::database(format!("Failed to initialize schema: {}", e)),
        }
    }

    /// Record the dimension on first open, reject a different one afterwards.
    fn check_dimension(conn: &Connection, dimension: usize) -> Result<()> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimension'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LoreError::database(e.to_string()))?;

        match stored {
            Some(value) => {
                let expected: usize = value.parse().map_err(|_| {
                    LoreError::database(format!("corrupt stored dimension '{}'", value))
                })?;
                if expected != dimension {
                    return Err(LoreError::DimensionMismatch {
                        expected,
                        actual: dimension,
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value)
                     VALUES ('dimension', ?1), ('schema_version', ?2)",
                    params![dimension.to_string(), SCHEMA_VERSION.to_string()],
                )
                .map_err(|e| LoreError::database(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Path this store was opened at.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|e| LoreError::database(e.to_string()))?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| LoreError::database(format!("store {} is closed", self.path)))?;
        f(conn)
    }

    fn invalidate_index(&self) {
        self.indexed.store(false, Ordering::SeqCst);
    }

    /// Write every buffered record in one transaction.
    fn flush_buffer(&self) -> Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|e| LoreError::database(e.to_string()))?;
        if buffer.is_empty() {
            return Ok(());
        }

        let written = self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| LoreError::database(e.to_string()))?;
            let mut written = 0usize;
            {
                let mut conflict = tx
                    .prepare("SELECT id FROM records WHERE checksum = ?1 AND id != ?2")
                    .map_err(|e| LoreError::database(e.to_string()))?;
                let mut upsert = tx
                    .prepare(
                        r#"
                        INSERT INTO records (id, checksum, version, source, content, metadata,
                                             vector, created_at, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                        ON CONFLICT(id) DO UPDATE SET
                            checksum = excluded.checksum,
                            version = excluded.version,
                            source = excluded.source,
                            content = excluded.content,
                            metadata = excluded.metadata,
                            vector = excluded.vector,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .map_err(|e| LoreError::database(e.to_string()))?;

                let now = now_millis();
                for record in buffer.iter() {
                    let existing: Option<String> = conflict
                        .query_row(params![record.checksum, record.id], |row| row.get(0))
                        .optional()
                        .map_err(|e| LoreError::database(e.to_string()))?;
                    if let Some(existing) = existing {
                        debug!(
                            id = %record.id,
                            existing = %existing,
                            "Skipping write of duplicate checksum"
                        );
                        continue;
                    }

                    let metadata = serde_json::to_string(&record.metadata)?;
                    upsert
                        .execute(params![
                            record.id,
                            record.checksum,
                            record.version,
                            record.meta_str(keys::SOURCE),
                            record.content,
                            metadata,
                            vec_to_bytes(&record.vector),
                            now,
                        ])
                        .map_err(|e| {
                            LoreError::database(format!("Failed to write record: {}", e))
                        })?;
                    written += 1;
                }
            }
            tx.commit()
                .map_err(|e| LoreError::database(e.to_string()))?;
            Ok(written)
        })?;

        buffer.clear();
        debug!(written, "Flushed buffered records");
        Ok(())
    }

    fn buffered<F>(&self, f: F) -> Result<Option<String>>
    where
        F: Fn(&IndexRecord) -> bool,
    {
        let buffer = self
            .buffer
            .lock()
            .map_err(|e| LoreError::database(e.to_string()))?;
        Ok(buffer.iter().find(|r| f(r)).map(|r| r.id.clone()))
    }

    fn fetch_ids(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| LoreError::database(e.to_string()))?;
            let ids = stmt
                .query_map(params, |row| row.get::<_, String>(0))
                .map_err(|e| LoreError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LoreError::database(e.to_string()))?;
            Ok(ids)
        })
    }

    fn delete_ids(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| LoreError::database(e.to_string()))?;
            let mut deleted = 0;
            {
                let mut stmt = tx
                    .prepare("DELETE FROM records WHERE id = ?1")
                    .map_err(|e| LoreError::database(e.to_string()))?;
                for id in ids {
                    deleted += stmt
                        .execute(params![id])
                        .map_err(|e| LoreError::database(e.to_string()))?;
                }
            }
            tx.commit()
                .map_err(|e| LoreError::database(e.to_string()))?;
            Ok(deleted)
        })?;

        self.invalidate_index();
        debug!(deleted, "Deleted records");
        Ok(deleted)
    }

    /// Score every stored vector against `query` without the index.
    fn scan(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let scored = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, vector FROM records")
                .map_err(|e| LoreError::database(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let bytes: Vec<u8> = row.get(1)?;
                    Ok((id, bytes))
                })
                .map_err(|e| LoreError::database(e.to_string()))?;

            let mut scored = Vec::new();
            for row in rows {
                let (id, bytes) = row.map_err(|e| LoreError::database(e.to_string()))?;
                let vector = bytes_to_vec(&bytes);
                scored.push((id, cosine_similarity(query, &vector)));
            }
            Ok(scored)
        })?;
        Ok(top_k(scored, k))
    }

    /// Convert a row to an IndexRecord.
    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexRecord> {
        let metadata_str: String = row.get(4)?;
        let bytes: Vec<u8> = row.get(5)?;

        Ok(IndexRecord {
            id: row.get(0)?,
            checksum: row.get(1)?,
            version: row.get(2)?,
            content: row.get(3)?,
            metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
            vector: bytes_to_vec(&bytes),
        })
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn put(&self, record: IndexRecord) -> Result<()> {
        if record.vector.len() != self.dimension {
            return Err(LoreError::DimensionMismatch {
                expected: self.dimension,
                actual: record.vector.len(),
            });
        }
        validate_metadata(&record.metadata)?;

        let full = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|e| LoreError::database(e.to_string()))?;
            if buffer
                .iter()
                .any(|r| r.checksum == record.checksum && r.id != record.id)
            {
                debug!(id = %record.id, "Skipping buffered duplicate checksum");
                return Ok(());
            }
            buffer.retain(|r| r.id != record.id);
            buffer.push(record);
            buffer.len() >= self.write_buffer
        };

        self.invalidate_index();
        if full {
            self.flush_buffer()?;
        }
        Ok(())
    }

    async fn get_by_checksum(&self, checksum: &str) -> Result<Option<String>> {
        if let Some(id) = self.buffered(|r| r.checksum == checksum)? {
            return Ok(Some(id));
        }

        let checksum = checksum.to_string();
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM records WHERE checksum = ?1",
                params![checksum],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LoreError::database(e.to_string()))
        })
    }

    async fn get(&self, id: &str) -> Result<Option<IndexRecord>> {
        {
            let buffer = self
                .buffer
                .lock()
                .map_err(|e| LoreError::database(e.to_string()))?;
            if let Some(record) = buffer.iter().find(|r| r.id == id) {
                return Ok(Some(record.clone()));
            }
        }

        let id = id.to_string();
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, checksum, version, content, metadata, vector
                 FROM records WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()
            .map_err(|e| LoreError::database(e.to_string()))
        })
    }

    async fn get_all(&self) -> Result<Vec<IndexRecord>> {
        self.flush_buffer()?;
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, checksum, version, content, metadata, vector
                     FROM records ORDER BY id",
                )
                .map_err(|e| LoreError::database(e.to_string()))?;
            let records = stmt
                .query_map([], Self::row_to_record)
                .map_err(|e| LoreError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LoreError::database(e.to_string()))?;
            Ok(records)
        })
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        self.flush_buffer()?;
        self.delete_ids(ids)
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredDocument>> {
        if vector.len() != self.dimension {
            return Err(LoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.flush_buffer()?;

        let cached = {
            let index = self
                .index
                .read()
                .map_err(|e| LoreError::database(e.to_string()))?;
            if self.indexed.load(Ordering::SeqCst) {
                index.as_ref().map(|index| index.search(vector, top_k))
            } else {
                None
            }
        };
        let hits = match cached {
            Some(hits) => hits,
            None => self.scan(vector, top_k)?,
        };

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT content, metadata FROM records WHERE id = ?1")
                .map_err(|e| LoreError::database(e.to_string()))?;

            let mut results = Vec::with_capacity(hits.len());
            for (id, score) in hits {
                let row: Option<(Option<String>, String)> = stmt
                    .query_row(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()
                    .map_err(|e| LoreError::database(e.to_string()))?;
                if let Some((content, metadata)) = row {
                    results.push(ScoredDocument {
                        id,
                        score,
                        content,
                        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                    });
                }
            }
            Ok(results)
        })
    }

    async fn count(&self) -> Result<usize> {
        self.flush_buffer()?;
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
                .map_err(|e| LoreError::database(e.to_string()))?;
            Ok(count as usize)
        })
    }

    async fn count_by_source(&self) -> Result<Vec<(String, usize)>> {
        self.flush_buffer()?;
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT COALESCE(source, 'unknown'), COUNT(*)
                     FROM records GROUP BY 1 ORDER BY 1",
                )
                .map_err(|e| LoreError::database(e.to_string()))?;
            let counts = stmt
                .query_map([], |row| {
                    let source: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((source, count as usize))
                })
                .map_err(|e| LoreError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LoreError::database(e.to_string()))?;
            Ok(counts)
        })
    }

    async fn provenance(&self, source: SourceKind) -> Result<Vec<(String, Metadata)>> {
        self.flush_buffer()?;
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, metadata FROM records WHERE source = ?1 ORDER BY id")
                .map_err(|e| LoreError::database(e.to_string()))?;
            let rows = stmt
                .query_map(params![source.as_str()], |row| {
                    let id: String = row.get(0)?;
                    let metadata: String = row.get(1)?;
                    Ok((id, serde_json::from_str(&metadata).unwrap_or_default()))
                })
                .map_err(|e| LoreError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LoreError::database(e.to_string()))?;
            Ok(rows)
        })
    }

    async fn ids_for_metadata(&self, key: &str, value: &str) -> Result<Vec<String>> {
        self.flush_buffer()?;
        let path = json_path(key);
        self.fetch_ids(
            "SELECT id FROM records WHERE json_extract(metadata, ?1) = ?2 ORDER BY id",
            params![path, value],
        )
    }

    async fn delete_by_metadata(&self, key: &str, value: &str) -> Result<usize> {
        self.flush_buffer()?;
        let path = json_path(key);
        let ids = self.fetch_ids(
            "SELECT id FROM records WHERE json_extract(metadata, ?1) = ?2",
            params![path, value],
        )?;
        self.delete_ids(&ids)
    }

    async fn flush(&self) -> Result<()> {
        self.flush_buffer()
    }

    async fn close(&self) -> Result<()> {
        self.flush_buffer()?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| LoreError::database(e.to_string()))?
            .take();
        if let Some(conn) = conn {
            conn.close()
                .map_err(|(_, e)| LoreError::database(format!("Failed to close store: {}", e)))?;
            info!(path = %self.path, "Store closed");
        }
        Ok(())
    }

    fn as_indexing(&self) -> Option<&dyn SupportsIndexing> {
        Some(self)
    }
}

#[async_trait]
impl SupportsIndexing for SqliteStore {
    async fn build_index(&self) -> Result<()> {
        self.flush_buffer()?;

        let index = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, vector FROM records")
                .map_err(|e| LoreError::database(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let bytes: Vec<u8> = row.get(1)?;
                    Ok((id, bytes))
                })
                .map_err(|e| LoreError::database(e.to_string()))?;

            let mut index = VectorIndex::new();
            for row in rows {
                let (id, bytes) = row.map_err(|e| LoreError::database(e.to_string()))?;
                index.insert(id, bytes_to_vec(&bytes));
            }
            Ok(index)
        })?;

        let size = index.len();
        *self
            .index
            .write()
            .map_err(|e| LoreError::database(e.to_string()))? = Some(index);
        self.indexed.store(true, Ordering::SeqCst);
        debug!(size, "Built vector index");
        Ok(())
    }

    fn is_indexed(&self) -> bool {
        self.indexed.load(Ordering::SeqCst)
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush_buffer() {
            warn!(path = %self.path, "Failed to flush store on drop: {}", e);
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', ""))
}

/// Convert f32 vector to bytes (little-endian).
fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
