//! lore-store - SQLite vector store
//!
//! Records are keyed by id and unique by checksum. Vectors are stored as
//! little-endian f32 blobs and ranked by cosine similarity, either by a
//! scan over the table or through an in-memory index built on demand.

mod index;
mod schema;
mod sqlite;

pub use index::VectorIndex;
pub use sqlite::SqliteStore;

pub use schema::SCHEMA;
