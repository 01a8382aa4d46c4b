//! lore-extract - Text extraction
//!
//! This crate turns files and downloaded buffers into candidate documents.
//!
//! # Components
//!
//! - [`TextSplitter`]: Recursively splits long text using progressively
//!   smaller separators (sections, paragraphs, lines, sentences, words).
//!
//! - [`TextExtractor`]: The [`Extractor`] used by every sync engine.
//!   Dispatches on content type to the HTML, markdown and tabular readers
//!   and splits the result into documents.
//!
//! # Example
//!
//! ```rust
//! use lore_core::{ExtractOptions, ExtractSource, Extractor, ContentType, SourceKind};
//! use lore_extract::TextExtractor;
//!
//! let extractor = TextExtractor::new();
//! let options = ExtractOptions::new(SourceKind::Manual, 2000).with_id_prefix("note");
//! let docs = extractor
//!     .extract(
//!         ExtractSource::Bytes {
//!             name: "note.txt",
//!             data: b"Hello world",
//!             content_type: ContentType::PlainText,
//!         },
//!         &options,
//!     )
//!     .unwrap();
//! assert_eq!(docs.len(), 1);
//! ```

mod html;
mod markdown;
mod registry;
mod splitter;
mod tabular;

pub use html::{parse_html, HtmlPage};
pub use markdown::markdown_to_text;
pub use registry::TextExtractor;
pub use splitter::{Piece, TextSplitter};
pub use tabular::{csv_rows, json_records};

// Re-export types for convenience
pub use lore_core::{ContentType, ExtractOptions, ExtractSource, Extractor};
