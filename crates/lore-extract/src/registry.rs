//! Content-type dispatch from a file or buffer to documents.

use std::borrow::Cow;

use tracing::debug;

use lore_core::{
    keys, ContentType, Document, ExtractOptions, ExtractSource, Extractor, LoreError, Metadata,
    Result,
};

use crate::html::parse_html;
use crate::markdown::markdown_to_text;
use crate::splitter::{Piece, TextSplitter};
use crate::tabular::{csv_rows, json_records};

/// Extractor for every text-like format lore understands.
///
/// - HTML: visible text, `<title>` recorded as metadata
/// - Markdown: rendered text, first heading as title
/// - CSV / JSON: one document per row or array element
/// - Code and plain text: split as-is, code pieces carry line spans
#[derive(Debug, Clone, Default)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn documents(
        &self,
        prefix: &str,
        title: Option<&str>,
        text: &str,
        content_type: ContentType,
        options: &ExtractOptions,
    ) -> Vec<Document> {
        let pieces = TextSplitter::new(options.max_chars).split(text, content_type);
        let single = pieces.len() == 1;

        pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let id = if single {
                    prefix.to_string()
                } else {
                    format!("{}#{}", prefix, i)
                };
                let mut doc = Document {
                    id,
                    content: String::new(),
                    metadata: base_metadata(options),
                }
                .with_meta(keys::CHUNK_INDEX, i as u64);
                if let Some(title) = title {
                    doc = doc.with_meta(keys::TITLE, title);
                }
                if content_type.is_code() {
                    doc = with_lines(doc, &piece);
                }
                doc.content = piece.content;
                doc
            })
            .collect()
    }

    fn rows(&self, prefix: &str, rows: Vec<String>, options: &ExtractOptions) -> Vec<Document> {
        let splitter = TextSplitter::new(options.max_chars);
        let mut docs = Vec::with_capacity(rows.len());

        for (row, text) in rows.into_iter().enumerate() {
            let pieces = splitter.split(&text, ContentType::PlainText);
            let single = pieces.len() == 1;
            for (i, piece) in pieces.into_iter().enumerate() {
                let id = if single {
                    format!("{}#row-{}", prefix, row)
                } else {
                    format!("{}#row-{}.{}", prefix, row, i)
                };
                docs.push(
                    Document {
                        id,
                        content: piece.content,
                        metadata: base_metadata(options),
                    }
                    .with_meta(keys::ROW_INDEX, row as u64)
                    .with_meta(keys::CHUNK_INDEX, i as u64),
                );
            }
        }
        docs
    }
}

fn base_metadata(options: &ExtractOptions) -> Metadata {
    let mut metadata = options.base_metadata.clone();
    metadata.insert(keys::SOURCE.to_string(), options.source.as_str().into());
    metadata
}

/// Attribute a parser error to the item being extracted.
fn named(name: &str, err: LoreError) -> LoreError {
    match err {
        LoreError::Extraction { reason, .. } => LoreError::extraction(name, reason),
        other => other,
    }
}

fn with_lines(doc: Document, piece: &Piece) -> Document {
    doc.with_meta(keys::START_LINE, piece.start_line)
        .with_meta(keys::END_LINE, piece.end_line)
}

impl Extractor for TextExtractor {
    fn supports(&self, content_type: ContentType) -> bool {
        content_type != ContentType::Unknown
    }

    fn extract(
        &self,
        source: ExtractSource<'_>,
        options: &ExtractOptions,
    ) -> Result<Vec<Document>> {
        let name = source.name();
        let content_type = source.content_type();
        if !self.supports(content_type) {
            return Err(LoreError::Unsupported { item: name });
        }

        let raw: Cow<'_, [u8]> = match source {
            ExtractSource::Path(path) => Cow::Owned(
                std::fs::read(path).map_err(|e| LoreError::extraction(&name, e.to_string()))?,
            ),
            ExtractSource::Bytes { data, .. } => Cow::Borrowed(data),
        };
        let text = String::from_utf8_lossy(&raw);
        let prefix = options.id_prefix.clone().unwrap_or_else(|| name.clone());

        let docs = match content_type {
            ContentType::Csv => {
                let rows = csv_rows(&text).map_err(|e| named(&name, e))?;
                self.rows(&prefix, rows, options)
            }
            ContentType::Json => {
                let rows = json_records(&text).map_err(|e| named(&name, e))?;
                self.rows(&prefix, rows, options)
            }
            ContentType::Html => {
                let page = parse_html(&text);
                self.documents(&prefix, page.title.as_deref(), &page.text, content_type, options)
            }
            ContentType::Markdown => {
                let (title, body) = markdown_to_text(&text);
                self.documents(&prefix, title.as_deref(), &body, content_type, options)
            }
            other => self.documents(&prefix, None, &text, other, options),
        };

        debug!(item = %name, documents = docs.len(), "Extracted");
        Ok(docs)
    }
}
