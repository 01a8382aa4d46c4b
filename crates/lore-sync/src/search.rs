//! Query engine over the vector store.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use lore_core::{keys, Metadata, Result, SearchResult, SearchResults, ServerConfig, VectorStore};
use lore_embed::EmbeddingQueue;

/// Configuration for search queries.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Maximum number of results to return.
    pub top_k: usize,

    /// Results below this score are dropped.
    pub min_score: Option<f32>,

    /// Characters of content kept in each snippet.
    pub snippet_chars: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: None,
            snippet_chars: 300,
        }
    }
}

impl QueryConfig {
    /// Defaults from the server section, `top_k` clamped to its maximum.
    pub fn from_server(config: &ServerConfig, top_k: Option<usize>) -> Self {
        Self {
            top_k: top_k
                .unwrap_or(config.default_top_k)
                .clamp(1, config.max_top_k.max(1)),
            min_score: None,
            snippet_chars: config.snippet_chars,
        }
    }
}

/// Embeds a query and ranks stored records against it.
///
/// Ranking is entirely the store's; the engine only shapes results.
pub struct SearchEngine {
    store: Arc<dyn VectorStore>,
    queue: Arc<EmbeddingQueue>,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn VectorStore>, queue: Arc<EmbeddingQueue>) -> Self {
        Self { store, queue }
    }

    pub async fn search(&self, query: &str, config: &QueryConfig) -> Result<SearchResults> {
        let start = Instant::now();
        info!("Searching for: {:?}", query);

        let vector = self.queue.embed_now(query).await?;
        let scored = self.store.query(&vector, config.top_k.max(1)).await?;
        debug!("Store returned {} results", scored.len());

        let results: Vec<SearchResult> = scored
            .into_iter()
            .filter(|doc| config.min_score.map_or(true, |min| doc.score >= min))
            .enumerate()
            .map(|(i, doc)| SearchResult {
                rank: i as u32 + 1,
                score: doc.score,
                source_ref: source_ref(&doc.metadata),
                snippet: doc.content.as_deref().map(|c| snippet(c, config.snippet_chars)),
                id: doc.id,
                metadata: doc.metadata,
            })
            .collect();

        let latency_ms = start.elapsed().as_millis() as u64;
        info!(
            "Search completed in {}ms, returned {} results",
            latency_ms,
            results.len()
        );

        Ok(SearchResults {
            query: query.to_string(),
            total_results: results.len(),
            latency_ms,
            results,
        })
    }
}

/// Path, URL or drive file id the record came from.
pub fn source_ref(metadata: &Metadata) -> Option<String> {
    [keys::FILE_PATH, keys::URL, keys::DRIVE_FILE_ID]
        .iter()
        .find_map(|key| metadata.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// First `max_chars` characters on a word boundary, whitespace collapsed.
pub fn snippet(content: &str, max_chars: usize) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let cut: String = collapsed.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(' ') {
        Some(pos) if pos > max_chars / 2 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}...", trimmed.trim_end())
}
