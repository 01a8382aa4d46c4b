//! Web crawl sync.
//!
//! Breadth-first walk from a seed URL, limited to the seed's host (a
//! leading `www.` is ignored), `max_depth` link hops and `max_pages`
//! fetches. Pages of one depth level are fetched in concurrent batches;
//! a page that fails or times out is recorded and the walk moves on.
//!
//! Outside refresh mode, URLs already in the store are treated as visited,
//! so a repeat crawl only fetches new pages. In refresh mode every page is
//! fetched again and the hash of its extracted text decides whether it is
//! unchanged or updated; pages a complete crawl no longer reaches are
//! removed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use lore_core::{
    diff, keys, ContentLedger, ContentType, CrawlConfig, DedupConfig, Document, ExtractOptions,
    ExtractSource, Extractor, IngestOptions, LoreError, Result, SourceKind, SyncSummary,
};
use lore_extract::parse_html;

use crate::dedup::DedupAnalyzer;
use crate::indexer::Indexer;
use crate::state::{
    checkpoint_path, load_json, remove_state, save_json, Change, CrawlCheckpoint, FrontierEntry,
};

/// Server-rendered page extensions that are worth following as HTML.
const PAGE_EXTENSIONS: &[&str] = &["php", "asp", "aspx", "jsp", "cgi", "shtml"];

/// A fetched response body.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: Url,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Fetches crawl pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage>;
}

/// Plain HTTP fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| LoreError::sync(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| LoreError::network(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoreError::Remote {
                status: status.as_u16(),
                message: url.to_string(),
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| LoreError::network(format!("{}: {}", url, e)))?;

        Ok(FetchedPage {
            url: final_url,
            content_type,
            body: body.to_vec(),
        })
    }
}

/// Resolved crawl settings.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_depth: usize,
    pub max_pages: usize,
    pub concurrency: usize,
    pub page_timeout: Duration,
    pub refresh: bool,
    pub state_dir: PathBuf,
    pub dedup: DedupConfig,
}

impl From<&CrawlConfig> for CrawlOptions {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            concurrency: config.concurrency.max(1),
            page_timeout: Duration::from_secs(config.page_timeout_secs.max(1)),
            refresh: config.refresh,
            state_dir: config.state_dir.clone(),
            dedup: config.dedup.clone(),
        }
    }
}

/// Canonical form used for ids and the visited set.
pub fn normalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// Host with any leading `www.` removed.
pub fn site_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

fn worth_following(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let Some(ext) = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
    else {
        return true;
    };
    ContentType::from_extension(&ext) != ContentType::Unknown
        || PAGE_EXTENSIONS.contains(&ext.as_str())
}

/// A page extracted and waiting to be indexed.
struct PendingPage {
    url: String,
    depth: usize,
    change: Change,
    documents: Vec<Document>,
}

/// Mutable state of one crawl run.
struct Walk {
    host: String,
    frontier: VecDeque<FrontierEntry>,
    visited: HashSet<String>,
    fetched: usize,
    reached: HashSet<String>,
    held: Vec<PendingPage>,
    dedup: Option<DedupAnalyzer>,
    summary: SyncSummary,
}

impl Walk {
    fn checkpoint(&self, seed: &str) -> CrawlCheckpoint {
        let mut visited: Vec<String> = self.visited.iter().cloned().collect();
        visited.sort();
        CrawlCheckpoint {
            seed: seed.to_string(),
            frontier: self.frontier.iter().cloned().collect(),
            held: self
                .held
                .iter()
                .map(|p| FrontierEntry {
                    url: p.url.clone(),
                    depth: p.depth,
                })
                .collect(),
            visited,
            fetched: self.fetched,
            saved_at: Some(Utc::now().to_rfc3339()),
        }
    }

    /// Entries at the front of the frontier sharing its depth.
    fn next_batch(&mut self, limit: usize) -> Vec<FrontierEntry> {
        let Some(depth) = self.frontier.front().map(|e| e.depth) else {
            return Vec::new();
        };
        let mut batch = Vec::new();
        while batch.len() < limit {
            match self.frontier.front() {
                Some(entry) if entry.depth == depth => {
                    if let Some(entry) = self.frontier.pop_front() {
                        batch.push(entry);
                    }
                }
                _ => break,
            }
        }
        batch
    }
}

/// Breadth-first site crawl into the index.
pub struct CrawlSync {
    fetcher: Arc<dyn PageFetcher>,
    indexer: Arc<Indexer>,
    extractor: Arc<dyn Extractor>,
    options: CrawlOptions,
    ingest: IngestOptions,
}

impl CrawlSync {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        indexer: Arc<Indexer>,
        extractor: Arc<dyn Extractor>,
        options: CrawlOptions,
        ingest: IngestOptions,
    ) -> Self {
        Self {
            fetcher,
            indexer,
            extractor,
            options,
            ingest,
        }
    }

    pub async fn sync(&self, seed: &str) -> Result<SyncSummary> {
        let seed_url = Url::parse(seed)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| LoreError::SourceNotFound {
                source_ref: seed.to_string(),
                remedy: "pass an absolute http(s) URL".to_string(),
            })?;
        let host = site_host(&seed_url).ok_or_else(|| LoreError::SourceNotFound {
            source_ref: seed.to_string(),
            remedy: "the URL has no host".to_string(),
        })?;
        let seed = normalize_url(&seed_url);

        let state_path = checkpoint_path(&self.options.state_dir, &host);
        let known = self.known_pages(&host).await?;
        let mut walk = self.start(&seed, &host, &known, &state_path)?;

        while walk.fetched < self.options.max_pages {
            let room = self.options.max_pages - walk.fetched;
            let batch = walk.next_batch(self.options.concurrency.min(room));
            if batch.is_empty() {
                break;
            }
            self.crawl_batch(&mut walk, batch, &known).await?;
            save_json(&state_path, &walk.checkpoint(&seed))?;
        }

        let truncated = !walk.frontier.is_empty();
        self.release_held(&mut walk, true).await;

        if self.options.refresh && !truncated {
            for url in known.keys().filter(|url| !walk.reached.contains(*url)) {
                match self.indexer.remove(keys::URL, url).await {
                    Ok(removed) => walk.summary.removed += removed,
                    Err(e) => walk.summary.record_error(url.clone(), e.to_string()),
                }
            }
        }

        if truncated {
            info!(remaining = walk.frontier.len(), "Crawl stopped at page limit");
            save_json(&state_path, &walk.checkpoint(&seed))?;
        } else {
            remove_state(&state_path)?;
        }

        let summary = walk.summary;
        self.indexer.finish(&summary).await?;
        info!(seed = %seed, pages = walk.fetched, "Crawl complete: {}", summary);
        Ok(summary)
    }

    /// Indexed crawl pages on `host`, with their page hash.
    async fn known_pages(&self, host: &str) -> Result<HashMap<String, String>> {
        let mut known = HashMap::new();
        for (_, metadata) in self.indexer.store().provenance(SourceKind::Crawl).await? {
            let Some(url) = metadata.get(keys::URL).and_then(|v| v.as_str()) else {
                continue;
            };
            let same_host = Url::parse(url)
                .ok()
                .and_then(|u| site_host(&u))
                .is_some_and(|h| h == host);
            if !same_host {
                continue;
            }
            let hash = metadata
                .get(keys::PAGE_HASH)
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            known.insert(url.to_string(), hash.to_string());
        }
        Ok(known)
    }

    fn start(
        &self,
        seed: &str,
        host: &str,
        known: &HashMap<String, String>,
        state_path: &std::path::Path,
    ) -> Result<Walk> {
        let checkpoint: CrawlCheckpoint = load_json(state_path)?;
        let dedup = self
            .options
            .dedup
            .enabled
            .then(|| DedupAnalyzer::new(self.options.dedup.clone()));

        let mut walk = Walk {
            host: host.to_string(),
            frontier: VecDeque::new(),
            visited: HashSet::new(),
            fetched: 0,
            reached: HashSet::new(),
            held: Vec::new(),
            dedup,
            summary: SyncSummary::new(),
        };

        let resumable = !checkpoint.frontier.is_empty() || !checkpoint.held.is_empty();
        if checkpoint.seed == seed && resumable {
            info!(
                seed = %seed,
                pending = checkpoint.frontier.len(),
                held = checkpoint.held.len(),
                fetched = checkpoint.fetched,
                "Resuming crawl"
            );
            // Held pages were never indexed; they go back to the front of
            // the frontier, which keeps depths in breadth-first order.
            let queued: HashSet<&String> = checkpoint
                .held
                .iter()
                .chain(&checkpoint.frontier)
                .map(|e| &e.url)
                .collect();
            walk.reached = checkpoint
                .visited
                .iter()
                .filter(|url| !queued.contains(url))
                .cloned()
                .collect();
            walk.visited = checkpoint.visited.iter().cloned().collect();
            walk.fetched = checkpoint.fetched.saturating_sub(checkpoint.held.len());
            walk.frontier = checkpoint
                .held
                .into_iter()
                .chain(checkpoint.frontier)
                .collect();
            return Ok(walk);
        }

        if !self.options.refresh {
            walk.visited.extend(known.keys().cloned());
        }
        walk.visited.insert(seed.to_string());
        walk.frontier.push_back(FrontierEntry {
            url: seed.to_string(),
            depth: 0,
        });
        Ok(walk)
    }

    async fn crawl_batch(
        &self,
        walk: &mut Walk,
        batch: Vec<FrontierEntry>,
        known: &HashMap<String, String>,
    ) -> Result<()> {
        let fetches = batch.iter().map(|entry| async move {
            let url = Url::parse(&entry.url)
                .map_err(|e| LoreError::sync(format!("invalid URL {}: {}", entry.url, e)))?;
            match tokio::time::timeout(self.options.page_timeout, self.fetcher.fetch(&url)).await {
                Ok(result) => result,
                Err(_) => Err(LoreError::Timeout {
                    operation: format!("fetch {}", url),
                    millis: self.options.page_timeout.as_millis() as u64,
                }),
            }
        });
        let results = join_all(fetches).await;

        let mut pages = Vec::new();
        let mut depths = HashMap::new();
        for (entry, result) in batch.into_iter().zip(results) {
            walk.fetched += 1;
            walk.reached.insert(entry.url.clone());
            match result {
                Ok(page) => match self.read_page(walk, &entry, page) {
                    Ok(Some(pending)) => {
                        depths.insert(entry.url.clone(), entry.depth);
                        pages.push((entry.url, pending));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(url = %entry.url, "Page extraction failed: {}", e);
                        walk.summary.record_error(entry.url, e.to_string());
                    }
                },
                Err(e) => {
                    warn!(url = %entry.url, "Page fetch failed: {}", e);
                    walk.summary.record_error(entry.url, e.to_string());
                }
            }
        }

        let current: Vec<(String, String)> = pages
            .iter()
            .map(|(url, (hash, _))| (url.clone(), hash.clone()))
            .collect();
        let batch_known: HashMap<String, String> = current
            .iter()
            .filter_map(|(url, _)| known.get(url).map(|hash| (url.clone(), hash.clone())))
            .collect();
        let plan = diff(&current, &batch_known);
        walk.summary.skipped += plan.unchanged.len();

        let adds: HashSet<&String> = plan.to_add.iter().collect();
        let updates: HashSet<&String> = plan.to_update.iter().collect();
        for (url, (_, documents)) in pages {
            let change = if adds.contains(&url) {
                Change::Add
            } else if updates.contains(&url) {
                Change::Update
            } else {
                continue;
            };
            walk.held.push(PendingPage {
                depth: depths.get(&url).copied().unwrap_or_default(),
                url,
                change,
                documents,
            });
        }

        self.release_held(walk, false).await;
        if let Err(e) = self.indexer.flush().await {
            warn!("Crawl flush failed: {}", e);
        }
        Ok(())
    }

    /// Extract a fetched page and queue its links. Returns the page hash
    /// and documents, or `None` when there is nothing to index.
    fn read_page(
        &self,
        walk: &mut Walk,
        entry: &FrontierEntry,
        page: FetchedPage,
    ) -> Result<Option<(String, Vec<Document>)>> {
        let content_type = match page.content_type.as_deref().map(ContentType::from_mime) {
            Some(ContentType::Unknown) | None => match ContentType::from_path(page.url.path()) {
                ContentType::Unknown => ContentType::Html,
                known => known,
            },
            Some(known) => known,
        };

        if content_type == ContentType::Html && entry.depth < self.options.max_depth {
            let html = String::from_utf8_lossy(&page.body);
            for href in parse_html(&html).links {
                let Ok(link) = page.url.join(href.trim()) else {
                    continue;
                };
                let same_host = site_host(&link).as_deref() == Some(walk.host.as_str());
                if !worth_following(&link) || !same_host {
                    continue;
                }
                let link = normalize_url(&link);
                if walk.visited.insert(link.clone()) {
                    walk.frontier.push_back(FrontierEntry {
                        url: link,
                        depth: entry.depth + 1,
                    });
                }
            }
        }

        if !self.extractor.supports(content_type) {
            debug!(url = %entry.url, ?content_type, "Unsupported page type");
            return Ok(None);
        }

        let options = ExtractOptions::new(SourceKind::Crawl, self.ingest.chunk_max_chars)
            .with_id_prefix(entry.url.clone())
            .with_meta(keys::URL, entry.url.clone())
            .with_meta(keys::DEPTH, entry.depth)
            .with_meta(keys::CRAWLED_AT, Utc::now().to_rfc3339());
        let mut documents = self.extractor.extract(
            ExtractSource::Bytes {
                name: &entry.url,
                data: &page.body,
                content_type,
            },
            &options,
        )?;
        if documents.is_empty() {
            return Ok(None);
        }

        let text: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let hash = ContentLedger::identify(&text.join("\n"));
        for doc in &mut documents {
            doc.metadata
                .insert(keys::PAGE_HASH.to_string(), hash.clone().into());
        }
        Ok(Some((hash, documents)))
    }

    /// Index held pages once boilerplate analysis is possible. Until the
    /// sample is full nothing is indexed; `end` forces analysis of what
    /// was collected.
    async fn release_held(&self, walk: &mut Walk, end: bool) {
        if walk.held.is_empty() {
            return;
        }

        if let Some(dedup) = walk.dedup.as_mut() {
            if !dedup.is_analyzed() {
                if walk.held.len() < dedup.sample_size() && !end {
                    return;
                }
                let sample: Vec<String> = walk
                    .held
                    .iter()
                    .map(|p| {
                        p.documents
                            .iter()
                            .map(|d| d.content.as_str())
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .collect();
                let found = dedup.analyze(&sample);
                info!(phrases = found, sample = sample.len(), "Boilerplate analysis done");
            }
        }

        for mut page in std::mem::take(&mut walk.held) {
            if let Some(dedup) = walk.dedup.as_ref() {
                for doc in &mut page.documents {
                    doc.content = dedup.clean(&doc.content);
                }
            }

            if page.change == Change::Update {
                if let Err(e) = self.indexer.remove(keys::URL, &page.url).await {
                    warn!(url = %page.url, "Failed to remove previous records: {}", e);
                    walk.summary.record_error(page.url, e.to_string());
                    continue;
                }
            }

            let tally = self.indexer.index_all(page.documents).await;
            match page.change {
                Change::Add => walk.summary.added += tally.indexed,
                Change::Update => walk.summary.updated += tally.indexed,
            }
            walk.summary.skipped += tally.skipped;
            for (id, e) in tally.errors {
                warn!(url = %page.url, id = %id, "Indexing failed: {}", e);
                walk.summary.record_error(id, e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::shared_indexer;
    use lore_core::LoreConfig;
    use lore_extract::TextExtractor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeSite {
        pages: Mutex<HashMap<String, String>>,
        fetches: AtomicUsize,
        /// A URL whose fetch never completes.
        stalled: Mutex<Option<String>>,
    }

    impl FakeSite {
        fn page(&self, url: &str, body: &str) {
            self.pages.lock().unwrap().insert(url.to_string(), body.to_string());
        }
    }

    #[async_trait]
    impl PageFetcher for FakeSite {
        async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let stalled = self.stalled.lock().unwrap().clone();
            if stalled.as_deref() == Some(url.as_str()) {
                std::future::pending::<()>().await;
            }
            let body = self
                .pages
                .lock()
                .unwrap()
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| LoreError::Remote {
                    status: 404,
                    message: url.to_string(),
                })?;
            Ok(FetchedPage {
                url: url.clone(),
                content_type: Some("text/html; charset=utf-8".to_string()),
                body: body.into_bytes(),
            })
        }
    }

    fn html(title: &str, body: &str, links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|l| format!("<a href=\"{}\">link</a> ", l))
            .collect();
        format!(
            "<html><head><title>{}</title></head><body><p>{}</p>{}</body></html>",
            title, body, anchors
        )
    }

    fn site() -> Arc<FakeSite> {
        let site = Arc::new(FakeSite::default());
        site.page(
            "https://example.com/",
            &html(
                "Home",
                "Welcome to the orchard guide.",
                &["/apples", "/pears#top", "https://other.org/x", "/logo.png"],
            ),
        );
        site.page(
            "https://example.com/apples",
            &html("Apples", "Apples ripen in early autumn.", &["/deep"]),
        );
        site.page(
            "https://example.com/pears",
            &html("Pears", "Pears are picked while still firm.", &["/"]),
        );
        site.page(
            "https://example.com/deep",
            &html("Deep", "This page sits two hops from the seed.", &[]),
        );
        site
    }

    struct Fixture {
        _dir: TempDir,
        options: CrawlOptions,
        indexer: Arc<Indexer>,
    }

    impl Fixture {
        fn new(max_depth: usize) -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = LoreConfig::default().crawl;
            config.max_depth = max_depth;
            config.state_dir = dir.path().to_path_buf();
            config.dedup.enabled = false;
            Self {
                options: CrawlOptions::from(&config),
                _dir: dir,
                indexer: shared_indexer(10),
            }
        }

        fn engine(&self, fetcher: Arc<FakeSite>, options: CrawlOptions) -> CrawlSync {
            CrawlSync::new(
                fetcher,
                self.indexer.clone(),
                Arc::new(TextExtractor::new()),
                options,
                LoreConfig::default().ingest_options(SourceKind::Crawl, Some(10)),
            )
        }
    }

    #[test]
    fn test_site_host_ignores_www() {
        let a = Url::parse("https://www.Example.com/a").unwrap();
        let b = Url::parse("https://example.com/b").unwrap();
        assert_eq!(site_host(&a), site_host(&b));
        assert!(!worth_following(&Url::parse("https://example.com/logo.png").unwrap()));
        assert!(worth_following(&Url::parse("https://example.com/index.php").unwrap()));
        assert!(!worth_following(&Url::parse("mailto:someone@example.com").unwrap()));
    }

    #[tokio::test]
    async fn test_crawl_respects_depth_and_host() {
        let fx = Fixture::new(1);
        let site = site();
        let summary = fx
            .engine(site.clone(), fx.options.clone())
            .sync("https://example.com/")
            .await
            .unwrap();

        assert_eq!(summary.added, 3);
        assert!(summary.errors.is_empty());
        assert_eq!(site.fetches.load(Ordering::SeqCst), 3);

        let ids: Vec<String> = fx
            .indexer
            .store()
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert!(ids.contains(&"https://example.com/pears".to_string()));
        assert!(!ids.iter().any(|id| id.contains("deep") || id.contains("other.org")));
    }

    #[tokio::test]
    async fn test_repeat_crawl_only_fetches_new_pages() {
        let fx = Fixture::new(2);
        let site = site();
        let first = fx
            .engine(site.clone(), fx.options.clone())
            .sync("https://example.com/")
            .await
            .unwrap();
        assert_eq!(first.added, 4);

        site.fetches.store(0, Ordering::SeqCst);
        let second = fx
            .engine(site.clone(), fx.options.clone())
            .sync("https://example.com/")
            .await
            .unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(site.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_updates_changed_and_removes_unreached() {
        let fx = Fixture::new(2);
        let site = site();
        fx.engine(site.clone(), fx.options.clone())
            .sync("https://example.com/")
            .await
            .unwrap();

        site.page(
            "https://example.com/apples",
            &html("Apples", "Apples are stored somewhere cool and dark.", &[]),
        );
        let refresh = CrawlOptions {
            refresh: true,
            ..fx.options.clone()
        };
        let summary = fx
            .engine(site.clone(), refresh)
            .sync("https://example.com/")
            .await
            .unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.removed, 1);

        let apples = fx
            .indexer
            .store()
            .get("https://example.com/apples")
            .await
            .unwrap()
            .unwrap();
        assert!(apples.content.unwrap().contains("cool and dark"));
        assert!(fx.indexer.store().get("https://example.com/deep").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_page_limit_leaves_checkpoint_to_resume() {
        let fx = Fixture::new(2);
        let site = site();
        let limited = CrawlOptions {
            max_pages: 2,
            concurrency: 1,
            ..fx.options.clone()
        };

        let first = fx
            .engine(site.clone(), limited.clone())
            .sync("https://example.com/")
            .await
            .unwrap();
        assert_eq!(first.added, 2);
        let path = checkpoint_path(&fx.options.state_dir, "example.com");
        let checkpoint: CrawlCheckpoint = load_json(&path).unwrap();
        assert_eq!(checkpoint.fetched, 2);
        assert!(!checkpoint.frontier.is_empty());

        let unlimited = CrawlOptions {
            max_pages: 100,
            ..limited
        };
        let second = fx
            .engine(site.clone(), unlimited)
            .sync("https://example.com/")
            .await
            .unwrap();
        assert_eq!(second.added, 2);
        assert!(!path.exists());
        assert_eq!(fx.indexer.store().count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_interrupted_crawl_resumes_pages_held_for_dedup() {
        let fx = Fixture::new(1);
        let site = Arc::new(FakeSite::default());
        site.page(
            "https://example.com/",
            &html("Home", "Field notes on garden birds.", &["/wren", "/robin", "/finch"]),
        );
        for (path, text) in [
            ("/wren", "Wrens nest in dense hedges."),
            ("/robin", "Robins sing through the winter."),
            ("/finch", "Finches crack seeds with short beaks."),
        ] {
            site.page(
                &format!("https://example.com{}", path),
                &html(path, text, &[]),
            );
        }
        *site.stalled.lock().unwrap() = Some("https://example.com/finch".to_string());

        let mut options = fx.options.clone();
        options.concurrency = 1;
        options.page_timeout = Duration::from_secs(60);
        options.dedup = DedupConfig {
            enabled: true,
            sample_size: 10,
            min_occurrences: 10,
            ..DedupConfig::default()
        };

        // Three pages are held waiting for a full sample when the fourth hangs.
        let interrupted = tokio::time::timeout(
            Duration::from_millis(500),
            fx.engine(site.clone(), options.clone()).sync("https://example.com/"),
        )
        .await;
        assert!(interrupted.is_err());
        assert_eq!(fx.indexer.store().count().await.unwrap(), 0);

        let path = checkpoint_path(&options.state_dir, "example.com");
        let checkpoint: CrawlCheckpoint = load_json(&path).unwrap();
        assert_eq!(checkpoint.held.len(), 3);
        assert_eq!(checkpoint.frontier.len(), 1);

        *site.stalled.lock().unwrap() = None;
        let summary = fx
            .engine(site.clone(), options)
            .sync("https://example.com/")
            .await
            .unwrap();

        assert_eq!(summary.added, 4);
        assert!(summary.errors.is_empty());
        assert_eq!(fx.indexer.store().count().await.unwrap(), 4);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_page_does_not_stop_crawl() {
        let fx = Fixture::new(1);
        let site = site();
        site.pages.lock().unwrap().remove("https://example.com/apples");

        let summary = fx
            .engine(site, fx.options.clone())
            .sync("https://example.com/")
            .await
            .unwrap();
        assert_eq!(summary.added, 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].key, "https://example.com/apples");
    }

    #[tokio::test]
    async fn test_boilerplate_is_removed_before_indexing() {
        let fx = Fixture::new(1);
        let banner = "Accept all cookies to continue browsing our site";
        let site = Arc::new(FakeSite::default());
        site.page(
            "https://example.com/",
            &html("Home", &format!("{} Seed page text.", banner), &["/a", "/b", "/c"]),
        );
        for (path, text) in [
            ("/a", "Alpha page discusses rivers."),
            ("/b", "Beta page discusses mountains."),
            ("/c", "Gamma page discusses deserts."),
        ] {
            site.page(
                &format!("https://example.com{}", path),
                &html(path, &format!("{} {}", banner, text), &[]),
            );
        }

        let mut options = fx.options.clone();
        options.dedup = DedupConfig {
            enabled: true,
            sample_size: 3,
            min_occurrences: 3,
            ..DedupConfig::default()
        };
        let summary = fx.engine(site, options).sync("https://example.com/").await.unwrap();
        assert_eq!(summary.added, 4);

        for record in fx.indexer.store().get_all().await.unwrap() {
            let content = record.content.unwrap();
            assert!(!content.contains("cookies"), "boilerplate left in {}", content);
        }
    }

    #[tokio::test]
    async fn test_invalid_seed_is_fatal() {
        let fx = Fixture::new(1);
        let err = fx
            .engine(site(), fx.options.clone())
            .sync("not a url")
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
