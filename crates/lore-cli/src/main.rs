//! lore CLI - Command-line interface for the lore semantic index.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lore_core::{keys, LoreConfig, SourceKind, SyncSummary};
use lore_server::{serve_stdio, LoreServer, Session};
use lore_sync::{
    extract_file, CodeSync, CrawlOptions, CrawlSync, DriveOptions, DriveSync, GoogleDriveClient,
    HttpFetcher,
};

/// Timeout for drive API calls.
const DRIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// lore - Local incremental semantic index
#[derive(Parser)]
#[command(name = "lore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/lore/config.toml, then ./lore.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store path, overriding the configuration
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and create the store
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Add one file to the index
    Add {
        path: PathBuf,

        /// Minimum content length, overriding the configuration
        #[arg(long)]
        min_length: Option<usize>,
    },

    /// Search the index
    Query {
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Drop results scoring below this
        #[arg(long)]
        min_score: Option<f32>,
    },

    /// Sync a local folder
    Sync {
        folder: PathBuf,

        #[arg(long)]
        min_length: Option<usize>,
    },

    /// Crawl a website from a seed URL
    Crawl {
        url: String,

        /// Maximum link hops from the seed
        #[arg(long)]
        depth: Option<usize>,

        #[arg(long)]
        max_pages: Option<usize>,

        /// Pages fetched at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Re-fetch indexed pages and update the ones that changed
        #[arg(long)]
        refresh: bool,

        /// Skip boilerplate phrase removal
        #[arg(long)]
        no_dedup: bool,

        #[arg(long)]
        min_length: Option<usize>,
    },

    /// Sync a remote drive folder
    DriveSync {
        /// Root folder id, overriding the configuration
        #[arg(long)]
        folder_id: Option<String>,

        /// Files processed in this invocation
        #[arg(long)]
        max_files: Option<usize>,

        /// Process exactly one file
        #[arg(long)]
        incremental: bool,

        #[arg(long)]
        min_length: Option<usize>,
    },

    /// Sync a source tree
    CodeSync {
        path: PathBuf,

        /// Index files that look binary
        #[arg(long)]
        include_binary: bool,

        #[arg(long)]
        max_depth: Option<usize>,

        #[arg(long)]
        min_length: Option<usize>,
    },

    /// Re-embed records produced by another model or tool version
    Reembed {
        /// Re-embed every record
        #[arg(long)]
        all: bool,
    },

    /// Remove records
    Clear {
        /// Only records from this source
        #[arg(long, value_enum)]
        source: Option<SourceArg>,
    },

    /// Show record counts
    Stats,

    /// Run the line-delimited JSON server on stdin/stdout
    Serve {
        /// Folder to keep indexed in the background
        #[arg(long)]
        folder: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Folder,
    Drive,
    Crawl,
    Code,
    Manual,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Folder => SourceKind::Folder,
            SourceArg::Drive => SourceKind::Drive,
            SourceArg::Crawl => SourceKind::Crawl,
            SourceArg::Code => SourceKind::Code,
            SourceArg::Manual => SourceKind::Manual,
        }
    }
}

fn setup_logging(verbose: bool, serving: bool) {
    let level = if verbose {
        Level::DEBUG
    } else if serving {
        Level::INFO
    } else {
        Level::WARN
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(cli: &Cli) -> Result<LoreConfig, Box<dyn std::error::Error>> {
    let creating = matches!(cli.command, Commands::Init { .. })
        && cli.config.as_deref().is_some_and(|p| !p.exists());
    let mut config = if creating {
        LoreConfig::default()
    } else {
        LoreConfig::load_default(cli.config.as_deref())?
    };
    if let Some(database) = &cli.database {
        config.store.path = database.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, matches!(cli.command, Commands::Serve { .. }));

    let mut config = load_config(&cli)?;

    if let Commands::Init { force } = cli.command {
        return init(cli.config.as_deref(), &config, force).await;
    }
    if let Commands::Serve { folder: Some(folder) } = &cli.command {
        config.server.folder = Some(folder.clone());
    }

    let session = Arc::new(Session::open(config)?);
    let result = run(&session, cli.command).await;

    if let Err(e) = session.close().await {
        eprintln!("Failed to close store: {}", e);
    }
    result
}

async fn run(
    session: &Arc<Session>,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = session.config();

    match command {
        Commands::Init { .. } => {}
        Commands::Add { path, min_length } => {
            let summary = add(session, &path, min_length).await?;
            print_summary(&summary);
        }
        Commands::Query {
            query,
            top_k,
            min_score,
        } => {
            let mut query_config = session.query_config(top_k);
            query_config.min_score = min_score;
            let results = session
                .search_engine()
                .await?
                .search(&query, &query_config)
                .await?;

            println!(
                "Found {} results in {}ms:\n",
                results.total_results, results.latency_ms
            );
            for result in results.results {
                println!(
                    "---\n[{}] {} (score: {:.3})",
                    result.rank,
                    result.source_ref.as_deref().unwrap_or(&result.id),
                    result.score
                );
                if let Some(snippet) = result.snippet {
                    println!("{}\n", snippet);
                }
            }
        }
        Commands::Sync { folder, min_length } => {
            let summary = session.folder_sync(min_length).await?.sync(&folder).await?;
            print_summary(&summary);
        }
        Commands::Crawl {
            url,
            depth,
            max_pages,
            concurrency,
            refresh,
            no_dedup,
            min_length,
        } => {
            let mut options = CrawlOptions::from(&config.crawl);
            options.max_depth = depth.unwrap_or(options.max_depth);
            options.max_pages = max_pages.unwrap_or(options.max_pages);
            options.concurrency = concurrency.unwrap_or(options.concurrency).max(1);
            options.refresh |= refresh;
            options.dedup.enabled &= !no_dedup;

            let fetcher = Arc::new(HttpFetcher::new(
                &config.crawl.user_agent,
                options.page_timeout,
            )?);
            let crawl = CrawlSync::new(
                fetcher,
                session.indexer(SourceKind::Crawl, min_length).await?,
                session.extractor(),
                options,
                config.ingest_options(SourceKind::Crawl, min_length),
            );
            print_summary(&crawl.sync(&url).await?);
        }
        Commands::DriveSync {
            folder_id,
            max_files,
            incremental,
            min_length,
        } => {
            let mut drive_config = config.drive.clone();
            if folder_id.is_some() {
                drive_config.folder_id = folder_id;
            }
            if max_files.is_some() {
                drive_config.max_files = max_files;
            }
            drive_config.incremental |= incremental;

            let options = DriveOptions::from_config(&drive_config)?;
            let client = Arc::new(GoogleDriveClient::from_config(&drive_config, DRIVE_TIMEOUT)?);
            let drive = DriveSync::new(
                client,
                session.indexer(SourceKind::Drive, min_length).await?,
                session.extractor(),
                options,
                config.ingest_options(SourceKind::Drive, min_length),
            );
            print_summary(&drive.sync().await?);
        }
        Commands::CodeSync {
            path,
            include_binary,
            max_depth,
            min_length,
        } => {
            let mut code_config = config.code.clone();
            code_config.include_binary |= include_binary;
            code_config.max_depth = max_depth.unwrap_or(code_config.max_depth);

            let code = CodeSync::new(
                session.indexer(SourceKind::Code, min_length).await?,
                session.extractor(),
                &code_config,
                config.ingest_options(SourceKind::Code, min_length),
            );
            print_summary(&code.sync(&path).await?);
        }
        Commands::Reembed { all } => {
            let indexer = session.indexer(SourceKind::Manual, None).await?;
            print_summary(&indexer.reembed(all).await?);
        }
        Commands::Clear { source } => {
            let store = session.store();
            let removed = match source {
                Some(source) => {
                    let kind = SourceKind::from(source);
                    store.delete_by_metadata(keys::SOURCE, kind.as_str()).await?
                }
                None => {
                    let ids: Vec<String> =
                        store.get_all().await?.into_iter().map(|r| r.id).collect();
                    store.delete_by_ids(&ids).await?
                }
            };
            println!("Removed {} records", removed);
        }
        Commands::Stats => {
            let store = session.store();
            println!("Store: {}", session.store_path());
            println!("- Records: {}", store.count().await?);
            println!("- Dimension: {}", store.dimension());
            for (source, count) in store.count_by_source().await? {
                println!("- {}: {}", source, count);
            }
        }
        Commands::Serve { .. } => {
            let server = Arc::new(LoreServer::new(session.clone()).await?);
            serve_stdio(server).await?;
        }
    }

    Ok(())
}

async fn init(
    explicit: Option<&Path>,
    config: &LoreConfig,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => dirs::config_dir()
            .ok_or("could not determine the configuration directory")?
            .join("lore")
            .join("config.toml"),
    };

    if path.exists() && !force {
        println!("Configuration already exists at: {}", path.display());
    } else {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, config.to_toml()?)?;
        println!("Wrote configuration to: {}", path.display());
    }

    let session = Session::open(config.clone())?;
    println!("Initialized store at: {}", session.store_path());
    session.close().await?;
    Ok(())
}

/// Index one file, or sync a directory.
async fn add(
    session: &Session,
    path: &Path,
    min_length: Option<usize>,
) -> Result<SyncSummary, Box<dyn std::error::Error>> {
    if path.is_dir() {
        return Ok(session.folder_sync(min_length).await?.sync(path).await?);
    }

    let path = path.canonicalize()?;
    let options = session.config().ingest_options(SourceKind::Folder, min_length);
    let documents = extract_file(session.extractor().as_ref(), &path, options.chunk_max_chars)?;
    let indexer = session.indexer(SourceKind::Folder, min_length).await?;

    let mut summary = SyncSummary::new();
    let tally = indexer.index_all(documents).await;
    summary.added = tally.indexed;
    summary.skipped = tally.skipped;
    for (id, e) in tally.errors {
        summary.record_error(id, e.to_string());
    }
    indexer.finish(&summary).await?;
    Ok(summary)
}

fn print_summary(summary: &SyncSummary) {
    println!("{}", summary);
}
