//! Line-delimited JSON server.
//!
//! One request object per line on stdin, one response object per line on
//! stdout. Diagnostics go to the log, never to stdout.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use lore_core::{LoreError, Result};

use crate::monitor::{IndexMonitor, MonitorSettings};
use crate::session::Session;

/// A protocol request.
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A protocol response: exactly one of `result` and `error` is set.
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// Search request parameters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: String,
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
}

/// Server state: the session plus the optional folder monitor.
pub struct LoreServer {
    session: Arc<Session>,
    monitor: Option<Arc<IndexMonitor>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    started: Instant,
}

impl LoreServer {
    /// Build the server; a monitor is attached when `server.folder` is set.
    pub async fn new(session: Arc<Session>) -> Result<Self> {
        let monitor = match session.config().server.folder.clone() {
            Some(folder) => {
                let root = lore_sync::resolve_root(&folder)?;
                let sync = Arc::new(session.folder_sync(None).await?);
                let settings = MonitorSettings::from(&session.config().server);
                Some(Arc::new(IndexMonitor::new(sync, root, settings)))
            }
            None => None,
        };

        Ok(Self {
            session,
            monitor,
            ticker: Mutex::new(None),
            started: Instant::now(),
        })
    }

    pub fn monitor(&self) -> Option<&Arc<IndexMonitor>> {
        self.monitor.as_ref()
    }

    /// Start background indexing and periodic change checks.
    pub async fn start(&self) -> Result<()> {
        let Some(monitor) = &self.monitor else {
            info!("No folder configured, serving search only");
            return Ok(());
        };

        monitor.start(self.session.store().as_ref()).await?;
        *self.ticker.lock().await = Some(tokio::spawn(monitor.clone().run()));
        Ok(())
    }

    /// Answer one request line.
    pub async fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => Response::error(Value::Null, "PARSE_ERROR", e.to_string()),
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(
                r#"{{"id":null,"error":{{"code":"INTERNAL_ERROR","message":"{}"}}}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }

    pub async fn handle(&self, request: Request) -> Response {
        let outcome = match request.method.as_str() {
            "search" => self.search(request.params).await,
            "status" => self.status().await,
            "stats" => self.stats().await,
            other => {
                return Response::error(
                    request.id,
                    "METHOD_NOT_FOUND",
                    format!("unknown method '{}'", other),
                )
            }
        };

        match outcome {
            Ok(result) => Response::ok(request.id, result),
            Err(e) => {
                warn!(method = %request.method, "Request failed: {}", e);
                Response::error(request.id, e.error_code(), e.to_string())
            }
        }
    }

    /// Query the store as it is now; indexing is never awaited.
    async fn search(&self, params: Value) -> Result<Value> {
        let params: SearchParams = serde_json::from_value(params)
            .map_err(|e| LoreError::config(format!("invalid search params: {}", e)))?;

        let mut config = self.session.query_config(params.top_k);
        config.min_score = params.min_score;
        let engine = self.session.search_engine().await?;
        let results = engine.search(&params.query, &config).await?;
        Ok(serde_json::to_value(results)?)
    }

    async fn status(&self) -> Result<Value> {
        let indexing = match &self.monitor {
            Some(monitor) => Some(monitor.status().await),
            None => None,
        };
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSecs": self.started.elapsed().as_secs(),
            "store": self.session.store_path(),
            "records": self.session.store().count().await?,
            "model": self.session.backend_model(),
            "indexing": indexing,
        }))
    }

    async fn stats(&self) -> Result<Value> {
        let store = self.session.store();
        let by_source: serde_json::Map<String, Value> = store
            .count_by_source()
            .await?
            .into_iter()
            .map(|(source, count)| (source, json!(count)))
            .collect();
        Ok(json!({
            "records": store.count().await?,
            "dimension": store.dimension(),
            "bySource": by_source,
        }))
    }

    /// Stop background work and release the store.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.abort();
        }
        if let Some(monitor) = &self.monitor {
            monitor.stop().await;
        }
        self.session.close().await
    }
}

/// Serve requests from `input` until it closes or a termination signal
/// arrives, then shut down.
pub async fn serve<R, W>(server: Arc<LoreServer>, input: R, mut output: W) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    server.start().await?;
    let mut lines = BufReader::new(input).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Server ready");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = server.handle_line(&line).await;
                output.write_all(response.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
            _ = &mut shutdown => {
                info!("Termination signal received");
                break;
            }
        }
    }

    server.shutdown().await
}

/// Serve on the process's stdin and stdout.
pub async fn serve_stdio(server: Arc<LoreServer>) -> Result<()> {
    serve(server, tokio::io::stdin(), tokio::io::stdout()).await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
