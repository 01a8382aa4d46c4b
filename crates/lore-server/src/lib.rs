//! lore-server - Long-running lore server
//!
//! A [`Session`] holds everything one process shares: the resolved
//! configuration, the open store and the lazily probed embedding backend.
//! [`LoreServer`] answers line-delimited JSON requests over it while an
//! [`IndexMonitor`] keeps a watched folder indexed in the background.
//!
//! # Methods
//!
//! - `search` - `{"query": "...", "topK": 5, "minScore": 0.2}`
//! - `status` - uptime, record count and background indexing state
//! - `stats` - record counts per source

mod monitor;
mod server;
mod session;

pub use monitor::{IndexMonitor, MonitorSettings, MonitorStatus};
pub use server::{serve, serve_stdio, ErrorBody, LoreServer, Request, Response, SearchParams};
pub use session::Session;
