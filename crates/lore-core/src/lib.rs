//! lore-core - Core types and traits for the lore semantic index
//!
//! This crate provides the data model, error taxonomy, layered configuration
//! and collaborator traits shared by every other lore crate, plus the two
//! pure algorithms everything else is built on: the content ledger
//! (checksum identity and admission) and the sync planner (diff of a source
//! listing against known state).

pub mod config;
pub mod error;
pub mod ledger;
pub mod plan;
pub mod summary;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{LoreError, Result};
pub use ledger::{Admission, ContentLedger, SkipReason};
pub use plan::{diff, WorkPlan};
pub use summary::{ItemError, SyncSummary};
pub use traits::*;
pub use types::*;
