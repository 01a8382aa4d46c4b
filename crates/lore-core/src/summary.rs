//! Sync result tally.

use serde::{Deserialize, Serialize};

/// Errors shown before truncating with "...and N more".
pub const MAX_DISPLAYED_ERRORS: usize = 10;

/// A per-item failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Item identity (path, file id, URL, document id).
    pub key: String,
    pub message: String,
}

/// Outcome of one sync-style command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub removed: usize,
    pub errors: Vec<ItemError>,
}

impl SyncSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ItemError {
            key: key.into(),
            message: message.into(),
        });
    }

    /// Fold another tally into this one.
    pub fn merge(&mut self, other: SyncSummary) {
        self.added += other.added;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.removed += other.removed;
        self.errors.extend(other.errors);
    }

    /// True when the store was modified.
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

impl std::fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "added: {}, updated: {}, skipped: {}, removed: {}, errors: {}",
            self.added,
            self.updated,
            self.skipped,
            self.removed,
            self.errors.len()
        )?;

        for error in self.errors.iter().take(MAX_DISPLAYED_ERRORS) {
            write!(f, "\n  {}: {}", error.key, error.message)?;
        }
        if self.errors.len() > MAX_DISPLAYED_ERRORS {
            write!(
                f,
                "\n  ...and {} more",
                self.errors.len() - MAX_DISPLAYED_ERRORS
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_truncates_errors() {
        let mut summary = SyncSummary::new();
        summary.added = 2;
        for i in 0..13 {
            summary.record_error(format!("file-{}", i), "boom");
        }

        let text = summary.to_string();
        assert!(text.starts_with("added: 2"));
        assert!(text.contains("file-9: boom"));
        assert!(!text.contains("file-10"));
        assert!(text.contains("...and 3 more"));
    }

    #[test]
    fn test_merge() {
        let mut a = SyncSummary {
            added: 1,
            skipped: 2,
            ..Default::default()
        };
        let mut b = SyncSummary::new();
        b.removed = 4;
        b.record_error("x", "y");

        a.merge(b);
        assert_eq!(a.added, 1);
        assert_eq!(a.removed, 4);
        assert_eq!(a.errors.len(), 1);
        assert!(a.changed());
    }
}
