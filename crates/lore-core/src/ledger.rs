//! Content identity and admission.
//!
//! The checksum of the exact text that would be embedded is the dedup
//! identity of a record. Admission is a pure query: the insert happens
//! only after a successful embed.

use crate::error::Result;
use crate::traits::VectorStore;

/// Why a document was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A live record already has this checksum.
    Duplicate { existing_id: String },

    /// Content is below the minimum length.
    TooShort { length: usize, minimum: usize },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate { .. } => "duplicate",
            Self::TooShort { .. } => "too short",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate { existing_id } => write!(f, "duplicate of {}", existing_id),
            Self::TooShort { length, minimum } => {
                write!(f, "too short ({} < {} chars)", length, minimum)
            }
        }
    }
}

/// Ledger verdict for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// New content: embed it and store it under this checksum.
    Accept { checksum: String },
    Skip(SkipReason),
}

/// Checksum identity plus admission policy.
#[derive(Debug, Clone)]
pub struct ContentLedger {
    min_length: usize,
}

impl ContentLedger {
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Deterministic hex checksum of the exact content bytes.
    pub fn identify(content: &str) -> String {
        blake3::hash(content.as_bytes()).to_hex().to_string()
    }

    /// Decide whether `content` should be embedded.
    pub async fn admit(&self, store: &dyn VectorStore, content: &str) -> Result<Admission> {
        let length = content.trim().chars().count();
        if length < self.min_length {
            return Ok(Admission::Skip(SkipReason::TooShort {
                length,
                minimum: self.min_length,
            }));
        }

        let checksum = Self::identify(content);
        match store.get_by_checksum(&checksum).await? {
            Some(existing_id) => Ok(Admission::Skip(SkipReason::Duplicate { existing_id })),
            None => Ok(Admission::Accept { checksum }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndexRecord, Metadata, ScoredDocument, SourceKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ChecksumOnlyStore {
        records: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl VectorStore for ChecksumOnlyStore {
        fn dimension(&self) -> usize {
            4
        }

        async fn put(&self, record: IndexRecord) -> Result<()> {
            self.records
                .lock()
                .unwrap()
                .push((record.id, record.checksum));
            Ok(())
        }

        async fn get_by_checksum(&self, checksum: &str) -> Result<Option<String>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|(_, c)| c == checksum)
                .map(|(id, _)| id.clone()))
        }

        async fn get(&self, _id: &str) -> Result<Option<IndexRecord>> {
            Ok(None)
        }

        async fn get_all(&self) -> Result<Vec<IndexRecord>> {
            Ok(Vec::new())
        }

        async fn delete_by_ids(&self, _ids: &[String]) -> Result<usize> {
            Ok(0)
        }

        async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<ScoredDocument>> {
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<usize> {
            Ok(self.records.lock().unwrap().len())
        }

        async fn count_by_source(&self) -> Result<Vec<(String, usize)>> {
            Ok(Vec::new())
        }

        async fn provenance(&self, _source: SourceKind) -> Result<Vec<(String, Metadata)>> {
            Ok(Vec::new())
        }

        async fn ids_for_metadata(&self, _key: &str, _value: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn delete_by_metadata(&self, _key: &str, _value: &str) -> Result<usize> {
            Ok(0)
        }

        async fn flush(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    const TEXT: &str = "The quick brown fox jumps over the lazy dog near the river bank.";

    #[test]
    fn test_identify_is_deterministic() {
        assert_eq!(ContentLedger::identify(TEXT), ContentLedger::identify(TEXT));
        assert_ne!(ContentLedger::identify(TEXT), ContentLedger::identify("other"));
        assert_eq!(ContentLedger::identify(TEXT).len(), 64);
    }

    #[tokio::test]
    async fn test_admit_new_content() {
        let store = ChecksumOnlyStore::default();
        let ledger = ContentLedger::new(10);
        let verdict = ledger.admit(&store, TEXT).await.unwrap();
        assert_eq!(
            verdict,
            Admission::Accept {
                checksum: ContentLedger::identify(TEXT)
            }
        );
    }

    #[tokio::test]
    async fn test_admit_duplicate_reports_existing_id() {
        let store = ChecksumOnlyStore::default();
        store
            .put(IndexRecord {
                id: "first".to_string(),
                vector: vec![0.0; 4],
                content: None,
                metadata: Metadata::new(),
                checksum: ContentLedger::identify(TEXT),
                version: "test".to_string(),
            })
            .await
            .unwrap();

        let ledger = ContentLedger::new(10);
        let verdict = ledger.admit(&store, TEXT).await.unwrap();
        assert_eq!(
            verdict,
            Admission::Skip(SkipReason::Duplicate {
                existing_id: "first".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_admit_too_short() {
        let store = ChecksumOnlyStore::default();
        let ledger = ContentLedger::new(50);
        match ledger.admit(&store, "  tiny  ").await.unwrap() {
            Admission::Skip(reason) => {
                assert_eq!(reason.as_str(), "too short");
                assert_eq!(
                    reason,
                    SkipReason::TooShort {
                        length: 4,
                        minimum: 50
                    }
                );
            }
            other => panic!("expected skip, got {:?}", other),
        }
    }
}
