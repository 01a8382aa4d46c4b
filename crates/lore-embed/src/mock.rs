//! Deterministic in-process embedder for tests and offline use.

use async_trait::async_trait;

use lore_core::{EmbeddingBackend, Result};

/// Hashed bag-of-words embedder.
///
/// Each lowercased word adds weight to one dimension, then the vector is
/// L2-normalized, so texts sharing vocabulary score high under cosine.
pub struct MockEmbedder {
    dimension: usize,
    model: String,
}

impl MockEmbedder {
    /// Create a new mock embedder with default settings.
    pub fn new() -> Self {
        Self::with_dimension(256)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model: "mock".to_string(),
        }
    }

    /// Embed synchronously.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let word = word.to_lowercase();
            let hash = word
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                    (acc ^ b as u64).wrapping_mul(0x0100_0000_01b3)
                });
            embedding[(hash % self.dimension as u64) as usize] += 1.0;
        }

        // L2 normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbedder {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    async fn check_connection(&self) -> bool {
        true
    }

    async fn provision_model(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new();
        assert_eq!(embedder.dimension(), 256);

        let embedding = embedder.embed("Hello world").await.unwrap();
        assert_eq!(embedding.len(), 256);

        // Check L2 normalization
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_deterministic_embeddings() {
        let embedder = MockEmbedder::new();
        let e1 = embedder.embed("consistent input").await.unwrap();
        let e2 = embedder.embed("consistent input").await.unwrap();
        assert_eq!(e1, e2);
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let embedder = MockEmbedder::new();
        let cooking = embedder.vector("bake bread with flour yeast and an oven");
        let astronomy = embedder.vector("telescopes observe distant galaxies and stars");
        let query = embedder.vector("how long to bake bread in the oven");

        assert!(cosine(&query, &cooking) > cosine(&query, &astronomy));
    }
}
