//! In-memory cosine index over normalized vectors.

use std::cmp::Ordering;

/// Cosine similarity of two equal-length vectors. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Scale a vector to unit length in place.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Keep the `top_k` best `(id, score)` pairs, best first.
pub fn top_k(mut scored: Vec<(String, f32)>, k: usize) -> Vec<(String, f32)> {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(k);
    scored
}

/// Snapshot of every stored vector, pre-normalized for dot-product scoring.
#[derive(Debug, Default, Clone)]
pub struct VectorIndex {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: String, mut vector: Vec<f32>) {
        normalize(&mut vector);
        self.ids.push(id);
        self.vectors.push(vector);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Best `k` ids by cosine similarity to `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let mut q = query.to_vec();
        normalize(&mut q);

        let scored = self
            .ids
            .iter()
            .zip(self.vectors.iter())
            .map(|(id, v)| {
                let score: f32 = v.iter().zip(q.iter()).map(|(a, b)| a * b).sum();
                (id.clone(), score)
            })
            .collect();
        top_k(scored, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_index_search_orders_by_similarity() {
        let mut index = VectorIndex::new();
        index.insert("east".to_string(), vec![1.0, 0.0]);
        index.insert("north".to_string(), vec![0.0, 3.0]);
        index.insert("northeast".to_string(), vec![1.0, 1.0]);

        let hits = index.search(&[0.1, 1.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "north");
        assert_eq!(hits[1].0, "northeast");
    }
}
