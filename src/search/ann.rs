//! Inner-product nearest-neighbour structure for the dense backend
//!
//! Exhaustive (flat) search: exact results, which keeps rank order
//! identical before and after a save/load cycle. On L2-normalised rows
//! the inner product equals cosine similarity.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Row-major matrix of unit vectors searched by inner product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIpIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIpIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one row; the vector must match the index dimension
    pub fn add(&mut self, vector: &[f32]) -> Result<(), String> {
        if vector.len() != self.dimension {
            return Err(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            ));
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// Inner product of `query` with every row, in row order
    pub fn scores(&self, query: &[f32]) -> Vec<f32> {
        if query.len() != self.dimension {
            return vec![0.0; self.len()];
        }
        self.data
            .chunks_exact(self.dimension)
            .map(|row| row.iter().zip(query).map(|(a, b)| a * b).sum())
            .collect()
    }

    /// Top-k rows as `(row, score)`, best first, ties by row order
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let scores = self.scores(query);
        top_k(&scores, k)
            .into_iter()
            .map(|row| (row, scores[row]))
            .collect()
    }

    /// Shape check run after deserialisation
    pub fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 {
            return Err("zero dimension".into());
        }
        if self.data.len() % self.dimension != 0 {
            return Err(format!(
                "{} values do not fill rows of {}",
                self.data.len(),
                self.dimension
            ));
        }
        Ok(())
    }
}

/// Indices of the `k` highest scores, stable for ties; NaN ranks last
pub(crate) fn top_k(scores: &[f32], k: usize) -> Vec<usize> {
    let key = |s: f32| if s.is_nan() { f32::NEG_INFINITY } else { s };
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        key(scores[b])
            .partial_cmp(&key(scores[a]))
            .unwrap_or(Ordering::Equal)
    });
    order.truncate(k.min(scores.len()));
    order
}
