/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Similarity computation
//!
//! - Inner product and cosine similarity for single vectors
//! - Late-interaction (MaxSim) scoring of a query matrix against a group of
//!   vectors: for each query vector take the best inner product against any
//!   group vector, then sum those maxima.

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Similarity metric of an index. Higher is always more similar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MetricType {
    /// Inner product (IP); expects embeddings the model already normalised
    #[default]
    InnerProduct,
    /// Cosine similarity
    Cosine,
}

impl MetricType {
    #[inline]
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            MetricType::InnerProduct => inner_product(a, b),
            MetricType::Cosine => cosine_similarity(a, b),
        }
    }
}

#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    ArrayView1::from(a).dot(&ArrayView1::from(b))
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = inner_product(a, b);
    let norm_a = inner_product(a, a).sqrt();
    let norm_b = inner_product(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Query vectors packed row-wise, shared by every group scored in one rerank.
#[derive(Debug, Clone)]
pub struct QueryMatrix {
    matrix: Array2<f32>,
}

impl QueryMatrix {
    /// Pack query vectors. Returns `None` when empty or ragged.
    pub fn new(queries: &[Vec<f32>]) -> Option<Self> {
        let dim = queries.first()?.len();
        if dim == 0 || queries.iter().any(|q| q.len() != dim) {
            return None;
        }
        let flat: Vec<f32> = queries.iter().flatten().copied().collect();
        let matrix = Array2::from_shape_vec((queries.len(), dim), flat).ok()?;
        Some(Self { matrix })
    }

    pub fn len(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.nrows() == 0
    }

    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn rows(&self) -> Vec<Vec<f32>> {
        self.matrix.outer_iter().map(|row| row.to_vec()).collect()
    }

    /// Late-interaction score against `group` (all vectors of one group).
    ///
    /// An empty group scores `0.0`. Vectors whose dimension differs from the
    /// query dimension are ignored.
    pub fn late_interaction(&self, group: &[&[f32]]) -> f32 {
        self.late_interaction_detailed(group).map(|s| s.score).unwrap_or(0.0)
    }

    /// Score plus the index of the group vector that matched best overall.
    pub fn late_interaction_detailed(&self, group: &[&[f32]]) -> Option<LateInteractionScore> {
        let dim = self.dim();
        let usable: Vec<(usize, &[f32])> = group
            .iter()
            .enumerate()
            .filter(|(_, v)| v.len() == dim)
            .map(|(i, v)| (i, *v))
            .collect();
        if usable.is_empty() {
            return None;
        }

        let flat: Vec<f32> = usable.iter().flat_map(|(_, v)| v.iter().copied()).collect();
        let docs = Array2::from_shape_vec((usable.len(), dim), flat).ok()?;

        // (queries x dim) . (dim x docs) = (queries x docs)
        let sims = self.matrix.dot(&docs.t());

        let mut score = 0.0f32;
        let mut best = (f32::NEG_INFINITY, 0usize);
        for row in sims.axis_iter(Axis(0)) {
            let (col, max) = row
                .iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |acc, (j, &s)| if s > acc.1 { (j, s) } else { acc });
            score += max;
            if max > best.0 {
                best = (max, col);
            }
        }

        Some(LateInteractionScore {
            score,
            best_vector: usable[best.1].0,
        })
    }
}

/// Result of scoring one group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LateInteractionScore {
    pub score: f32,
    /// Position in the scored slice of the single best-matching vector
    pub best_vector: usize,
}
