// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! HNSW (Hierarchical Navigable Small World) graph
//!
//! Similarity-oriented HNSW keyed by primary key. Higher similarity is
//! better throughout; with [`MetricType::InnerProduct`] the raw inner product
//! is the score. The graph holds its own copy of each vector.

use rand::Rng;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::compute::MetricType;
use crate::core::PrimaryKey;
use crate::schema::IndexParams;

/// HNSW configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Maximum connections per node in higher layers
    pub m: usize,

    /// Maximum connections per node in layer 0 (typically 2 * M)
    pub max_m0: usize,

    /// Size of dynamic candidate list during construction
    pub ef_construction: usize,

    /// Size of dynamic candidate list during search
    pub ef_search: usize,

    /// Level normalization factor (1 / ln M)
    pub ml: f64,

    /// Maximum layer count
    pub max_layers: usize,
}

impl HnswConfig {
    pub fn from_params(params: &IndexParams) -> Self {
        let m = params.m.max(2);
        Self {
            m,
            max_m0: m * 2,
            ef_construction: params.ef_construction.max(m),
            ef_search: params.ef_search.max(1),
            ml: 1.0 / (m as f64).ln(),
            max_layers: 16,
        }
    }
}

/// Search candidate ordered by similarity
#[derive(Debug, Clone, Copy)]
struct Candidate {
    pk: PrimaryKey,
    similarity: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| other.pk.cmp(&self.pk))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Node connections of one layer
#[derive(Debug, Default, Clone)]
struct HnswLayer {
    connections: HashMap<PrimaryKey, Vec<PrimaryKey>>,
}

pub struct HnswGraph {
    config: HnswConfig,
    metric: MetricType,
    vectors: HashMap<PrimaryKey, Vec<f32>>,
    levels: HashMap<PrimaryKey, usize>,
    /// Layer 0 is the base layer
    layers: Vec<HnswLayer>,
    entry_point: Option<PrimaryKey>,
}

impl HnswGraph {
    pub fn new(config: HnswConfig, metric: MetricType) -> Self {
        Self {
            config,
            metric,
            vectors: HashMap::new(),
            levels: HashMap::new(),
            layers: vec![HnswLayer::default()],
            entry_point: None,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, pk: PrimaryKey) -> bool {
        self.vectors.contains_key(&pk)
    }

    fn random_level(&self) -> usize {
        let uniform: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
        let level = (-uniform.ln() * self.config.ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.max_m0
        } else {
            self.config.m
        }
    }

    fn similarity_to(&self, query: &[f32], pk: PrimaryKey) -> Option<f32> {
        self.vectors
            .get(&pk)
            .map(|v| self.metric.similarity(query, v))
    }

    /// Beam search within one layer, best first.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[PrimaryKey],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut visited = HashSet::new();
        let mut candidates = BinaryHeap::new();
        let mut found: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

        for &ep in entry_points {
            if let Some(similarity) = self.similarity_to(query, ep) {
                if visited.insert(ep) {
                    let candidate = Candidate { pk: ep, similarity };
                    candidates.push(candidate);
                    found.push(Reverse(candidate));
                }
            }
        }

        let Some(connections) = self.layers.get(layer).map(|l| &l.connections) else {
            return Vec::new();
        };

        while let Some(current) = candidates.pop() {
            if let Some(Reverse(worst)) = found.peek() {
                if found.len() >= ef && current.similarity < worst.similarity {
                    break;
                }
            }

            let Some(neighbors) = connections.get(&current.pk) else {
                continue;
            };
            for &neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(similarity) = self.similarity_to(query, neighbor) else {
                    continue;
                };
                let worst = found.peek().map(|Reverse(c)| c.similarity);
                if found.len() < ef || worst.map_or(true, |w| similarity > w) {
                    let candidate = Candidate { pk: neighbor, similarity };
                    candidates.push(candidate);
                    found.push(Reverse(candidate));
                    if found.len() > ef {
                        found.pop();
                    }
                }
            }
        }

        let mut result: Vec<Candidate> = found.into_iter().map(|Reverse(c)| c).collect();
        result.sort_by(|a, b| b.cmp(a));
        result
    }

    fn connect(&mut self, from: PrimaryKey, to: PrimaryKey, layer: usize) {
        let list = self.layers[layer].connections.entry(from).or_default();
        if !list.contains(&to) {
            list.push(to);
        }
    }

    /// Keep the closest neighbors of `node` within the degree bound.
    fn prune_connections(&mut self, node: PrimaryKey, layer: usize) {
        let max = self.max_connections(layer);
        let Some(vector) = self.vectors.get(&node) else {
            return;
        };
        let Some(neighbors) = self.layers[layer].connections.get(&node) else {
            return;
        };
        if neighbors.len() <= max {
            return;
        }

        let mut scored: Vec<Candidate> = neighbors
            .iter()
            .filter_map(|&pk| {
                self.vectors.get(&pk).map(|v| Candidate {
                    pk,
                    similarity: self.metric.similarity(vector, v),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(max);

        let kept = scored.into_iter().map(|c| c.pk).collect();
        self.layers[layer].connections.insert(node, kept);
    }

    /// Insert or replace the vector stored under `pk`.
    pub fn insert(&mut self, pk: PrimaryKey, vector: Vec<f32>) {
        if self.contains(pk) {
            self.remove(pk);
        }

        let level = self.random_level();
        while self.layers.len() <= level {
            self.layers.push(HnswLayer::default());
        }

        let Some(entry) = self.entry_point else {
            self.vectors.insert(pk, vector);
            self.levels.insert(pk, level);
            for layer in 0..=level {
                self.layers[layer].connections.entry(pk).or_default();
            }
            self.entry_point = Some(pk);
            return;
        };
        let top = self.levels.get(&entry).copied().unwrap_or(0);

        let mut entry_points = vec![entry];
        for layer in (level + 1..=top).rev() {
            if let Some(best) = self.search_layer(&vector, &entry_points, 1, layer).first() {
                entry_points = vec![best.pk];
            }
        }

        let mut neighbors_per_layer = Vec::new();
        for layer in (0..=level.min(top)).rev() {
            let candidates =
                self.search_layer(&vector, &entry_points, self.config.ef_construction, layer);
            let limit = self.max_connections(layer);
            let selected: Vec<PrimaryKey> = candidates.iter().take(limit).map(|c| c.pk).collect();
            if !candidates.is_empty() {
                entry_points = candidates.iter().map(|c| c.pk).collect();
            }
            neighbors_per_layer.push((layer, selected));
        }

        self.vectors.insert(pk, vector);
        self.levels.insert(pk, level);
        for layer in 0..=level {
            self.layers[layer].connections.entry(pk).or_default();
        }

        for (layer, selected) in neighbors_per_layer {
            for neighbor in selected {
                self.connect(pk, neighbor, layer);
                self.connect(neighbor, pk, layer);
                self.prune_connections(neighbor, layer);
            }
        }

        if level > top {
            self.entry_point = Some(pk);
        }
    }

    /// Remove `pk`, reconnecting its former neighbors among themselves.
    pub fn remove(&mut self, pk: PrimaryKey) -> bool {
        if self.vectors.remove(&pk).is_none() {
            return false;
        }
        self.levels.remove(&pk);

        for layer in 0..self.layers.len() {
            let Some(former) = self.layers[layer].connections.remove(&pk) else {
                continue;
            };
            for &node in &former {
                if let Some(list) = self.layers[layer].connections.get_mut(&node) {
                    list.retain(|&n| n != pk);
                }
            }
            let max = self.max_connections(layer);
            for &node in &former {
                for &other in &former {
                    if node == other {
                        continue;
                    }
                    let degree = self.layers[layer]
                        .connections
                        .get(&node)
                        .map_or(max, Vec::len);
                    if degree >= max {
                        break;
                    }
                    self.connect(node, other, layer);
                }
            }
        }

        if self.entry_point == Some(pk) {
            self.entry_point = self
                .levels
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(&pk, _)| pk);
        }
        true
    }

    /// Up to `k` nearest keys with their similarity, best first.
    ///
    /// Graphs no larger than the search width are scanned exhaustively.
    pub fn search(&self, query: &[f32], k: usize, ef: Option<usize>) -> Vec<(PrimaryKey, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }
        let ef = ef.unwrap_or(self.config.ef_search).max(k);

        if self.len() <= ef {
            return self.exact(query, k);
        }

        let top = self.levels.get(&entry).copied().unwrap_or(0);
        let mut entry_points = vec![entry];
        for layer in (1..=top).rev() {
            if let Some(best) = self.search_layer(query, &entry_points, 1, layer).first() {
                entry_points = vec![best.pk];
            }
        }

        self.search_layer(query, &entry_points, ef, 0)
            .into_iter()
            .take(k)
            .map(|c| (c.pk, c.similarity))
            .collect()
    }

    fn exact(&self, query: &[f32], k: usize) -> Vec<(PrimaryKey, f32)> {
        let mut scored: Vec<Candidate> = self
            .vectors
            .iter()
            .map(|(&pk, v)| Candidate {
                pk,
                similarity: self.metric.similarity(query, v),
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(k);
        scored.into_iter().map(|c| (c.pk, c.similarity)).collect()
    }
}
