// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Late-interaction reranking
//!
//! Two-phase retrieval over a [`VectorStore`]:
//!
//! 1. Coarse search at vector granularity, `coarse_limit` hits per query vector.
//! 2. Distinct groups are collected in discovery order.
//! 3. Every vector of each group is fetched, at most `max_concurrent_fetches`
//!    fetches in flight at once.
//! 4. Each group is scored exactly: per query vector the best inner product
//!    against any group vector, summed over query vectors.
//! 5. Groups are sorted by score (stable, so ties keep discovery order) and
//!    resolved against the file catalog until `top_k` are accepted.
//!
//! A group whose fetch fails keeps a score of `0.0` rather than failing the
//! whole request. A group with no vectors left, or whose file the catalog
//! reports as gone, is dropped from the output and its file's vectors are
//! deleted once the ranking is complete.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::catalog::{FileCatalog, FileMetadata};
use crate::compute::QueryMatrix;
use crate::core::{KbError, RerankConfig, Result, StoreConfig};
use crate::schema::{MediaType, VectorRecord};
use crate::storage::{SearchFilter, VectorHit, VectorStore};

/// One ranked group as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedGroup {
    pub score: f32,
    pub group_id: String,
    pub file_id: String,
    pub media_type: MediaType,
    pub timestamp_start: f64,
    pub timestamp_end: f64,
    pub duration: f64,
    pub segment_id: String,
    /// Page or frame of the best-matching vector
    pub sequence_index: i64,
    pub file: Option<FileMetadata>,
    /// Set when results are merged across knowledge bases
    pub collection: Option<String>,
}

impl RankedGroup {
    fn new(score: f32, record: &VectorRecord) -> Self {
        Self {
            score,
            group_id: record.group_id.clone(),
            file_id: record.file_id.clone(),
            media_type: record.media_type,
            timestamp_start: record.timestamp_start,
            timestamp_end: record.timestamp_end,
            duration: record.duration,
            segment_id: record.segment_id.clone(),
            sequence_index: record.sequence_index,
            file: None,
            collection: None,
        }
    }
}

/// Outcome of fetching and scoring one group
enum GroupOutcome {
    Scored { score: f32, best: VectorRecord },
    /// The group has no vectors left
    Dangling,
    Failed(KbError),
}

struct ScoredGroup {
    score: f32,
    representative: VectorRecord,
}

pub struct LateInteractionReranker {
    config: RerankConfig,
    coarse_limit: usize,
    group_fetch_cap: usize,
    catalog: Option<Arc<dyn FileCatalog>>,
}

impl LateInteractionReranker {
    pub fn new(config: RerankConfig, store: &StoreConfig) -> Self {
        Self {
            config,
            coarse_limit: store.coarse_limit,
            group_fetch_cap: store.group_fetch_cap,
            catalog: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn FileCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn max_concurrent_fetches(&self) -> usize {
        self.config.max_concurrent_fetches
    }

    /// Coarse search followed by rerank.
    ///
    /// `CollectionNotFound` is returned as is; callers treat it as no results.
    pub async fn search(
        &self,
        store: &Arc<VectorStore>,
        queries: &[Vec<f32>],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RankedGroup>> {
        let query = QueryMatrix::new(queries).ok_or_else(|| {
            KbError::InvalidInput("query vectors must be non-empty and of equal length".to_string())
        })?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let coarse = store.search(queries, self.coarse_limit, filter).await?;
        self.rerank(store, &query, coarse, top_k).await
    }

    /// Score the groups behind `coarse` hits and return the best `top_k`.
    pub async fn rerank(
        &self,
        store: &Arc<VectorStore>,
        query: &QueryMatrix,
        coarse: Vec<Vec<VectorHit>>,
        top_k: usize,
    ) -> Result<Vec<RankedGroup>> {
        let candidates = distinct_groups(coarse);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        debug!("🔍 Reranking {} groups in {}", candidates.len(), store.name());

        let outcomes = self.score_groups(store, query, &candidates).await?;

        let mut dangling = HashSet::new();
        let mut scored = Vec::with_capacity(candidates.len());
        for (candidate, outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                GroupOutcome::Scored { score, best } => scored.push(ScoredGroup {
                    score,
                    representative: best,
                }),
                GroupOutcome::Dangling => {
                    warn!(
                        "{}",
                        KbError::DanglingGroup {
                            group_id: candidate.group_id.clone(),
                            file_id: candidate.file_id.clone(),
                        }
                    );
                    dangling.insert(candidate.file_id);
                }
                GroupOutcome::Failed(e) => {
                    warn!("scoring group {} as 0.0: {}", candidate.group_id, e);
                    scored.push(ScoredGroup {
                        score: 0.0,
                        representative: candidate,
                    });
                }
            }
        }

        // Stable: equal scores keep discovery order.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        let ranked = self.resolve(scored, top_k, &mut dangling).await;

        if !dangling.is_empty() {
            self.heal(store, &dangling).await;
        }
        Ok(ranked)
    }

    /// Fetch and score every candidate under the concurrency budget.
    ///
    /// Outcomes are returned in candidate order.
    async fn score_groups(
        &self,
        store: &Arc<VectorStore>,
        query: &QueryMatrix,
        candidates: &[VectorRecord],
    ) -> Result<Vec<GroupOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_fetches.max(1)));
        let query = Arc::new(query.clone());
        let cap = self.group_fetch_cap;
        let mut tasks = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                KbError::StoreUnavailable {
                    collection: store.name().to_string(),
                    operation: "fetch_group",
                    reason: e.to_string(),
                }
            })?;
            let store = Arc::clone(store);
            let query = Arc::clone(&query);
            let group_id = candidate.group_id.clone();

            tasks.push(tokio::spawn(async move {
                let fetched = store.fetch_group(&group_id, cap).await;
                drop(permit);

                match fetched {
                    Ok(records) if records.is_empty() => GroupOutcome::Dangling,
                    Ok(records) => score_group(&query, records),
                    Err(e) => GroupOutcome::Failed(e),
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            outcomes.push(task.await.unwrap_or_else(|e| {
                GroupOutcome::Failed(KbError::StoreUnavailable {
                    collection: store.name().to_string(),
                    operation: "fetch_group",
                    reason: e.to_string(),
                })
            }));
        }
        Ok(outcomes)
    }

    /// Walk the ranking, attaching file metadata, until `top_k` are accepted.
    async fn resolve(
        &self,
        scored: Vec<ScoredGroup>,
        top_k: usize,
        dangling: &mut HashSet<String>,
    ) -> Vec<RankedGroup> {
        let mut ranked = Vec::with_capacity(top_k.min(scored.len()));
        for group in scored {
            if ranked.len() == top_k {
                break;
            }
            let record = &group.representative;
            if dangling.contains(&record.file_id) {
                continue;
            }

            let mut result = RankedGroup::new(group.score, record);
            if let Some(catalog) = &self.catalog {
                let segment_id = Some(record.segment_id.as_str()).filter(|s| !s.is_empty());
                match catalog.lookup(&record.file_id, &record.group_id, segment_id).await {
                    Ok(Some(file)) => result.file = Some(file),
                    Ok(None) => {
                        warn!(
                            "{}",
                            KbError::DanglingGroup {
                                group_id: record.group_id.clone(),
                                file_id: record.file_id.clone(),
                            }
                        );
                        dangling.insert(record.file_id.clone());
                        continue;
                    }
                    Err(e) => {
                        warn!("catalog lookup for file {} failed: {}", record.file_id, e);
                        continue;
                    }
                }
            }
            ranked.push(result);
        }
        ranked
    }

    /// Delete vectors of files found dangling. Failures are logged only.
    async fn heal(&self, store: &VectorStore, dangling: &HashSet<String>) {
        if !self.config.self_heal {
            info!("self-heal disabled, leaving {} dangling files in {}", dangling.len(), store.name());
            return;
        }
        match store.delete_by_file_ids(dangling).await {
            Ok(removed) => info!(
                "🩹 Removed {} dangling vectors ({} files) from {}",
                removed,
                dangling.len(),
                store.name()
            ),
            Err(e) => error!("self-heal delete on {} failed: {}", store.name(), e),
        }
    }
}

/// First coarse hit of each group, in discovery order.
fn distinct_groups(coarse: Vec<Vec<VectorHit>>) -> Vec<VectorRecord> {
    let mut seen = HashSet::new();
    let mut groups = Vec::new();
    for hit in coarse.into_iter().flatten() {
        if seen.insert(hit.record.group_id.clone()) {
            groups.push(hit.record);
        }
    }
    groups
}

fn score_group(query: &QueryMatrix, records: Vec<VectorRecord>) -> GroupOutcome {
    let vectors: Vec<&[f32]> = records.iter().map(|r| r.vector.as_slice()).collect();
    match query.late_interaction_detailed(&vectors) {
        Some(detailed) => {
            let score = detailed.score;
            match records.into_iter().nth(detailed.best_vector) {
                Some(best) => GroupOutcome::Scored { score, best },
                None => GroupOutcome::Dangling,
            }
        }
        // Nothing with a usable dimension
        None => GroupOutcome::Dangling,
    }
}
