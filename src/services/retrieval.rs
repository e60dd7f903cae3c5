// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Retrieval Service - knowledge-base facade
//!
//! Entry point for the orchestration layer. Maps knowledge-base ids to
//! collections, keeps one [`VectorStore`] per collection, and wires the
//! reranker and the migration manager to them. Everything is constructed
//! explicitly and owned here; nothing is process-global.

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::catalog::{EmbeddingProducer, FileCatalog, ProducedSegment};
use super::migration::{MigrationReport, SchemaCheck, SchemaMigrationManager};
use super::rerank::{LateInteractionReranker, RankedGroup};
use crate::core::{collection_name_for, Config, KbError, PrimaryKey, Result};
use crate::schema::{CollectionShape, MediaType, SegmentMeta};
use crate::storage::{IndexBackend, MemoryIndexBackend, SearchFilter, VectorStore};

/// Caller options for [`RetrievalService::search`]
#[derive(Debug, Clone, Serialize)]
pub struct SearchOptions {
    pub top_k: usize,
    pub filter: SearchFilter,
    pub min_score: Option<f32>,
    pub max_score: Option<f32>,
}

impl SearchOptions {
    pub fn top_k(top_k: usize) -> Self {
        Self {
            top_k,
            filter: SearchFilter::default(),
            min_score: None,
            max_score: None,
        }
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_score_range(mut self, min: Option<f32>, max: Option<f32>) -> Self {
        self.min_score = min;
        self.max_score = max;
        self
    }

    fn accepts(&self, score: f32) -> bool {
        self.min_score.map_or(true, |min| score >= min) && self.max_score.map_or(true, |max| score <= max)
    }
}

/// Summary of one knowledge base's collection
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    pub shape: CollectionShape,
    pub rows: usize,
    pub dimension: Option<usize>,
}

pub struct RetrievalService {
    backend: Arc<dyn IndexBackend>,
    config: Config,
    reranker: LateInteractionReranker,
    migrations: SchemaMigrationManager,
    stores: DashMap<String, Arc<VectorStore>>,
}

impl RetrievalService {
    pub fn new(backend: Arc<dyn IndexBackend>, config: Config) -> Self {
        let reranker = LateInteractionReranker::new(config.rerank.clone(), &config.store);
        let migrations = SchemaMigrationManager::new(config.migration.clone());
        Self {
            backend,
            config,
            reranker,
            migrations,
            stores: DashMap::new(),
        }
    }

    /// Service over a [`MemoryIndexBackend`], durable when `storage.data_dir` is set.
    pub async fn from_config(config: Config) -> Result<Self> {
        let backend: Arc<dyn IndexBackend> = match &config.storage.data_dir {
            Some(dir) => Arc::new(
                MemoryIndexBackend::open(dir)
                    .await
                    .map_err(|e| KbError::from_backend("*", "open", e))?,
            ),
            None => Arc::new(MemoryIndexBackend::new()),
        };
        Ok(Self::new(backend, config))
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn FileCatalog>) -> Self {
        self.reranker = self.reranker.with_catalog(catalog);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn IndexBackend> {
        &self.backend
    }

    pub fn reranker(&self) -> &LateInteractionReranker {
        &self.reranker
    }

    pub fn collection_name(&self, kb_id: &str) -> Result<String> {
        collection_name_for(&self.config.storage.collection_prefix, kb_id)
    }

    /// Cached store for `kb_id`, otherwise one bound at the live collection's
    /// dimension, or the configured default when there is no collection yet.
    pub async fn store(&self, kb_id: &str) -> Result<Arc<VectorStore>> {
        let name = self.collection_name(kb_id)?;
        if let Some(store) = self.stores.get(&name) {
            return Ok(Arc::clone(store.value()));
        }
        let store = Arc::new(
            VectorStore::open_live(
                Arc::clone(&self.backend),
                name.clone(),
                self.config.storage.default_dimension,
                self.config.store.clone(),
            )
            .await?,
        );
        self.stores.insert(name, Arc::clone(&store));
        Ok(store)
    }

    /// Store for requests carrying `dimension`-long vectors.
    ///
    /// An existing collection of another dimension is `InvalidInput` and the
    /// cached store is left as it is.
    pub async fn store_with_dimension(&self, kb_id: &str, dimension: usize) -> Result<Arc<VectorStore>> {
        let name = self.collection_name(kb_id)?;
        if let Some(store) = self.stores.get(&name) {
            if store.dimension() == dimension {
                return Ok(Arc::clone(store.value()));
            }
        }

        let store = VectorStore::open_live(
            Arc::clone(&self.backend),
            name.clone(),
            dimension,
            self.config.store.clone(),
        )
        .await?;
        if store.dimension() != dimension {
            return Err(KbError::InvalidInput(format!(
                "vector dimension {} does not match collection {} dimension {}",
                dimension,
                name,
                store.dimension()
            )));
        }

        let store = Arc::new(store);
        self.stores.insert(name, Arc::clone(&store));
        Ok(store)
    }

    /// Store ready for writes: created if missing, migrated if legacy and
    /// `migration.auto_migrate` is on.
    async fn writable_store(&self, kb_id: &str, dimension: usize) -> Result<Arc<VectorStore>> {
        let store = self.store_with_dimension(kb_id, dimension).await?;
        match store.ensure_collection().await {
            Ok(_) => Ok(store),
            Err(KbError::SchemaIncompatible { .. }) if self.config.migration.auto_migrate => {
                let report = self.migrations.migrate(&store).await?;
                if !report.success {
                    warn!("⚠️ {}: {}", report.collection, report.message);
                }
                Ok(store)
            }
            Err(e) => Err(e),
        }
    }

    /// Store all vectors of one group.
    pub async fn insert(
        &self,
        kb_id: &str,
        group_id: &str,
        file_id: &str,
        vectors: Vec<Vec<f32>>,
        media_type: MediaType,
        segment: Option<SegmentMeta>,
    ) -> Result<Vec<PrimaryKey>> {
        let Some(dimension) = vectors.first().map(Vec::len) else {
            return Ok(Vec::new());
        };
        let store = self.writable_store(kb_id, dimension).await?;
        store.insert(group_id, file_id, vectors, media_type, segment).await
    }

    /// One group per page, inserted in page order.
    pub async fn ingest_document(
        &self,
        kb_id: &str,
        file_id: &str,
        pages: Vec<ProducedSegment>,
    ) -> Result<usize> {
        self.ingest_segments(kb_id, file_id, MediaType::Document, pages)
            .await
    }

    /// One group per audio/video segment, timing carried on every vector.
    pub async fn ingest_media(
        &self,
        kb_id: &str,
        file_id: &str,
        media_type: MediaType,
        segments: Vec<ProducedSegment>,
    ) -> Result<usize> {
        if !media_type.is_time_based() {
            return Err(KbError::InvalidInput(format!(
                "{media_type} is not an audio or video media type"
            )));
        }
        self.ingest_segments(kb_id, file_id, media_type, segments)
            .await
    }

    /// Run `producer` for one file and store what it returns.
    pub async fn ingest_with(
        &self,
        kb_id: &str,
        file_id: &str,
        media_type: MediaType,
        producer: &dyn EmbeddingProducer,
    ) -> Result<usize> {
        let segments = producer.produce(file_id).await?;
        debug!("producer returned {} segments for file {}", segments.len(), file_id);
        self.ingest_segments(kb_id, file_id, media_type, segments)
            .await
    }

    async fn ingest_segments(
        &self,
        kb_id: &str,
        file_id: &str,
        media_type: MediaType,
        segments: Vec<ProducedSegment>,
    ) -> Result<usize> {
        let mut inserted = 0;
        for (i, segment) in segments.into_iter().enumerate() {
            let group_id = if segment.group_id.is_empty() {
                format!("{file_id}_{i}")
            } else {
                segment.group_id
            };
            let timing = if media_type.is_time_based() {
                segment.timing
            } else {
                None
            };
            inserted += self
                .insert(kb_id, &group_id, file_id, segment.vectors, media_type, timing)
                .await?
                .len();
        }
        info!("📥 Ingested {} vectors for file {} into {}", inserted, file_id, kb_id);
        Ok(inserted)
    }

    /// Search several knowledge bases and merge the ranked groups.
    ///
    /// Knowledge bases without a collection contribute nothing.
    pub async fn search(
        &self,
        kb_ids: &[String],
        queries: &[Vec<f32>],
        options: &SearchOptions,
    ) -> Result<Vec<RankedGroup>> {
        let Some(dimension) = queries.first().map(Vec::len) else {
            return Ok(Vec::new());
        };

        let searches = kb_ids.iter().map(|kb_id| async move {
            let store = self.store_with_dimension(kb_id, dimension).await?;
            match self
                .reranker
                .search(&store, queries, options.top_k, &options.filter)
                .await
            {
                Ok(groups) => Ok(groups
                    .into_iter()
                    .map(|mut g| {
                        g.collection = Some(store.name().to_string());
                        g
                    })
                    .collect()),
                Err(KbError::CollectionNotFound(name)) => {
                    debug!("no collection {} yet, skipping", name);
                    Ok(Vec::new())
                }
                Err(e) => Err(e),
            }
        });

        let mut merged: Vec<RankedGroup> = Vec::new();
        for result in join_all(searches).await {
            merged.extend(result?);
        }

        merged.retain(|g| options.accepts(g.score));
        merged.sort_by(|a, b| b.score.total_cmp(&a.score));
        merged.truncate(options.top_k);
        Ok(merged)
    }

    /// Remove every vector of the given files.
    pub async fn delete_files(&self, kb_id: &str, file_ids: &[String]) -> Result<usize> {
        let ids: HashSet<String> = file_ids.iter().cloned().collect();
        let store = self.store(kb_id).await?;
        match store.delete_by_file_ids(&ids).await {
            Err(KbError::CollectionNotFound(_)) => Ok(0),
            other => other,
        }
    }

    /// Drop the collection of `kb_id`; `false` if it did not exist.
    pub async fn drop_knowledge_base(&self, kb_id: &str) -> Result<bool> {
        let store = self.store(kb_id).await?;
        let dropped = store.drop_collection().await?;
        self.stores.remove(store.name());
        Ok(dropped)
    }

    pub async fn migrate(&self, kb_id: &str, dimension: usize) -> Result<MigrationReport> {
        let store = self.store_with_dimension(kb_id, dimension).await?;
        self.migrations.migrate(&store).await
    }

    pub async fn check(&self, kb_id: &str) -> Result<SchemaCheck> {
        let store = self.store(kb_id).await?;
        self.migrations.check(&store).await
    }

    pub async fn restore_from_backup(
        &self,
        kb_id: &str,
        dimension: usize,
        path: &std::path::Path,
    ) -> Result<MigrationReport> {
        let store = self.store_with_dimension(kb_id, dimension).await?;
        self.migrations.restore_from_backup(&store, path).await
    }

    pub async fn stats(&self, kb_id: &str) -> Result<CollectionStats> {
        let store = self.store(kb_id).await?;
        let shape = store.refresh_shape().await?;
        let (rows, dimension) = match shape {
            CollectionShape::Missing => (0, None),
            _ => {
                let schema = store.describe().await?;
                (store.row_count().await?, schema.dimension())
            }
        };
        Ok(CollectionStats {
            collection: store.name().to_string(),
            shape,
            rows,
            dimension,
        })
    }

    /// Flush every opened store.
    pub async fn close(&self) -> Result<()> {
        let stores: Vec<Arc<VectorStore>> = self.stores.iter().map(|e| Arc::clone(e.value())).collect();
        for store in stores {
            store.close().await?;
        }
        Ok(())
    }
}
