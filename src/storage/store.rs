// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! VectorStore
//!
//! Owns one collection on an [`IndexBackend`] and is the only component that
//! calls it. Every backend call is bounded by the configured operation
//! timeout and every backend error is translated into a [`KbError`] here.
//!
//! The live collection shape is detected when the store is opened and cached.
//! Reads dispatch on the cached shape: current collections are searched with
//! the full field set and a backend-side filter; legacy collections are read
//! with the legacy field set, decoded with defaults, and filtered in process.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::{BackendError, KbError, PrimaryKey, Result, StoreConfig};
use crate::schema::{CollectionSchema, CollectionShape, IndexParams, MediaType, SegmentMeta, StoredRow, VectorRecord};
use crate::storage::backend::{IndexBackend, OutputFields, QueryRequest, SearchRequest};
use crate::storage::filter::{Filter, SearchFilter};

/// One coarse search hit
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub score: f32,
    pub record: VectorRecord,
}

pub struct VectorStore {
    backend: Arc<dyn IndexBackend>,
    collection: String,
    dimension: usize,
    config: StoreConfig,
    shape: RwLock<CollectionShape>,
}

impl VectorStore {
    /// Bind to `collection` and detect its shape.
    pub async fn open(
        backend: Arc<dyn IndexBackend>,
        collection: impl Into<String>,
        dimension: usize,
        config: StoreConfig,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(KbError::InvalidInput("dimension must be positive".to_string()));
        }
        let store = Self {
            backend,
            collection: collection.into(),
            dimension,
            config,
            shape: RwLock::new(CollectionShape::Missing),
        };
        let shape = store.refresh_shape().await?;
        debug!(
            "opened store for {} on {} backend ({:?})",
            store.collection,
            store.backend.backend_name(),
            shape
        );
        Ok(store)
    }

    /// Like [`Self::open`], but an existing collection's own dimension wins;
    /// `dimension` only applies to a collection that does not exist yet.
    pub async fn open_live(
        backend: Arc<dyn IndexBackend>,
        collection: impl Into<String>,
        dimension: usize,
        config: StoreConfig,
    ) -> Result<Self> {
        let store = Self::open(backend, collection, dimension, config).await?;
        if store.shape() == CollectionShape::Missing {
            return Ok(store);
        }
        match store.live_dimension().await? {
            Some(live) if live != store.dimension => {
                debug!(
                    "collection {} has dimension {}, adopting it over {}",
                    store.collection, live, store.dimension
                );
                Ok(Self {
                    dimension: live,
                    ..store
                })
            }
            _ => Ok(store),
        }
    }

    /// Vector dimension of the live collection, `None` when it does not exist.
    pub async fn live_dimension(&self) -> Result<Option<usize>> {
        match self.describe().await {
            Ok(schema) => Ok(schema.dimension()),
            Err(KbError::CollectionNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn name(&self) -> &str {
        &self.collection
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Cached shape as of the last detection.
    pub fn shape(&self) -> CollectionShape {
        *self.shape.read()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Run one backend call under the operation timeout.
    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.config.operation_timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(BackendError::CollectionNotFound(name))) => {
                *self.shape.write() = CollectionShape::Missing;
                Err(KbError::CollectionNotFound(name))
            }
            Ok(Err(err)) => Err(KbError::from_backend(&self.collection, operation, err)),
            Err(_) => Err(KbError::StoreUnavailable {
                collection: self.collection.clone(),
                operation,
                reason: format!("timed out after {}ms", self.config.operation_timeout_ms),
            }),
        }
    }

    /// Describe the live collection and cache its shape.
    pub async fn refresh_shape(&self) -> Result<CollectionShape> {
        let shape = match self
            .call("describe", self.backend.describe_collection(&self.collection))
            .await
        {
            Ok(schema) => {
                if let Some(live) = schema.dimension() {
                    if live != self.dimension {
                        warn!(
                            "collection {} has dimension {}, store expects {}",
                            self.collection, live, self.dimension
                        );
                    }
                }
                schema.shape()
            }
            Err(KbError::CollectionNotFound(_)) => CollectionShape::Missing,
            Err(e) => return Err(e),
        };
        *self.shape.write() = shape;
        Ok(shape)
    }

    /// Live schema; `CollectionNotFound` when absent.
    pub async fn describe(&self) -> Result<CollectionSchema> {
        self.call("describe", self.backend.describe_collection(&self.collection))
            .await
    }

    pub async fn exists(&self) -> Result<bool> {
        self.call("has_collection", self.backend.has_collection(&self.collection))
            .await
    }

    /// Create the collection with the current shape if it does not exist.
    ///
    /// Returns `true` when a collection was created. An existing current
    /// collection is left alone; an existing legacy collection is reported as
    /// `SchemaIncompatible` so the caller can run a migration instead.
    pub async fn ensure_collection(&self) -> Result<bool> {
        match self.refresh_shape().await? {
            CollectionShape::Current => Ok(false),
            CollectionShape::Legacy => {
                let schema = self.describe().await?;
                Err(KbError::SchemaIncompatible {
                    collection: self.collection.clone(),
                    missing_fields: schema.missing_fields(),
                })
            }
            CollectionShape::Missing => {
                self.create_fresh().await?;
                Ok(true)
            }
        }
    }

    pub async fn create_collection(&self) -> Result<()> {
        self.ensure_collection().await.map(|_| ())
    }

    async fn create_fresh(&self) -> Result<()> {
        info!("🆕 Creating collection {} (dim {})", self.collection, self.dimension);
        let schema = CollectionSchema::current(&self.collection, self.dimension);
        self.call("create_collection", self.backend.create_collection(schema))
            .await?;

        let index = &self.config.index;
        let params = IndexParams::hnsw(index.m, index.ef_construction, index.ef_search);
        let built = async {
            self.backend.create_index(&self.collection, params).await?;
            self.backend.load_collection(&self.collection).await
        };
        let reason = match tokio::time::timeout(self.config.operation_timeout(), built).await {
            Ok(Ok(())) => {
                *self.shape.write() = CollectionShape::Current;
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "index build timed out".to_string(),
        };

        // An unindexed collection would look current to the next attempt.
        self.discard_unbuilt().await;
        Err(KbError::StoreUnavailable {
            collection: self.collection.clone(),
            operation: "create_index",
            reason,
        })
    }

    async fn discard_unbuilt(&self) {
        warn!("⚠️ Index build for {} failed, dropping the empty collection", self.collection);
        match self
            .call("drop_collection", self.backend.drop_collection(&self.collection))
            .await
        {
            Ok(()) | Err(KbError::CollectionNotFound(_)) => {}
            Err(e) => error!("could not drop unbuilt collection {}: {}", self.collection, e),
        }
        *self.shape.write() = CollectionShape::Missing;
    }

    /// Returns `false` when there was nothing to drop.
    pub async fn drop_collection(&self) -> Result<bool> {
        match self
            .call("drop_collection", self.backend.drop_collection(&self.collection))
            .await
        {
            Ok(()) => {
                info!("🗑️ Dropped collection {}", self.collection);
                *self.shape.write() = CollectionShape::Missing;
                Ok(true)
            }
            Err(KbError::CollectionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn check_dimension(&self, vectors: &[Vec<f32>]) -> Result<()> {
        match vectors.iter().find(|v| v.len() != self.dimension) {
            Some(v) => Err(KbError::InvalidInput(format!(
                "vector dimension {} does not match collection {} dimension {}",
                v.len(),
                self.collection,
                self.dimension
            ))),
            None => Ok(()),
        }
    }

    fn require_current(&self) -> Result<()> {
        match self.shape() {
            CollectionShape::Current => Ok(()),
            CollectionShape::Missing => Err(KbError::CollectionNotFound(self.collection.clone())),
            CollectionShape::Legacy => Err(KbError::SchemaIncompatible {
                collection: self.collection.clone(),
                missing_fields: crate::schema::EXTENDED_FIELDS.iter().map(|f| f.to_string()).collect(),
            }),
        }
    }

    /// Store one group, one record per vector, in a single bulk insert.
    pub async fn insert(
        &self,
        group_id: &str,
        file_id: &str,
        vectors: Vec<Vec<f32>>,
        media_type: MediaType,
        segment: Option<SegmentMeta>,
    ) -> Result<Vec<PrimaryKey>> {
        if group_id.is_empty() || file_id.is_empty() {
            return Err(KbError::InvalidInput("group_id and file_id are required".to_string()));
        }
        if vectors.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimension(&vectors)?;

        let records = VectorRecord::batch(group_id, file_id, vectors, media_type, segment);
        let keys = self.insert_records(records).await?;
        debug!("inserted {} vectors for group {} into {}", keys.len(), group_id, self.collection);
        Ok(keys)
    }

    /// Bulk insert pre-built records into a current-shape collection.
    pub async fn insert_records(&self, records: Vec<VectorRecord>) -> Result<Vec<PrimaryKey>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if self.shape() == CollectionShape::Missing {
            self.refresh_shape().await?;
        }
        self.require_current()?;

        let rows = records
            .iter()
            .map(|r| {
                let mut row = r.to_row(CollectionShape::Current);
                row.pk = None;
                row
            })
            .collect();
        self.call("insert", self.backend.insert(&self.collection, rows))
            .await
    }

    /// Remove every record whose `file_id` is in `file_ids`.
    pub async fn delete_by_file_ids(&self, file_ids: &HashSet<String>) -> Result<usize> {
        if file_ids.is_empty() {
            return Ok(0);
        }
        let filter = Filter::files(file_ids);
        let removed = self
            .call("delete", self.backend.delete(&self.collection, &filter))
            .await?;
        info!("🗑️ Deleted {} vectors for {} files from {}", removed, file_ids.len(), self.collection);
        Ok(removed)
    }

    /// Coarse search: per query vector, up to `coarse_limit` nearest records.
    pub async fn search(
        &self,
        queries: &[Vec<f32>],
        coarse_limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<Vec<VectorHit>>> {
        if queries.is_empty() || coarse_limit == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(queries)?;

        let mut shape = self.shape();
        if shape == CollectionShape::Missing {
            shape = self.refresh_shape().await?;
        }

        match shape {
            CollectionShape::Missing => Err(KbError::CollectionNotFound(self.collection.clone())),
            CollectionShape::Legacy => self.search_legacy(queries, coarse_limit, filter).await,
            CollectionShape::Current => match self.search_current(queries, coarse_limit, filter).await {
                Err(KbError::SchemaIncompatible { missing_fields, .. }) => {
                    // The collection was replaced under us; re-detect once.
                    warn!(
                        "search on {} hit unknown fields {:?}, re-detecting shape",
                        self.collection, missing_fields
                    );
                    match self.refresh_shape().await? {
                        CollectionShape::Legacy => self.search_legacy(queries, coarse_limit, filter).await,
                        _ => Err(KbError::SchemaIncompatible {
                            collection: self.collection.clone(),
                            missing_fields,
                        }),
                    }
                }
                other => other,
            },
        }
    }

    async fn search_current(
        &self,
        queries: &[Vec<f32>],
        coarse_limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<Vec<VectorHit>>> {
        let request = SearchRequest {
            queries: queries.to_vec(),
            limit: coarse_limit,
            filter: filter.to_filter(),
            output_fields: OutputFields::Named(CollectionShape::Current.output_fields()),
            ef: None,
        };
        let results = self
            .call("search", self.backend.search(&self.collection, request))
            .await?;

        results
            .into_iter()
            .map(|hits| {
                hits.into_iter()
                    .map(|hit| -> Result<VectorHit> {
                        Ok(VectorHit {
                            score: hit.score,
                            record: VectorRecord::from_row(&hit.row)?,
                        })
                    })
                    .collect()
            })
            .collect()
    }

    async fn search_legacy(
        &self,
        queries: &[Vec<f32>],
        coarse_limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<Vec<VectorHit>>> {
        debug!("legacy search on {}", self.collection);
        let request = SearchRequest {
            queries: queries.to_vec(),
            limit: coarse_limit,
            filter: None,
            output_fields: OutputFields::Named(CollectionShape::Legacy.output_fields()),
            ef: None,
        };
        let results = self
            .call("search", self.backend.search(&self.collection, request))
            .await?;

        let mut decoded = Vec::with_capacity(results.len());
        for hits in results {
            let mut kept = Vec::with_capacity(hits.len());
            for hit in hits {
                let record = VectorRecord::from_row(&hit.row)?;
                if filter.matches(&record) {
                    kept.push(VectorHit {
                        score: hit.score,
                        record,
                    });
                }
            }
            decoded.push(kept);
        }
        Ok(decoded)
    }

    /// Up to `cap` records of one group, in no particular order.
    pub async fn fetch_group(&self, group_id: &str, cap: usize) -> Result<Vec<VectorRecord>> {
        let shape = match self.shape() {
            CollectionShape::Missing => CollectionShape::Legacy,
            shape => shape,
        };
        let request = QueryRequest {
            filter: Some(Filter::group(group_id)),
            output_fields: OutputFields::Named(shape.output_fields()),
            offset: 0,
            limit: cap,
        };
        let rows = self
            .call("fetch_group", self.backend.query(&self.collection, request))
            .await?;
        rows.iter()
            .map(|row| VectorRecord::from_row(row).map_err(KbError::from))
            .collect()
    }

    /// Raw rows in key order, every stored field included.
    pub async fn scan(&self, offset: usize, limit: usize) -> Result<Vec<StoredRow>> {
        let request = QueryRequest {
            filter: None,
            output_fields: OutputFields::All,
            offset,
            limit,
        };
        self.call("scan", self.backend.query(&self.collection, request))
            .await
    }

    pub async fn row_count(&self) -> Result<usize> {
        self.call("row_count", self.backend.row_count(&self.collection))
            .await
    }

    pub async fn flush(&self) -> Result<()> {
        self.call("flush", self.backend.flush(&self.collection)).await
    }

    /// Flush pending writes. A collection that no longer exists is not an error.
    pub async fn close(&self) -> Result<()> {
        match self.flush().await {
            Ok(()) | Err(KbError::CollectionNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
