// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! In-Memory Index Backend
//!
//! In-process backend with one HNSW graph per collection. Rows are kept as
//! field maps exactly as inserted, so a collection created with an older
//! schema stays that shape until it is dropped and recreated.
//!
//! With a data directory every collection is snapshotted on `flush` and
//! reloaded by [`MemoryIndexBackend::open`]. Without one, nothing touches disk.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::snapshot::{self, CollectionSnapshot};
use super::{BackendHit, BackendResult, IndexBackend, OutputFields, QueryRequest, SearchRequest};
use crate::core::{BackendError, PrimaryKey};
use crate::schema::collection::FIELD_VECTOR;
use crate::schema::{CollectionSchema, IndexParams, StoredRow};
use crate::storage::filter::Filter;
use crate::storage::indexing::hnsw::{HnswConfig, HnswGraph};

struct CollectionState {
    schema: CollectionSchema,
    dimension: usize,
    index: Option<IndexParams>,
    graph: Option<HnswGraph>,
    loaded: bool,
    rows: BTreeMap<PrimaryKey, StoredRow>,
    next_pk: PrimaryKey,
}

impl CollectionState {
    fn new(schema: CollectionSchema) -> BackendResult<Self> {
        let dimension = schema
            .dimension()
            .ok_or_else(|| BackendError::InvalidRow(format!("{} has no vector field", schema.name)))?;
        Ok(Self {
            schema,
            dimension,
            index: None,
            graph: None,
            loaded: false,
            rows: BTreeMap::new(),
            next_pk: 1,
        })
    }

    fn from_snapshot(snapshot: CollectionSnapshot) -> BackendResult<Self> {
        let mut state = Self::new(snapshot.schema)?;
        state.next_pk = snapshot.next_pk;
        state.rows = snapshot
            .rows
            .into_iter()
            .filter_map(|row| row.pk.map(|pk| (pk, row)))
            .collect();
        if let Some(params) = snapshot.index {
            state.build_index(params);
        }
        state.loaded = snapshot.loaded;
        Ok(state)
    }

    fn to_snapshot(&self) -> CollectionSnapshot {
        CollectionSnapshot {
            schema: self.schema.clone(),
            index: self.index.clone(),
            loaded: self.loaded,
            next_pk: self.next_pk,
            rows: self.rows.values().cloned().collect(),
        }
    }

    fn build_index(&mut self, params: IndexParams) {
        let mut graph = HnswGraph::new(HnswConfig::from_params(&params), params.metric);
        for (pk, row) in &self.rows {
            if let Some(vector) = row.vector() {
                graph.insert(*pk, vector.to_vec());
            }
        }
        self.graph = Some(graph);
        self.index = Some(params);
    }

    fn check_field(&self, field: &str) -> BackendResult<()> {
        if self.schema.has_field(field) {
            Ok(())
        } else {
            Err(BackendError::UnknownField {
                collection: self.schema.name.clone(),
                field: field.to_string(),
            })
        }
    }

    fn check_filter(&self, filter: Option<&Filter>) -> BackendResult<()> {
        if let Some(filter) = filter {
            for field in filter.fields() {
                self.check_field(field)?;
            }
        }
        Ok(())
    }

    fn check_output(&self, output: &OutputFields) -> BackendResult<()> {
        if let Some(names) = output.names() {
            for name in names {
                self.check_field(name)?;
            }
        }
        Ok(())
    }

    fn check_row(&self, row: &StoredRow) -> BackendResult<()> {
        for name in row.fields.keys() {
            self.check_field(name)?;
        }
        let vector = row
            .vector()
            .ok_or_else(|| BackendError::InvalidRow(format!("row lacks '{FIELD_VECTOR}'")))?;
        self.check_dimension(vector.len())
    }

    fn check_dimension(&self, actual: usize) -> BackendResult<()> {
        if actual == self.dimension {
            Ok(())
        } else {
            Err(BackendError::DimensionMismatch {
                expected: self.dimension,
                actual,
            })
        }
    }

    fn searchable(&self) -> BackendResult<(&HnswGraph, &IndexParams)> {
        match (&self.graph, &self.index) {
            (Some(graph), Some(params)) if self.loaded => Ok((graph, params)),
            _ => Err(BackendError::NotLoaded(self.schema.name.clone())),
        }
    }
}

fn project(row: &StoredRow, output: &OutputFields) -> StoredRow {
    match output.names() {
        None => row.clone(),
        Some(names) => row.project(names),
    }
}

/// In-memory index backend
pub struct MemoryIndexBackend {
    collections: RwLock<HashMap<String, CollectionState>>,
    data_dir: Option<PathBuf>,
}

impl Default for MemoryIndexBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndexBackend {
    /// Volatile backend.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            data_dir: None,
        }
    }

    /// Durable backend rooted at `data_dir`, restoring any existing snapshots.
    pub async fn open(data_dir: impl AsRef<Path>) -> BackendResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let snapshots = snapshot::read_all(&data_dir).await?;

        let mut collections = HashMap::new();
        for snap in snapshots {
            let name = snap.schema.name.clone();
            let state = CollectionState::from_snapshot(snap)?;
            debug!("restored collection {} with {} rows", name, state.rows.len());
            collections.insert(name, state);
        }
        info!(
            "opened index backend at {} ({} collections)",
            data_dir.display(),
            collections.len()
        );

        Ok(Self {
            collections: RwLock::new(collections),
            data_dir: Some(data_dir),
        })
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    fn with_collection<T>(
        &self,
        name: &str,
        f: impl FnOnce(&CollectionState) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let collections = self.collections.read();
        let state = collections
            .get(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        f(state)
    }

    fn with_collection_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut CollectionState) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut collections = self.collections.write();
        let state = collections
            .get_mut(name)
            .ok_or_else(|| BackendError::CollectionNotFound(name.to_string()))?;
        f(state)
    }
}

#[async_trait]
impl IndexBackend for MemoryIndexBackend {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn has_collection(&self, name: &str) -> BackendResult<bool> {
        Ok(self.collections.read().contains_key(name))
    }

    async fn describe_collection(&self, name: &str) -> BackendResult<CollectionSchema> {
        self.with_collection(name, |state| Ok(state.schema.clone()))
    }

    async fn create_collection(&self, schema: CollectionSchema) -> BackendResult<()> {
        let mut collections = self.collections.write();
        if collections.contains_key(&schema.name) {
            return Err(BackendError::CollectionExists(schema.name));
        }
        let name = schema.name.clone();
        collections.insert(name.clone(), CollectionState::new(schema)?);
        debug!("created collection {}", name);
        Ok(())
    }

    async fn create_index(&self, name: &str, params: IndexParams) -> BackendResult<()> {
        self.with_collection_mut(name, |state| {
            state.check_field(&params.field)?;
            state.build_index(params);
            Ok(())
        })
    }

    async fn load_collection(&self, name: &str) -> BackendResult<()> {
        self.with_collection_mut(name, |state| {
            if state.graph.is_none() {
                return Err(BackendError::NotLoaded(format!("{name} has no index")));
            }
            state.loaded = true;
            Ok(())
        })
    }

    async fn drop_collection(&self, name: &str) -> BackendResult<()> {
        let removed = self.collections.write().remove(name);
        if removed.is_none() {
            return Err(BackendError::CollectionNotFound(name.to_string()));
        }
        if let Some(dir) = &self.data_dir {
            snapshot::remove(dir, name).await?;
        }
        debug!("dropped collection {}", name);
        Ok(())
    }

    async fn list_collections(&self) -> BackendResult<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn insert(&self, name: &str, rows: Vec<StoredRow>) -> BackendResult<Vec<PrimaryKey>> {
        self.with_collection_mut(name, |state| {
            for row in &rows {
                state.check_row(row)?;
            }

            let mut keys = Vec::with_capacity(rows.len());
            for mut row in rows {
                let pk = state.next_pk;
                state.next_pk += 1;
                row.pk = Some(pk);
                if let (Some(graph), Some(vector)) = (state.graph.as_mut(), row.vector()) {
                    graph.insert(pk, vector.to_vec());
                }
                state.rows.insert(pk, row);
                keys.push(pk);
            }
            Ok(keys)
        })
    }

    async fn delete(&self, name: &str, filter: &Filter) -> BackendResult<usize> {
        self.with_collection_mut(name, |state| {
            state.check_filter(Some(filter))?;
            let doomed: Vec<PrimaryKey> = state
                .rows
                .iter()
                .filter(|(_, row)| filter.matches(row))
                .map(|(pk, _)| *pk)
                .collect();
            for pk in &doomed {
                state.rows.remove(pk);
                if let Some(graph) = state.graph.as_mut() {
                    graph.remove(*pk);
                }
            }
            Ok(doomed.len())
        })
    }

    async fn search(&self, name: &str, request: SearchRequest) -> BackendResult<Vec<Vec<BackendHit>>> {
        self.with_collection(name, |state| {
            let (graph, params) = state.searchable()?;
            state.check_output(&request.output_fields)?;
            state.check_filter(request.filter.as_ref())?;

            let mut results = Vec::with_capacity(request.queries.len());
            for query in &request.queries {
                state.check_dimension(query.len())?;

                let scored: Vec<(PrimaryKey, f32)> = match &request.filter {
                    None => graph.search(query, request.limit, request.ef),
                    Some(filter) => {
                        let mut matching: Vec<(PrimaryKey, f32)> = state
                            .rows
                            .iter()
                            .filter(|(_, row)| filter.matches(row))
                            .filter_map(|(pk, row)| {
                                row.vector().map(|v| (*pk, params.metric.similarity(query, v)))
                            })
                            .collect();
                        matching.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
                        matching.truncate(request.limit);
                        matching
                    }
                };

                let hits = scored
                    .into_iter()
                    .filter_map(|(pk, score)| {
                        state.rows.get(&pk).map(|row| BackendHit {
                            pk,
                            score,
                            row: project(row, &request.output_fields),
                        })
                    })
                    .collect();
                results.push(hits);
            }
            Ok(results)
        })
    }

    async fn query(&self, name: &str, request: QueryRequest) -> BackendResult<Vec<StoredRow>> {
        self.with_collection(name, |state| {
            state.check_output(&request.output_fields)?;
            state.check_filter(request.filter.as_ref())?;

            Ok(state
                .rows
                .values()
                .filter(|row| request.filter.as_ref().map_or(true, |f| f.matches(row)))
                .skip(request.offset)
                .take(request.limit)
                .map(|row| project(row, &request.output_fields))
                .collect())
        })
    }

    async fn row_count(&self, name: &str) -> BackendResult<usize> {
        self.with_collection(name, |state| Ok(state.rows.len()))
    }

    async fn flush(&self, name: &str) -> BackendResult<()> {
        let bytes = self.with_collection(name, |state| match &self.data_dir {
            Some(_) => snapshot::encode(&state.to_snapshot()).map(Some),
            None => Ok(None),
        })?;

        if let (Some(dir), Some(bytes)) = (&self.data_dir, bytes) {
            snapshot::write(dir, name, &bytes).await?;
        }
        Ok(())
    }
}
