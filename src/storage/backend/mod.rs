// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Index backends
//!
//! [`IndexBackend`] is the seam between the knowledge-base layer and the
//! engine that actually stores rows and answers approximate nearest-neighbor
//! queries. Backends speak raw [`StoredRow`]s and [`BackendError`]s; typed
//! records and domain errors live above this line.

pub mod memory;
pub mod snapshot;

use async_trait::async_trait;

use crate::core::{BackendError, PrimaryKey};
use crate::schema::{CollectionSchema, IndexParams, StoredRow};
use crate::storage::filter::Filter;

pub use memory::MemoryIndexBackend;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Fields to return with each row
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFields {
    All,
    Named(Vec<String>),
}

impl OutputFields {
    pub fn names(&self) -> Option<&[String]> {
        match self {
            OutputFields::All => None,
            OutputFields::Named(names) => Some(names),
        }
    }
}

/// Approximate nearest-neighbor request, one result list per query vector
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub queries: Vec<Vec<f32>>,
    pub limit: usize,
    pub filter: Option<Filter>,
    pub output_fields: OutputFields,
    /// Overrides the index search width
    pub ef: Option<usize>,
}

/// Scalar query, rows ordered by primary key
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub filter: Option<Filter>,
    pub output_fields: OutputFields,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendHit {
    pub pk: PrimaryKey,
    pub score: f32,
    pub row: StoredRow,
}

/// Vector index engine
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Backend name for identification
    fn backend_name(&self) -> &'static str;

    async fn has_collection(&self, name: &str) -> BackendResult<bool>;

    async fn describe_collection(&self, name: &str) -> BackendResult<CollectionSchema>;

    /// Fails with `CollectionExists` if the name is taken.
    async fn create_collection(&self, schema: CollectionSchema) -> BackendResult<()>;

    async fn create_index(&self, name: &str, params: IndexParams) -> BackendResult<()>;

    /// Make an indexed collection searchable.
    async fn load_collection(&self, name: &str) -> BackendResult<()>;

    async fn drop_collection(&self, name: &str) -> BackendResult<()>;

    async fn list_collections(&self) -> BackendResult<Vec<String>>;

    /// All-or-nothing; returns the assigned primary keys in input order.
    async fn insert(&self, name: &str, rows: Vec<StoredRow>) -> BackendResult<Vec<PrimaryKey>>;

    /// Returns the number of rows removed.
    async fn delete(&self, name: &str, filter: &Filter) -> BackendResult<usize>;

    async fn search(&self, name: &str, request: SearchRequest) -> BackendResult<Vec<Vec<BackendHit>>>;

    async fn query(&self, name: &str, request: QueryRequest) -> BackendResult<Vec<StoredRow>>;

    async fn row_count(&self, name: &str) -> BackendResult<usize>;

    /// Persist pending writes, where the backend is durable.
    async fn flush(&self, name: &str) -> BackendResult<()>;
}
