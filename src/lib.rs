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

//! # kbvec - multi-vector knowledge-base retrieval core
//!
//! Stores per-document multi-vector embeddings (one vector per page, frame
//! or segment) and answers queries in two phases: approximate search at
//! vector granularity, then exact late-interaction rerank at group
//! granularity.
//!
//! ## Layout
//!
//! - [`schema`]: stored row shape, record codec with schema-evolution defaults
//! - [`storage`]: index backends, HNSW graph, filters, [`storage::VectorStore`]
//! - [`compute`]: inner product and late-interaction scoring
//! - [`services`]: reranker, schema migration, [`services::RetrievalService`]
//! - [`core`]: configuration, errors, identifiers

pub mod compute;
pub mod core;
pub mod schema;
pub mod services;
pub mod storage;

pub use crate::core::{Config, KbError, Result};
pub use schema::{MediaType, SegmentMeta, VectorRecord};
pub use services::{
    LateInteractionReranker, MigrationReport, RankedGroup, RetrievalService, SchemaMigrationManager, SearchOptions,
};
pub use storage::{IndexBackend, MemoryIndexBackend, SearchFilter, TimeRange, VectorStore};
