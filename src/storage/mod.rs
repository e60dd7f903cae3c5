// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Storage layer: index backends, the HNSW graph, filters and the
//! collection-bound [`VectorStore`].

pub mod backend;
pub mod filter;
pub mod indexing;
pub mod store;

pub use backend::{BackendHit, IndexBackend, MemoryIndexBackend, OutputFields, QueryRequest, SearchRequest};
pub use filter::{FieldCondition, Filter, SearchFilter, TimeRange};
pub use store::{VectorHit, VectorStore};
