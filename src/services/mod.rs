// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Services layer: reranking, schema migration and the retrieval facade

pub mod catalog;
pub mod migration;
pub mod rerank;
pub mod retrieval;

pub use catalog::{EmbeddingProducer, FileCatalog, FileMetadata, InMemoryFileCatalog, ProducedSegment};
pub use migration::{MigrationOutcome, MigrationReport, SchemaCheck, SchemaMigrationManager, ValidationReport};
pub use rerank::{LateInteractionReranker, RankedGroup};
pub use retrieval::{CollectionStats, RetrievalService, SearchOptions};
