// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Collaborator contracts
//!
//! The file catalog resolves a stored group back to display metadata; the
//! embedding producer turns raw content into vectors. Both live outside this
//! crate. [`InMemoryFileCatalog`] is a map-backed catalog for tests and for
//! the operator binary.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::schema::SegmentMeta;

/// Display metadata of a source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_id: String,
    pub filename: String,
    pub storage_url: String,
    pub knowledge_base_id: String,
}

#[async_trait]
pub trait FileCatalog: Send + Sync {
    /// `Ok(None)` means the file is known not to exist: its vectors are
    /// dangling and may be deleted. `Err` means the lookup itself failed.
    async fn lookup(
        &self,
        file_id: &str,
        group_id: &str,
        segment_id: Option<&str>,
    ) -> Result<Option<FileMetadata>>;
}

/// One unit of producer output: all vectors of one group
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedSegment {
    pub group_id: String,
    pub vectors: Vec<Vec<f32>>,
    /// Present for audio/video segments
    pub timing: Option<SegmentMeta>,
}

#[async_trait]
pub trait EmbeddingProducer: Send + Sync {
    /// Ordered segments for one file. May be slow; an error fails the file.
    async fn produce(&self, file_id: &str) -> Result<Vec<ProducedSegment>>;
}

#[derive(Debug, Default)]
pub struct InMemoryFileCatalog {
    files: DashMap<String, FileMetadata>,
}

impl InMemoryFileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, metadata: FileMetadata) {
        self.files.insert(metadata.file_id.clone(), metadata);
    }

    pub fn register_file(&self, file_id: &str, filename: &str, knowledge_base_id: &str) {
        self.register(FileMetadata {
            file_id: file_id.to_string(),
            filename: filename.to_string(),
            storage_url: format!("kb://{knowledge_base_id}/{file_id}"),
            knowledge_base_id: knowledge_base_id.to_string(),
        });
    }

    pub fn remove(&self, file_id: &str) -> Option<FileMetadata> {
        self.files.remove(file_id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl FileCatalog for InMemoryFileCatalog {
    async fn lookup(
        &self,
        file_id: &str,
        _group_id: &str,
        _segment_id: Option<&str>,
    ) -> Result<Option<FileMetadata>> {
        Ok(self.files.get(file_id).map(|entry| entry.value().clone()))
    }
}
