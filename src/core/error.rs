// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Error types for the retrieval core
//!
//! Three layers, each with its own enum:
//! - [`BackendError`] is what an index backend reports.
//! - [`CodecError`] is raised while decoding stored rows into records.
//! - [`KbError`] is the public taxonomy every service returns. Backend errors
//!   are translated into it exactly once, at the `VectorStore` boundary, with
//!   the collection name and operation attached.

use thiserror::Error;

/// Result alias used by the public services
pub type Result<T> = std::result::Result<T, KbError>;

/// Errors reported by an index backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Unknown field '{field}' in collection {collection}")]
    UnknownField { collection: String, field: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Collection {0} is not loaded")]
    NotLoaded(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for BackendError {
    fn from(err: bincode::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

/// Errors raised while decoding a stored row into a `VectorRecord`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Field '{field}' has wrong type, expected {expected}")]
    TypeMismatch { field: String, expected: &'static str },

    #[error("Unknown media type: {0}")]
    UnknownMediaType(String),
}

/// Migration phase in which a data-loss condition was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Backup,
    DropAndRecreate,
    Restore,
    Validate,
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MigrationPhase::Backup => "backup",
            MigrationPhase::DropAndRecreate => "drop-and-recreate",
            MigrationPhase::Restore => "restore",
            MigrationPhase::Validate => "validate",
        };
        f.write_str(name)
    }
}

/// Public error taxonomy
#[derive(Error, Debug)]
pub enum KbError {
    /// Transient; the caller may retry.
    #[error("Store unavailable during {operation} on {collection}: {reason}")]
    StoreUnavailable {
        collection: String,
        operation: &'static str,
        reason: String,
    },

    /// Search callers treat this as an empty result.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection {collection} is missing fields {missing_fields:?}")]
    SchemaIncompatible {
        collection: String,
        missing_fields: Vec<String>,
    },

    #[error("Migration of {collection} failed during {phase}: {reason}")]
    MigrationDataLoss {
        collection: String,
        phase: MigrationPhase,
        reason: String,
    },

    /// Never returned to callers; logged when self-healing deletes vectors.
    #[error("Dangling group {group_id} (file {file_id})")]
    DanglingGroup { group_id: String, file_id: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KbError {
    /// Translate a backend error, attaching collection and operation context.
    pub fn from_backend(collection: &str, operation: &'static str, err: BackendError) -> Self {
        match err {
            BackendError::CollectionNotFound(name) => KbError::CollectionNotFound(name),
            BackendError::UnknownField { collection, field } => KbError::SchemaIncompatible {
                collection,
                missing_fields: vec![field],
            },
            BackendError::DimensionMismatch { expected, actual } => KbError::InvalidInput(format!(
                "{operation} on {collection}: vector dimension {actual} does not match {expected}"
            )),
            BackendError::InvalidRow(reason) => {
                KbError::InvalidInput(format!("{operation} on {collection}: {reason}"))
            }
            BackendError::CollectionExists(name) => {
                KbError::InvalidInput(format!("{operation}: collection {name} already exists"))
            }
            other => KbError::StoreUnavailable {
                collection: collection.to_string(),
                operation,
                reason: other.to_string(),
            },
        }
    }

    /// Only transient store failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KbError::StoreUnavailable { .. })
    }

    pub fn is_collection_not_found(&self) -> bool {
        matches!(self, KbError::CollectionNotFound(_))
    }
}
