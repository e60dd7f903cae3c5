// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Collection schema
//!
//! The stored row shape evolved once: the original shape carried only the
//! vector and its page/file provenance; the current shape adds media and
//! timing fields. Both shapes are described here so the store can recognise
//! either and the migration manager can move from one to the other.

use serde::{Deserialize, Serialize};

use crate::compute::MetricType;

pub const FIELD_PK: &str = "pk";
pub const FIELD_VECTOR: &str = "vector";
pub const FIELD_GROUP_ID: &str = "group_id";
pub const FIELD_SEQUENCE_INDEX: &str = "sequence_index";
pub const FIELD_FILE_ID: &str = "file_id";
pub const FIELD_MEDIA_TYPE: &str = "media_type";
pub const FIELD_TIMESTAMP_START: &str = "timestamp_start";
pub const FIELD_TIMESTAMP_END: &str = "timestamp_end";
pub const FIELD_DURATION: &str = "duration";
pub const FIELD_SEGMENT_ID: &str = "segment_id";

/// Fields present since the first release
pub const LEGACY_FIELDS: &[&str] = &[
    FIELD_VECTOR,
    FIELD_GROUP_ID,
    FIELD_SEQUENCE_INDEX,
    FIELD_FILE_ID,
];

/// Optional fields added for audio/video support
pub const EXTENDED_FIELDS: &[&str] = &[
    FIELD_MEDIA_TYPE,
    FIELD_TIMESTAMP_START,
    FIELD_TIMESTAMP_END,
    FIELD_DURATION,
    FIELD_SEGMENT_ID,
];

const MAX_VARCHAR: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Int64,
    Float,
    VarChar { max_length: usize },
    FloatVector { dim: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub is_primary: bool,
}

impl FieldSchema {
    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            is_primary: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    /// Primary keys are assigned by the store
    pub auto_id: bool,
}

impl CollectionSchema {
    /// The shape every new collection is created with.
    pub fn current(name: &str, dim: usize) -> Self {
        let mut schema = Self::legacy(name, dim);
        schema.fields.extend([
            FieldSchema::new(FIELD_MEDIA_TYPE, FieldKind::VarChar { max_length: 50 }),
            FieldSchema::new(FIELD_TIMESTAMP_START, FieldKind::Float),
            FieldSchema::new(FIELD_TIMESTAMP_END, FieldKind::Float),
            FieldSchema::new(FIELD_DURATION, FieldKind::Float),
            FieldSchema::new(FIELD_SEGMENT_ID, FieldKind::VarChar { max_length: MAX_VARCHAR }),
        ]);
        schema
    }

    /// The shape of collections created before media support.
    pub fn legacy(name: &str, dim: usize) -> Self {
        Self {
            name: name.to_string(),
            fields: vec![
                FieldSchema {
                    name: FIELD_PK.to_string(),
                    kind: FieldKind::Int64,
                    is_primary: true,
                },
                FieldSchema::new(FIELD_VECTOR, FieldKind::FloatVector { dim }),
                FieldSchema::new(FIELD_GROUP_ID, FieldKind::VarChar { max_length: MAX_VARCHAR }),
                FieldSchema::new(FIELD_SEQUENCE_INDEX, FieldKind::Int64),
                FieldSchema::new(FIELD_FILE_ID, FieldKind::VarChar { max_length: MAX_VARCHAR }),
            ],
            auto_id: true,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Dimension of the vector field, if the schema has one.
    pub fn dimension(&self) -> Option<usize> {
        self.fields.iter().find_map(|f| match f.kind {
            FieldKind::FloatVector { dim } => Some(dim),
            _ => None,
        })
    }

    /// Expected fields this schema lacks.
    pub fn missing_fields(&self) -> Vec<String> {
        LEGACY_FIELDS
            .iter()
            .chain(EXTENDED_FIELDS.iter())
            .filter(|name| !self.has_field(name))
            .map(|name| name.to_string())
            .collect()
    }

    pub fn shape(&self) -> CollectionShape {
        if self.missing_fields().is_empty() {
            CollectionShape::Current
        } else {
            CollectionShape::Legacy
        }
    }
}

/// Live shape of a collection as detected by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionShape {
    Missing,
    Legacy,
    Current,
}

impl CollectionShape {
    /// Fields to request when reading rows of this shape.
    pub fn output_fields(&self) -> Vec<String> {
        let legacy = LEGACY_FIELDS.iter();
        let names: Vec<&str> = match self {
            CollectionShape::Current => legacy.chain(EXTENDED_FIELDS.iter()).copied().collect(),
            CollectionShape::Legacy | CollectionShape::Missing => legacy.copied().collect(),
        };
        names.into_iter().map(String::from).collect()
    }
}

/// Index build parameters passed to a backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexParams {
    pub field: String,
    pub metric: MetricType,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl IndexParams {
    pub fn hnsw(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            field: FIELD_VECTOR.to_string(),
            metric: MetricType::InnerProduct,
            m,
            ef_construction,
            ef_search,
        }
    }
}
