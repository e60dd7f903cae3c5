// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Stored row shape and the VectorRecord codec

pub mod collection;
pub mod record;

pub use collection::{
    CollectionSchema, CollectionShape, FieldKind, FieldSchema, IndexParams, EXTENDED_FIELDS,
    LEGACY_FIELDS,
};
pub use record::{FieldValue, MediaType, SegmentMeta, StoredRow, VectorRecord};
