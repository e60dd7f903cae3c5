// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! VectorRecord codec
//!
//! Rows travel to and from a backend as [`StoredRow`]s: an optional primary
//! key plus a map of named [`FieldValue`]s. [`VectorRecord`] is the typed view
//! every other component works with. Decoding happens here and nowhere else,
//! and it is the one place the defaults for fields added by schema evolution
//! are applied:
//!
//! | field             | default   |
//! |-------------------|-----------|
//! | `media_type`      | `image`   |
//! | `timestamp_start` | `0.0`     |
//! | `timestamp_end`   | `0.0`     |
//! | `duration`        | `0.0`     |
//! | `segment_id`      | `""`      |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::collection::*;
use crate::core::{CodecError, PrimaryKey};

/// A single stored field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
    Vector(Vec<f32>),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            FieldValue::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<Vec<f32>> for FieldValue {
    fn from(value: Vec<f32>) -> Self {
        FieldValue::Vector(value)
    }
}

/// Raw row as exchanged with a backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub pk: Option<PrimaryKey>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl StoredRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn vector(&self) -> Option<&[f32]> {
        self.get(FIELD_VECTOR).and_then(FieldValue::as_vector)
    }

    /// Keep only the named fields.
    pub fn project(&self, names: &[String]) -> StoredRow {
        StoredRow {
            pk: self.pk,
            fields: self
                .fields
                .iter()
                .filter(|(name, _)| names.iter().any(|n| n == *name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }
}

/// Kind of content a vector was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Image,
    Document,
    Audio,
    Video,
    VideoFrame,
    VideoAudio,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Document => "document",
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::VideoFrame => "video_frame",
            MediaType::VideoAudio => "video_audio",
        }
    }

    /// Audio and video derived vectors carry timing and a segment id.
    pub fn is_time_based(&self) -> bool {
        matches!(
            self,
            MediaType::Audio | MediaType::Video | MediaType::VideoFrame | MediaType::VideoAudio
        )
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaType::Image),
            "document" => Ok(MediaType::Document),
            "audio" => Ok(MediaType::Audio),
            "video" => Ok(MediaType::Video),
            "video_frame" => Ok(MediaType::VideoFrame),
            "video_audio" => Ok(MediaType::VideoAudio),
            other => Err(CodecError::UnknownMediaType(other.to_string())),
        }
    }
}

/// Timing of an audio/video segment, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub timestamp_start: f64,
    pub timestamp_end: f64,
    pub duration: f64,
}

impl SegmentMeta {
    pub fn new(timestamp_start: f64, timestamp_end: f64) -> Self {
        Self {
            timestamp_start,
            timestamp_end,
            duration: (timestamp_end - timestamp_start).max(0.0),
        }
    }
}

/// One stored vector with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Assigned by the store; `None` before insert
    pub primary_key: Option<PrimaryKey>,
    pub vector: Vec<f32>,
    pub group_id: String,
    pub sequence_index: i64,
    pub file_id: String,
    pub media_type: MediaType,
    pub timestamp_start: f64,
    pub timestamp_end: f64,
    pub duration: f64,
    pub segment_id: String,
}

impl VectorRecord {
    /// Records for one group, `sequence_index` following input order.
    pub fn batch(
        group_id: &str,
        file_id: &str,
        vectors: Vec<Vec<f32>>,
        media_type: MediaType,
        segment: Option<SegmentMeta>,
    ) -> Vec<VectorRecord> {
        let segment = segment.unwrap_or_default();
        let segment_id = if media_type.is_time_based() {
            group_id.to_string()
        } else {
            String::new()
        };

        vectors
            .into_iter()
            .enumerate()
            .map(|(i, vector)| VectorRecord {
                primary_key: None,
                vector,
                group_id: group_id.to_string(),
                sequence_index: i as i64,
                file_id: file_id.to_string(),
                media_type,
                timestamp_start: segment.timestamp_start,
                timestamp_end: segment.timestamp_end,
                duration: segment.duration,
                segment_id: segment_id.clone(),
            })
            .collect()
    }

    /// Decode a stored row, filling defaults for any missing optional field.
    pub fn from_row(row: &StoredRow) -> Result<Self, CodecError> {
        let vector = match row.get(FIELD_VECTOR) {
            Some(FieldValue::Vector(v)) => v.clone(),
            Some(_) => return Err(type_mismatch(FIELD_VECTOR, "float vector")),
            None => return Err(CodecError::MissingField(FIELD_VECTOR.to_string())),
        };

        let media_type = match optional_str(row, FIELD_MEDIA_TYPE)? {
            Some(s) if !s.is_empty() => s.parse()?,
            _ => MediaType::default(),
        };

        Ok(VectorRecord {
            primary_key: row.pk,
            vector,
            group_id: required_str(row, FIELD_GROUP_ID)?,
            sequence_index: match row.get(FIELD_SEQUENCE_INDEX) {
                Some(FieldValue::Int(v)) => *v,
                Some(_) => return Err(type_mismatch(FIELD_SEQUENCE_INDEX, "integer")),
                None => 0,
            },
            file_id: required_str(row, FIELD_FILE_ID)?,
            media_type,
            timestamp_start: optional_f64(row, FIELD_TIMESTAMP_START)?,
            timestamp_end: optional_f64(row, FIELD_TIMESTAMP_END)?,
            duration: optional_f64(row, FIELD_DURATION)?,
            segment_id: optional_str(row, FIELD_SEGMENT_ID)?.unwrap_or_default(),
        })
    }

    /// Rebuild a backed-up row for the current schema: legacy fields are
    /// carried verbatim, new fields get their defaults, the key is dropped.
    pub fn migrate_row(row: &StoredRow) -> Result<Self, CodecError> {
        let mut record = Self::from_row(row)?;
        record.primary_key = None;
        Ok(record)
    }

    /// Encode for a collection of the given shape.
    ///
    /// Legacy collections only receive the legacy fields.
    pub fn to_row(&self, shape: CollectionShape) -> StoredRow {
        let mut row = StoredRow {
            pk: self.primary_key,
            fields: BTreeMap::new(),
        }
        .with(FIELD_VECTOR, self.vector.clone())
        .with(FIELD_GROUP_ID, self.group_id.as_str())
        .with(FIELD_SEQUENCE_INDEX, self.sequence_index)
        .with(FIELD_FILE_ID, self.file_id.as_str());

        if shape == CollectionShape::Current {
            row = row
                .with(FIELD_MEDIA_TYPE, self.media_type.as_str())
                .with(FIELD_TIMESTAMP_START, self.timestamp_start)
                .with(FIELD_TIMESTAMP_END, self.timestamp_end)
                .with(FIELD_DURATION, self.duration)
                .with(FIELD_SEGMENT_ID, self.segment_id.as_str());
        }
        row
    }

    /// True when every field added by schema evolution holds its default.
    pub fn has_default_media_fields(&self) -> bool {
        self.media_type == MediaType::Image
            && self.timestamp_start == 0.0
            && self.timestamp_end == 0.0
            && self.duration == 0.0
            && self.segment_id.is_empty()
    }
}

fn type_mismatch(field: &str, expected: &'static str) -> CodecError {
    CodecError::TypeMismatch {
        field: field.to_string(),
        expected,
    }
}

fn required_str(row: &StoredRow, field: &str) -> Result<String, CodecError> {
    optional_str(row, field)?.ok_or_else(|| CodecError::MissingField(field.to_string()))
}

fn optional_str(row: &StoredRow, field: &str) -> Result<Option<String>, CodecError> {
    match row.get(field) {
        Some(FieldValue::Str(s)) => Ok(Some(s.clone())),
        Some(_) => Err(type_mismatch(field, "string")),
        None => Ok(None),
    }
}

fn optional_f64(row: &StoredRow, field: &str) -> Result<f64, CodecError> {
    match row.get(field) {
        Some(value) => value.as_f64().ok_or_else(|| type_mismatch(field, "number")),
        None => Ok(0.0),
    }
}
