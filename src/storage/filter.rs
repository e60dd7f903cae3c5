// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Row filters
//!
//! [`Filter`] is the backend-level predicate over stored fields.
//! [`SearchFilter`] is what callers express (media type and time window) and
//! lowers to a [`Filter`]; it can also be applied to decoded records, which
//! is how legacy collections without the media fields are filtered.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::core::{KbError, Result};
use crate::schema::collection::{FIELD_FILE_ID, FIELD_GROUP_ID, FIELD_MEDIA_TYPE, FIELD_TIMESTAMP_END, FIELD_TIMESTAMP_START};
use crate::schema::{FieldValue, MediaType, StoredRow, VectorRecord};

/// Predicate over stored fields
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Single field condition
    Field {
        field: String,
        condition: FieldCondition,
    },

    /// Logical AND of multiple filters
    And(Vec<Filter>),
}

/// Field-level conditions
#[derive(Debug, Clone, PartialEq)]
pub enum FieldCondition {
    Equals(FieldValue),
    In(Vec<FieldValue>),
    GreaterThanOrEqual(FieldValue),
    LessThanOrEqual(FieldValue),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<FieldValue>) -> Self {
        Filter::Field {
            field: field.to_string(),
            condition: FieldCondition::Equals(value.into()),
        }
    }

    pub fn one_of<V: Into<FieldValue>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::Field {
            field: field.to_string(),
            condition: FieldCondition::In(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn ge(field: &str, value: impl Into<FieldValue>) -> Self {
        Filter::Field {
            field: field.to_string(),
            condition: FieldCondition::GreaterThanOrEqual(value.into()),
        }
    }

    pub fn le(field: &str, value: impl Into<FieldValue>) -> Self {
        Filter::Field {
            field: field.to_string(),
            condition: FieldCondition::LessThanOrEqual(value.into()),
        }
    }

    pub fn group(group_id: &str) -> Self {
        Filter::eq(FIELD_GROUP_ID, group_id)
    }

    pub fn files<'a>(file_ids: impl IntoIterator<Item = &'a String>) -> Self {
        Filter::one_of(FIELD_FILE_ID, file_ids.into_iter().map(|id| id.as_str()))
    }

    /// Every field the filter reads.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Filter::Field { field, .. } => vec![field.as_str()],
            Filter::And(filters) => filters.iter().flat_map(Filter::fields).collect(),
        }
    }

    /// Rows lacking a referenced field never match.
    pub fn matches(&self, row: &StoredRow) -> bool {
        match self {
            Filter::Field { field, condition } => match row.get(field) {
                Some(value) => condition.matches(value),
                None => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
        }
    }
}

impl FieldCondition {
    fn matches(&self, value: &FieldValue) -> bool {
        match self {
            FieldCondition::Equals(expected) => compare(value, expected) == Some(Ordering::Equal),
            FieldCondition::In(candidates) => candidates
                .iter()
                .any(|c| compare(value, c) == Some(Ordering::Equal)),
            FieldCondition::GreaterThanOrEqual(bound) => {
                matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            FieldCondition::LessThanOrEqual(bound) => {
                matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }
}

fn compare(a: &FieldValue, b: &FieldValue) -> Option<Ordering> {
    match (a, b) {
        (FieldValue::Str(x), FieldValue::Str(y)) => Some(x.cmp(y)),
        (FieldValue::Int(x), FieldValue::Int(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

/// Inclusive time window in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !(start.is_finite() && end.is_finite()) || start > end {
            return Err(KbError::InvalidInput(format!(
                "invalid time range [{start}, {end}]"
            )));
        }
        Ok(Self { start, end })
    }
}

/// Caller-facing search constraints, combined with AND
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub media_type: Option<MediaType>,
    pub time_range: Option<TimeRange>,
}

impl SearchFilter {
    pub fn media(media_type: MediaType) -> Self {
        Self {
            media_type: Some(media_type),
            time_range: None,
        }
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.media_type.is_none() && self.time_range.is_none()
    }

    /// `media_type == m AND timestamp_start >= start AND timestamp_end <= end`
    pub fn to_filter(&self) -> Option<Filter> {
        let mut clauses = Vec::new();
        if let Some(media_type) = self.media_type {
            clauses.push(Filter::eq(FIELD_MEDIA_TYPE, media_type.as_str()));
        }
        if let Some(range) = self.time_range {
            clauses.push(Filter::ge(FIELD_TIMESTAMP_START, range.start));
            clauses.push(Filter::le(FIELD_TIMESTAMP_END, range.end));
        }
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(Filter::And(clauses)),
        }
    }

    /// Same predicate evaluated on a decoded (defaulted) record.
    pub fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(media_type) = self.media_type {
            if record.media_type != media_type {
                return false;
            }
        }
        if let Some(range) = self.time_range {
            if record.timestamp_start < range.start || record.timestamp_end > range.end {
                return false;
            }
        }
        true
    }
}
