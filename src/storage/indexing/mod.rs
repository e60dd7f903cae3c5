// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Approximate nearest-neighbor indexes

pub mod hnsw;

pub use hnsw::{HnswConfig, HnswGraph};
