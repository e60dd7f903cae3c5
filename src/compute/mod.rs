// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Vector math used by the index and the reranker

pub mod distance;

pub use distance::{cosine_similarity, inner_product, LateInteractionScore, MetricType, QueryMatrix};
