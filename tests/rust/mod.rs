//! kbvec Integration Tests
//!
//! Store, rerank, migration and retrieval-facade behavior exercised through
//! the public API, with in-memory and instrumented backends.

pub mod common;
pub mod test_migration;
pub mod test_retrieval;

// Re-export common utilities
pub use common::*;
