// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Runtime configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed `KBVEC__` (for example
//! `KBVEC__RERANK__MAX_CONCURRENT_FETCHES=64`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{KbError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub store: StoreConfig,
    pub rerank: RerankConfig,
    pub migration: MigrationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Snapshot directory for the in-process backend; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    pub default_dimension: usize,
    pub collection_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound for every individual backend call
    pub operation_timeout_ms: u64,
    /// Hits requested per query vector during coarse search
    pub coarse_limit: usize,
    /// Maximum vectors fetched for one group during rerank
    pub group_fetch_cap: usize,
    pub index: IndexConfig,
}

/// HNSW build parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub max_concurrent_fetches: usize,
    /// Delete vectors of files the catalog no longer knows
    pub self_heal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub backup_page_size: usize,
    pub restore_batch_size: usize,
    /// Where to write a JSON-lines copy of the backup before dropping
    pub backup_dir: Option<PathBuf>,
    /// Migrate legacy collections when a knowledge base is opened
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            default_dimension: 128,
            collection_prefix: "colqwen".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 30_000,
            coarse_limit: 50,
            group_fetch_cap: 1000,
            index: IndexConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 500,
            ef_search: 64,
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 300,
            self_heal: true,
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            backup_page_size: 1000,
            restore_batch_size: 100,
            backup_dir: None,
            auto_migrate: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Config {
    /// Load defaults, then `path` if given and present, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = ::config::Config::try_from(&Config::default())
            .map_err(|e| KbError::Config(e.to_string()))?;

        let mut builder = ::config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("KBVEC")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| KbError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, usize); 7] = [
            ("storage.default_dimension", self.storage.default_dimension),
            ("store.coarse_limit", self.store.coarse_limit),
            ("store.group_fetch_cap", self.store.group_fetch_cap),
            ("store.index.m", self.store.index.m),
            ("rerank.max_concurrent_fetches", self.rerank.max_concurrent_fetches),
            ("migration.backup_page_size", self.migration.backup_page_size),
            ("migration.restore_batch_size", self.migration.restore_batch_size),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(KbError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.store.operation_timeout_ms == 0 {
            return Err(KbError::Config(
                "store.operation_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.storage.collection_prefix.is_empty() {
            return Err(KbError::Config("storage.collection_prefix must not be empty".to_string()));
        }
        Ok(())
    }
}
