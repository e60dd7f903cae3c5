// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Schema migration
//!
//! Moves a collection from the legacy row shape to the current one:
//!
//! ```text
//! CHECK ─┬─ missing ──────────────> create fresh
//!        ├─ compatible ───────────> no-op
//!        └─ legacy ─> BACKUP ─> DROP_AND_RECREATE ─> RESTORE ─> VALIDATE
//! ```
//!
//! Nothing destructive happens until every row has been read and decoded.
//! Once the old collection is dropped, a failing restore is reported as
//! [`KbError::MigrationDataLoss`]; if a backup directory is configured the
//! rows can be reloaded with [`SchemaMigrationManager::restore_from_backup`].

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, error, info, warn};

use crate::core::{KbError, MigrationConfig, MigrationPhase, Result};
use crate::schema::{CollectionShape, StoredRow, VectorRecord};
use crate::storage::VectorStore;

/// Result of the CHECK phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SchemaCheck {
    Missing,
    Compatible,
    NeedsMigration { missing_fields: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationOutcome {
    NotNeeded,
    Created,
    Migrated,
}

/// Row count comparison after a restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub expected: usize,
    pub actual: usize,
    pub passed: bool,
}

impl ValidationReport {
    fn new(expected: usize, actual: usize) -> Self {
        Self {
            expected,
            actual,
            passed: expected == actual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub collection: String,
    pub success: bool,
    pub outcome: MigrationOutcome,
    pub records_backed_up: usize,
    pub records_processed: usize,
    pub backup_path: Option<PathBuf>,
    pub validation: Option<ValidationReport>,
    pub message: String,
}

pub struct SchemaMigrationManager {
    config: MigrationConfig,
}

impl SchemaMigrationManager {
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Compare the live field set with the current shape.
    pub async fn check(&self, store: &VectorStore) -> Result<SchemaCheck> {
        let shape = store.refresh_shape().await?;
        Ok(match shape {
            CollectionShape::Missing => SchemaCheck::Missing,
            CollectionShape::Current => SchemaCheck::Compatible,
            CollectionShape::Legacy => match store.describe().await {
                Ok(schema) => SchemaCheck::NeedsMigration {
                    missing_fields: schema.missing_fields(),
                },
                Err(KbError::CollectionNotFound(_)) => SchemaCheck::Missing,
                Err(e) => return Err(e),
            },
        })
    }

    /// Bring `store`'s collection to the current shape.
    ///
    /// Expected conditions (missing collection, nothing to do, count mismatch)
    /// are reported in the returned [`MigrationReport`]. Read failures before
    /// the drop and write failures after it are errors.
    pub async fn migrate(&self, store: &VectorStore) -> Result<MigrationReport> {
        let collection = store.name().to_string();

        let missing_fields = match self.check(store).await? {
            SchemaCheck::Missing => {
                store.ensure_collection().await?;
                info!("🆕 Collection {} did not exist, created fresh", collection);
                return Ok(MigrationReport {
                    collection,
                    success: true,
                    outcome: MigrationOutcome::Created,
                    records_backed_up: 0,
                    records_processed: 0,
                    backup_path: None,
                    validation: None,
                    message: "collection created with current schema".to_string(),
                });
            }
            SchemaCheck::Compatible => {
                let rows = store.row_count().await?;
                debug!("collection {} already compatible ({} rows)", collection, rows);
                return Ok(MigrationReport {
                    collection,
                    success: true,
                    outcome: MigrationOutcome::NotNeeded,
                    records_backed_up: 0,
                    records_processed: rows,
                    backup_path: None,
                    validation: None,
                    message: "no migration needed".to_string(),
                });
            }
            SchemaCheck::NeedsMigration { missing_fields } => missing_fields,
        };

        // Restoring into a collection of another dimension cannot succeed.
        match store.live_dimension().await? {
            Some(live) if live != store.dimension() => {
                return Err(data_loss(
                    &collection,
                    MigrationPhase::Backup,
                    format!(
                        "collection has dimension {live}, target dimension is {}; nothing was dropped",
                        store.dimension()
                    ),
                ));
            }
            _ => {}
        }

        info!("🔄 Migrating {}: adding fields {:?}", collection, missing_fields);

        // BACKUP
        let (rows, records) = self.backup(store).await?;
        let backup_path = match &self.config.backup_dir {
            Some(dir) => Some(
                write_backup_file(dir, &collection, &rows)
                    .await
                    .map_err(|e| data_loss(&collection, MigrationPhase::Backup, e))?,
            ),
            None => None,
        };
        let backed_up = rows.len();
        drop(rows);

        // DROP_AND_RECREATE
        let recreated = async {
            store.drop_collection().await?;
            store.ensure_collection().await
        };
        if let Err(e) = recreated.await {
            error!("recreate of {} failed after backup of {} rows: {}", collection, backed_up, e);
            return Err(data_loss(&collection, MigrationPhase::DropAndRecreate, e));
        }

        // RESTORE
        let restored = self
            .restore_batches(store, records)
            .await
            .map_err(|(done, e)| {
                error!(
                    "restore of {} halted after {}/{} rows: {}",
                    collection, done, backed_up, e
                );
                let hint = backup_path
                    .as_ref()
                    .map(|p| format!("; backup at {}", p.display()))
                    .unwrap_or_default();
                data_loss(
                    &collection,
                    MigrationPhase::Restore,
                    format!("{done} of {backed_up} rows restored: {e}{hint}"),
                )
            })?;

        // VALIDATE
        let report = self
            .validate(store, backed_up, restored, backup_path, MigrationOutcome::Migrated)
            .await;
        if report.success {
            info!("✅ Migrated {} ({} rows)", collection, restored);
        }
        Ok(report)
    }

    /// Page through every row, then decode each into its migrated form.
    async fn backup(&self, store: &VectorStore) -> Result<(Vec<StoredRow>, Vec<VectorRecord>)> {
        let collection = store.name();
        let page_size = self.config.backup_page_size.max(1);

        let expected = store
            .row_count()
            .await
            .map_err(|e| data_loss(collection, MigrationPhase::Backup, e))?;

        let mut rows = Vec::with_capacity(expected);
        let mut offset = 0;
        loop {
            let page = store
                .scan(offset, page_size)
                .await
                .map_err(|e| data_loss(collection, MigrationPhase::Backup, e))?;
            let fetched = page.len();
            rows.extend(page);
            offset += fetched;
            debug!("backed up {} rows of {}", rows.len(), collection);
            if fetched < page_size {
                break;
            }
        }

        if rows.len() != expected {
            return Err(data_loss(
                collection,
                MigrationPhase::Backup,
                format!("read {} rows, collection reports {}", rows.len(), expected),
            ));
        }

        let records = rows
            .iter()
            .map(VectorRecord::migrate_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| data_loss(collection, MigrationPhase::Backup, e))?;

        info!("💾 Backed up {} rows from {}", rows.len(), collection);
        Ok((rows, records))
    }

    /// Insert in fixed-size batches. On failure returns the rows restored so far.
    async fn restore_batches(
        &self,
        store: &VectorStore,
        records: Vec<VectorRecord>,
    ) -> std::result::Result<usize, (usize, KbError)> {
        let batch_size = self.config.restore_batch_size.max(1);
        let mut restored = 0;
        let mut pending = records.into_iter().peekable();

        while pending.peek().is_some() {
            let batch: Vec<VectorRecord> = pending.by_ref().take(batch_size).collect();
            let len = batch.len();
            store
                .insert_records(batch)
                .await
                .map_err(|e| (restored, e))?;
            restored += len;
        }
        Ok(restored)
    }

    async fn validate(
        &self,
        store: &VectorStore,
        expected: usize,
        processed: usize,
        backup_path: Option<PathBuf>,
        outcome: MigrationOutcome,
    ) -> MigrationReport {
        let collection = store.name().to_string();
        if let Err(e) = store.flush().await {
            warn!("flush of {} after restore failed: {}", collection, e);
        }

        let (validation, message) = match store.row_count().await {
            Ok(actual) => {
                let validation = ValidationReport::new(expected, actual);
                let message = if validation.passed {
                    format!("migrated {actual} rows")
                } else {
                    format!("row count mismatch: expected {expected}, found {actual}")
                };
                (Some(validation), message)
            }
            Err(e) => (None, format!("could not validate row count: {e}")),
        };
        let success = validation.as_ref().map_or(false, |v| v.passed);
        if !success {
            warn!("⚠️ Migration of {} not validated: {}", collection, message);
        }

        MigrationReport {
            collection,
            success,
            outcome,
            records_backed_up: expected,
            records_processed: processed,
            backup_path,
            validation,
            message,
        }
    }

    /// Reload rows from a backup file written by [`Self::migrate`].
    ///
    /// The collection is created if needed; rows are appended.
    pub async fn restore_from_backup(&self, store: &VectorStore, path: &Path) -> Result<MigrationReport> {
        let collection = store.name().to_string();
        let rows = read_backup_file(path)
            .await
            .map_err(|e| KbError::InvalidInput(format!("backup {}: {}", path.display(), e)))?;
        let records = rows
            .iter()
            .map(VectorRecord::migrate_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        store.ensure_collection().await?;
        let before = store.row_count().await?;

        let restored = self
            .restore_batches(store, records)
            .await
            .map_err(|(done, e)| {
                data_loss(
                    &collection,
                    MigrationPhase::Restore,
                    format!("{done} of {} rows restored from {}: {e}", rows.len(), path.display()),
                )
            })?;
        info!("📥 Restored {} rows into {} from {}", restored, collection, path.display());

        let mut report = self
            .validate(
                store,
                before + rows.len(),
                restored,
                Some(path.to_path_buf()),
                MigrationOutcome::Migrated,
            )
            .await;
        report.records_backed_up = rows.len();
        Ok(report)
    }
}

fn data_loss(collection: &str, phase: MigrationPhase, reason: impl ToString) -> KbError {
    KbError::MigrationDataLoss {
        collection: collection.to_string(),
        phase,
        reason: reason.to_string(),
    }
}

/// One JSON object per line.
async fn write_backup_file(dir: &Path, collection: &str, rows: &[StoredRow]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let path = dir.join(format!("{collection}-{stamp}.jsonl"));

    let file = tokio::fs::File::create(&path).await?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        let line = serde_json::to_string(row)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;
    writer.get_ref().sync_all().await?;

    info!("💾 Wrote {} rows to {}", rows.len(), path.display());
    Ok(path)
}

async fn read_backup_file(path: &Path) -> std::io::Result<Vec<StoredRow>> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut rows = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}
