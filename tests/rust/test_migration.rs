//! Schema migration integration tests

use super::common::*;
use anyhow::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use kbvec::core::{KbError, MigrationConfig, MigrationPhase, StoreConfig};
use kbvec::schema::{CollectionShape, MediaType};
use kbvec::services::{MigrationOutcome, SchemaCheck};
use kbvec::storage::{IndexBackend, VectorStore};
use kbvec::SchemaMigrationManager;

fn manager(backup_page_size: usize, restore_batch_size: usize) -> SchemaMigrationManager {
    SchemaMigrationManager::new(MigrationConfig {
        backup_page_size,
        restore_batch_size,
        ..MigrationConfig::default()
    })
}

async fn legacy_store(backend: Arc<dyn IndexBackend>, name: &str, rows: usize) -> Result<VectorStore> {
    seed_legacy_collection(backend.as_ref(), name, legacy_rows(rows)).await;
    let store = VectorStore::open(backend, name, 2, StoreConfig::default()).await?;
    assert_eq!(store.shape(), CollectionShape::Legacy);
    Ok(store)
}

#[cfg(test)]
mod migration_tests {
    use super::*;

    #[tokio::test]
    async fn test_legacy_collection_migrated_in_pages_and_batches() -> Result<()> {
        init_test_env();
        let store = legacy_store(memory_backend(), "colqwenmigrate", 250).await?;
        let manager = manager(100, 30);

        match manager.check(&store).await? {
            SchemaCheck::NeedsMigration { missing_fields } => {
                assert!(missing_fields.contains(&"media_type".to_string()));
                assert!(missing_fields.contains(&"segment_id".to_string()));
            }
            other => panic!("unexpected check result {other:?}"),
        }

        let report = manager.migrate(&store).await?;
        assert!(report.success, "{}", report.message);
        assert_eq!(report.outcome, MigrationOutcome::Migrated);
        assert_eq!(report.records_backed_up, 250);
        assert_eq!(report.records_processed, 250);
        let validation = report.validation.expect("validation ran");
        assert_eq!((validation.expected, validation.actual), (250, 250));
        assert!(report.backup_path.is_none());

        assert_eq!(store.shape(), CollectionShape::Current);
        assert_eq!(manager.check(&store).await?, SchemaCheck::Compatible);

        // Original fields survive, new fields carry their defaults.
        let original = legacy_rows(250);
        let mut group = store.fetch_group("page-5", 10).await?;
        group.sort_by_key(|r| r.sequence_index);
        assert_eq!(group.len(), 3);
        for (i, record) in group.iter().enumerate() {
            assert_eq!(record.file_id, "file-2");
            assert_eq!(record.sequence_index, i as i64);
            assert_eq!(Some(record.vector.as_slice()), original[15 + i].vector());
            assert_eq!(record.media_type, MediaType::Image);
            assert!(record.has_default_media_fields());
        }
        println!("✅ Migrated 250 legacy rows");
        Ok(())
    }

    #[tokio::test]
    async fn test_migration_is_idempotent() -> Result<()> {
        init_test_env();
        let store = legacy_store(memory_backend(), "colqwenidempotent", 12).await?;
        let manager = manager(5, 5);

        assert_eq!(manager.migrate(&store).await?.outcome, MigrationOutcome::Migrated);
        for _ in 0..2 {
            let again = manager.migrate(&store).await?;
            assert!(again.success);
            assert_eq!(again.outcome, MigrationOutcome::NotNeeded);
            assert_eq!(again.records_processed, 12);
            assert_eq!(again.message, "no migration needed");
        }
        assert_eq!(store.row_count().await?, 12);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_collection_created() -> Result<()> {
        init_test_env();
        let store = VectorStore::open(memory_backend(), "colqwenfresh", 2, StoreConfig::default()).await?;
        let manager = manager(100, 100);

        assert_eq!(manager.check(&store).await?, SchemaCheck::Missing);
        let report = manager.migrate(&store).await?;
        assert!(report.success);
        assert_eq!(report.outcome, MigrationOutcome::Created);
        assert_eq!(report.records_processed, 0);
        assert_eq!(store.shape(), CollectionShape::Current);
        Ok(())
    }

    #[tokio::test]
    async fn test_row_count_on_page_boundary() -> Result<()> {
        init_test_env();
        let store = legacy_store(memory_backend(), "colqwenboundary", 200).await?;

        let report = manager(100, 64).migrate(&store).await?;
        assert!(report.success);
        assert_eq!(report.records_processed, 200);
        assert_eq!(store.row_count().await?, 200);
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_file_written_and_restorable() -> Result<()> {
        init_test_env();
        let dir = tempfile::tempdir()?;
        let store = legacy_store(memory_backend(), "colqwenbackup", 12).await?;
        let manager = SchemaMigrationManager::new(MigrationConfig {
            backup_page_size: 5,
            restore_batch_size: 4,
            backup_dir: Some(dir.path().to_path_buf()),
            ..MigrationConfig::default()
        });

        let report = manager.migrate(&store).await?;
        assert!(report.success);
        let path = report.backup_path.expect("backup file written");
        assert!(path.starts_with(dir.path()));
        let contents = std::fs::read_to_string(&path)?;
        assert_eq!(contents.lines().count(), 12);

        // Lose the collection, then bring the rows back from the file.
        assert!(store.drop_collection().await?);
        let restored = manager.restore_from_backup(&store, &path).await?;
        assert!(restored.success, "{}", restored.message);
        assert_eq!(restored.records_backed_up, 12);
        assert_eq!(restored.records_processed, 12);
        assert_eq!(store.row_count().await?, 12);
        assert_eq!(store.fetch_group("page-1", 10).await?.len(), 3);
        println!("✅ Backup file restored after drop");
        Ok(())
    }

    #[tokio::test]
    async fn test_scan_failure_aborts_before_drop() -> Result<()> {
        init_test_env();
        let backend = Arc::new(FlakyBackend::new());
        let store = legacy_store(backend.clone(), "colqwenscanfail", 30).await?;
        backend.fail_scans.store(true, Ordering::SeqCst);

        let err = manager(10, 10).migrate(&store).await.unwrap_err();
        match err {
            KbError::MigrationDataLoss { phase, .. } => assert_eq!(phase, MigrationPhase::Backup),
            other => panic!("unexpected error {other:?}"),
        }

        // The legacy collection is untouched.
        assert_eq!(store.refresh_shape().await?, CollectionShape::Legacy);
        assert_eq!(store.row_count().await?, 30);
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_failure_reports_progress() -> Result<()> {
        init_test_env();
        let backend = Arc::new(FlakyBackend::new());
        let store = legacy_store(backend.clone(), "colqwenrestorefail", 90).await?;
        *backend.insert_budget.lock() = Some(60);

        let err = manager(50, 30).migrate(&store).await.unwrap_err();
        match err {
            KbError::MigrationDataLoss { phase, reason, .. } => {
                assert_eq!(phase, MigrationPhase::Restore);
                assert!(reason.contains("60 of 90"), "reason: {reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(store.row_count().await?, 60);
        Ok(())
    }

    #[tokio::test]
    async fn test_dimension_mismatch_aborts_before_drop() -> Result<()> {
        init_test_env();
        let backend = memory_backend();
        seed_legacy_collection(backend.as_ref(), "colqwenwrongdim", legacy_rows(30)).await;
        let store = VectorStore::open(backend, "colqwenwrongdim", 128, StoreConfig::default()).await?;

        let err = manager(10, 10).migrate(&store).await.unwrap_err();
        match err {
            KbError::MigrationDataLoss { phase, reason, .. } => {
                assert_eq!(phase, MigrationPhase::Backup);
                assert!(reason.contains("dimension 2"), "reason: {reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert_eq!(store.refresh_shape().await?, CollectionShape::Legacy);
        assert_eq!(store.row_count().await?, 30);
        assert_eq!(store.live_dimension().await?, Some(2));
        Ok(())
    }
}
