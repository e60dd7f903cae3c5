//! RetrievalService integration tests

use super::common::*;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use kbvec::core::KbError;
use kbvec::schema::{CollectionShape, MediaType, SegmentMeta};
use kbvec::services::{EmbeddingProducer, InMemoryFileCatalog, ProducedSegment, SchemaCheck};
use kbvec::{RetrievalService, SearchFilter, SearchOptions, TimeRange};

fn service() -> RetrievalService {
    RetrievalService::new(memory_backend(), test_config())
}

fn two_queries() -> Vec<Vec<f32>> {
    vec![vec![1.0, 0.0], vec![0.0, 1.0]]
}

/// Producer returning a fixed set of untimed, unnamed segments
struct FixedProducer {
    segments: usize,
}

#[async_trait]
impl EmbeddingProducer for FixedProducer {
    async fn produce(&self, _file_id: &str) -> kbvec::Result<Vec<ProducedSegment>> {
        Ok((0..self.segments)
            .map(|i| ProducedSegment {
                group_id: String::new(),
                vectors: vec![vec![1.0, i as f32]; 2],
                timing: Some(SegmentMeta::new(0.0, 1.0)),
            })
            .collect())
    }
}

#[cfg(test)]
mod retrieval_tests {
    use super::*;

    #[tokio::test]
    async fn test_search_merges_knowledge_bases() -> Result<()> {
        init_test_env();
        let service = service();
        let (kb_a, kb_b, kb_missing) = (unique_kb_id(), unique_kb_id(), unique_kb_id());

        service
            .insert(&kb_a, "a1", "fa", vec![vec![1.0, 0.0], vec![0.0, 1.0]], MediaType::Image, None)
            .await?;
        service
            .insert(&kb_b, "b1", "fb", vec![vec![1.0, 0.0]], MediaType::Image, None)
            .await?;

        let kbs = vec![kb_a.clone(), kb_b.clone(), kb_missing];
        let results = service
            .search(&kbs, &two_queries(), &SearchOptions::top_k(5))
            .await?;

        let order: Vec<&str> = results.iter().map(|g| g.group_id.as_str()).collect();
        assert_eq!(order, vec!["a1", "b1"]);
        assert_eq!(results[0].collection.as_deref(), Some(service.collection_name(&kb_a)?.as_str()));
        assert_eq!(results[1].collection.as_deref(), Some(service.collection_name(&kb_b)?.as_str()));
        assert!(service.collection_name(&kb_a)?.starts_with("colqwenkb_"));

        let high = service
            .search(&kbs, &two_queries(), &SearchOptions::top_k(5).with_score_range(Some(1.5), None))
            .await?;
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].group_id, "a1");

        let low = service
            .search(&kbs, &two_queries(), &SearchOptions::top_k(5).with_score_range(None, Some(1.5)))
            .await?;
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].group_id, "b1");

        let top = service
            .search(&kbs, &two_queries(), &SearchOptions::top_k(1))
            .await?;
        assert_eq!(top.len(), 1);
        println!("✅ Results merged across knowledge bases");
        Ok(())
    }

    #[tokio::test]
    async fn test_search_of_unknown_knowledge_base_is_empty() -> Result<()> {
        init_test_env();
        let service = service();
        let results = service
            .search(&[unique_kb_id()], &two_queries(), &SearchOptions::top_k(3))
            .await?;
        assert!(results.is_empty());
        assert!(service.search(&[unique_kb_id()], &[], &SearchOptions::top_k(3)).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_ingest_document_pages() -> Result<()> {
        init_test_env();
        let service = service();
        let kb = unique_kb_id();

        let pages = (0..3)
            .map(|i| ProducedSegment {
                group_id: String::new(),
                vectors: vec![vec![1.0, i as f32], vec![0.5, 0.5]],
                timing: Some(SegmentMeta::new(3.0, 4.0)),
            })
            .collect();
        assert_eq!(service.ingest_document(&kb, "doc1", pages).await?, 6);

        let store = service.store(&kb).await?;
        let page = store.fetch_group("doc1_1", 10).await?;
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|r| r.media_type == MediaType::Document));
        // Documents carry no timing.
        assert!(page.iter().all(|r| r.has_default_media_fields()));
        Ok(())
    }

    #[tokio::test]
    async fn test_ingest_media_segments_are_searchable_by_time() -> Result<()> {
        init_test_env();
        let service = service();
        let kb = unique_kb_id();

        let segments = vec![
            ProducedSegment {
                group_id: "clip_0".to_string(),
                vectors: vec![vec![1.0, 0.0]; 3],
                timing: Some(SegmentMeta::new(0.0, 10.0)),
            },
            ProducedSegment {
                group_id: "clip_1".to_string(),
                vectors: vec![vec![1.0, 0.0]; 3],
                timing: Some(SegmentMeta::new(10.0, 20.0)),
            },
        ];
        assert_eq!(service.ingest_media(&kb, "clip", MediaType::Audio, segments).await?, 6);

        let filter = SearchFilter::media(MediaType::Audio).with_time_range(TimeRange::new(5.0, 25.0)?);
        let results = service
            .search(&[kb.clone()], &[vec![1.0, 0.0]], &SearchOptions::top_k(5).with_filter(filter))
            .await?;
        assert_eq!(results.len(), 1);
        let hit = &results[0];
        assert_eq!(hit.group_id, "clip_1");
        assert_eq!(hit.segment_id, "clip_1");
        assert_eq!((hit.timestamp_start, hit.timestamp_end, hit.duration), (10.0, 20.0, 10.0));

        let err = service
            .ingest_media(&kb, "pdf", MediaType::Document, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::InvalidInput(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_ingest_with_producer() -> Result<()> {
        init_test_env();
        let service = service();
        let kb = unique_kb_id();

        let inserted = service
            .ingest_with(&kb, "vid", MediaType::Video, &FixedProducer { segments: 4 })
            .await?;
        assert_eq!(inserted, 8);

        let stats = service.stats(&kb).await?;
        assert_eq!(stats.rows, 8);
        assert_eq!(stats.shape, CollectionShape::Current);
        assert_eq!(stats.dimension, Some(2));

        let segment = service.store(&kb).await?.fetch_group("vid_3", 10).await?;
        assert_eq!(segment.len(), 2);
        assert!(segment.iter().all(|r| r.segment_id == "vid_3" && r.duration == 1.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_files_and_drop() -> Result<()> {
        init_test_env();
        let service = service();
        let kb = unique_kb_id();
        service.insert(&kb, "g1", "f1", vec![vec![1.0, 0.0]; 2], MediaType::Image, None).await?;
        service.insert(&kb, "g2", "f2", vec![vec![0.0, 1.0]; 3], MediaType::Image, None).await?;

        assert_eq!(service.delete_files(&kb, &["f2".to_string()]).await?, 3);
        assert_eq!(service.stats(&kb).await?.rows, 2);
        assert_eq!(service.delete_files(&unique_kb_id(), &["f1".to_string()]).await?, 0);

        assert!(service.drop_knowledge_base(&kb).await?);
        assert!(!service.drop_knowledge_base(&kb).await?);
        assert_eq!(service.check(&kb).await?, SchemaCheck::Missing);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_auto_migrates_legacy_collection() -> Result<()> {
        init_test_env();
        let service = service();
        let kb = unique_kb_id();
        let name = service.collection_name(&kb)?;
        seed_legacy_collection(service.backend().as_ref(), &name, legacy_rows(9)).await;

        assert!(matches!(service.check(&kb).await?, SchemaCheck::NeedsMigration { .. }));
        service
            .insert(&kb, "new", "f9", vec![vec![0.0, 1.0]], MediaType::Audio, Some(SegmentMeta::new(1.0, 2.0)))
            .await?;

        assert_eq!(service.check(&kb).await?, SchemaCheck::Compatible);
        assert_eq!(service.stats(&kb).await?.rows, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_into_legacy_without_auto_migrate() -> Result<()> {
        init_test_env();
        let mut config = test_config();
        config.migration.auto_migrate = false;
        let service = RetrievalService::new(memory_backend(), config);
        let kb = unique_kb_id();
        let name = service.collection_name(&kb)?;
        seed_legacy_collection(service.backend().as_ref(), &name, legacy_rows(3)).await;

        let err = service
            .insert(&kb, "g", "f", vec![vec![1.0, 0.0]], MediaType::Image, None)
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::SchemaIncompatible { .. }));

        // Legacy data stays readable.
        let results = service
            .search(&[kb], &[vec![1.0, 0.0]], &SearchOptions::top_k(5))
            .await?;
        assert_eq!(results.len(), 1);
        assert!(results[0].segment_id.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_search_drops_files_missing_from_catalog() -> Result<()> {
        init_test_env();
        let catalog = Arc::new(InMemoryFileCatalog::new());
        catalog.register_file("fa", "report.pdf", "kb");
        let service = service().with_catalog(catalog);
        let kb = unique_kb_id();

        service.insert(&kb, "a1", "fa", vec![vec![1.0, 0.0]], MediaType::Document, None).await?;
        service.insert(&kb, "b1", "fb", vec![vec![0.9, 0.1]], MediaType::Document, None).await?;

        let results = service
            .search(&[kb.clone()], &[vec![1.0, 0.0]], &SearchOptions::top_k(5))
            .await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file.as_ref().map(|f| f.filename.as_str()), Some("report.pdf"));
        assert_eq!(service.stats(&kb).await?.rows, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_dimension_never_migrates_legacy_collection() -> Result<()> {
        init_test_env();
        let service = service();
        let kb = unique_kb_id();
        let name = service.collection_name(&kb)?;
        seed_legacy_collection(service.backend().as_ref(), &name, legacy_rows(30)).await;

        let err = service
            .insert(&kb, "g", "f", vec![vec![1.0, 0.0, 0.0]], MediaType::Image, None)
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::InvalidInput(_)), "{err}");

        let err = service.migrate(&kb, 128).await.unwrap_err();
        assert!(matches!(err, KbError::InvalidInput(_)), "{err}");

        let stats = service.stats(&kb).await?;
        assert_eq!(stats.shape, CollectionShape::Legacy);
        assert_eq!(stats.rows, 30);
        assert_eq!(stats.dimension, Some(2));

        // The right dimension still migrates.
        let report = service.migrate(&kb, 2).await?;
        assert!(report.success, "{}", report.message);
        assert_eq!(service.stats(&kb).await?.rows, 30);
        Ok(())
    }

    #[tokio::test]
    async fn test_mistyped_query_leaves_cached_store_alone() -> Result<()> {
        init_test_env();
        let mut config = test_config();
        config.storage.default_dimension = 128;
        let service = RetrievalService::new(memory_backend(), config);
        let kb = unique_kb_id();
        service.insert(&kb, "g1", "f1", vec![vec![1.0, 0.0]; 2], MediaType::Image, None).await?;

        let err = service
            .search(&[kb.clone()], &[vec![1.0, 0.0, 0.0]], &SearchOptions::top_k(3))
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::InvalidInput(_)), "{err}");

        assert_eq!(service.store(&kb).await?.dimension(), 2);
        assert_eq!(service.delete_files(&kb, &["f1".to_string()]).await?, 2);
        assert_eq!(service.stats(&kb).await?.rows, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_store_opened_at_live_dimension() -> Result<()> {
        init_test_env();
        let backend = memory_backend();
        let mut config = test_config();
        config.storage.default_dimension = 128;
        let kb = unique_kb_id();
        {
            let writer = RetrievalService::new(backend.clone(), config.clone());
            writer.insert(&kb, "g1", "f1", vec![vec![0.0, 1.0]], MediaType::Image, None).await?;
        }

        let reader = RetrievalService::new(backend, config);
        assert_eq!(reader.store(&kb).await?.dimension(), 2);
        assert_eq!(reader.check(&kb).await?, SchemaCheck::Compatible);
        let results = reader
            .search(&[kb], &[vec![0.0, 1.0]], &SearchOptions::top_k(3))
            .await?;
        assert_eq!(results.len(), 1);
        Ok(())
    }
}
