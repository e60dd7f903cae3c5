//! Common utilities for integration tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use kbvec::core::{BackendError, Config, PrimaryKey};
use kbvec::schema::collection::{FIELD_FILE_ID, FIELD_GROUP_ID, FIELD_SEQUENCE_INDEX, FIELD_VECTOR};
use kbvec::schema::{CollectionSchema, CollectionShape, FieldValue, IndexParams, MediaType, StoredRow, VectorRecord};
use kbvec::services::{FileCatalog, FileMetadata};
use kbvec::storage::backend::BackendResult;
use kbvec::storage::{
    BackendHit, FieldCondition, Filter, IndexBackend, MemoryIndexBackend, QueryRequest, SearchRequest,
};

static INIT: Once = Once::new();
static NEXT_KB: AtomicUsize = AtomicUsize::new(0);

/// Initialize test environment
pub fn init_test_env() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_test_writer()
            .try_init();
    });
}

/// Unique knowledge-base id, with a dash to exercise name mapping
pub fn unique_kb_id() -> String {
    format!("kb-{}", NEXT_KB.fetch_add(1, Ordering::SeqCst))
}

/// Defaults sized for small two-dimensional fixtures
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.storage.default_dimension = 2;
    config.store.index.ef_construction = 64;
    config
}

pub fn memory_backend() -> Arc<MemoryIndexBackend> {
    Arc::new(MemoryIndexBackend::new())
}

pub fn legacy_row(vector: Vec<f32>, group_id: &str, sequence_index: i64, file_id: &str) -> StoredRow {
    StoredRow::new()
        .with(FIELD_VECTOR, vector)
        .with(FIELD_GROUP_ID, group_id)
        .with(FIELD_SEQUENCE_INDEX, sequence_index)
        .with(FIELD_FILE_ID, file_id)
}

/// Create a collection with the pre-media schema and fill it with rows.
pub async fn seed_legacy_collection(backend: &dyn IndexBackend, name: &str, rows: Vec<StoredRow>) {
    let dim = rows
        .first()
        .and_then(|r| r.vector())
        .map(|v| v.len())
        .unwrap_or(2);
    backend
        .create_collection(CollectionSchema::legacy(name, dim))
        .await
        .unwrap();
    backend
        .create_index(name, IndexParams::hnsw(16, 64, 64))
        .await
        .unwrap();
    backend.load_collection(name).await.unwrap();
    if !rows.is_empty() {
        backend.insert(name, rows).await.unwrap();
    }
}

/// `count` legacy rows spread over groups of three, two groups per file
pub fn legacy_rows(count: usize) -> Vec<StoredRow> {
    (0..count)
        .map(|i| {
            let group = i / 3;
            let angle = i as f32 * 0.37;
            legacy_row(
                vec![angle.cos(), angle.sin()],
                &format!("page-{group}"),
                (i % 3) as i64,
                &format!("file-{}", group / 2),
            )
        })
        .collect()
}

/// Catalog that knows a fixed set of files and fails for another set
#[derive(Default)]
pub struct StaticCatalog {
    known: HashSet<String>,
    failing: HashSet<String>,
    pub lookups: AtomicUsize,
}

impl StaticCatalog {
    pub fn knowing(files: &[&str]) -> Self {
        Self {
            known: files.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing_for(mut self, files: &[&str]) -> Self {
        self.failing = files.iter().map(|f| f.to_string()).collect();
        self
    }
}

#[async_trait]
impl FileCatalog for StaticCatalog {
    async fn lookup(
        &self,
        file_id: &str,
        _group_id: &str,
        _segment_id: Option<&str>,
    ) -> kbvec::Result<Option<FileMetadata>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(file_id) {
            return Err(kbvec::KbError::StoreUnavailable {
                collection: "catalog".to_string(),
                operation: "lookup",
                reason: "catalog offline".to_string(),
            });
        }
        Ok(self.known.contains(file_id).then(|| FileMetadata {
            file_id: file_id.to_string(),
            filename: format!("{file_id}.pdf"),
            storage_url: format!("s3://bucket/{file_id}"),
            knowledge_base_id: "kb".to_string(),
        }))
    }
}

fn group_of(filter: Option<&Filter>) -> Option<String> {
    match filter? {
        Filter::Field {
            field,
            condition: FieldCondition::Equals(FieldValue::Str(group)),
        } if field == FIELD_GROUP_ID => Some(group.clone()),
        _ => None,
    }
}

/// Backend double that fabricates coarse hits and records group fetches
///
/// Every query vector yields `groups_per_query` hits. With `overlap` all
/// query vectors hit the same groups; otherwise each query vector hits its
/// own. Each group holds one vector equal to the query's first component.
pub struct InstrumentedBackend {
    pub dim: usize,
    pub groups_per_query: usize,
    pub overlap: bool,
    pub delay: Duration,
    pub empty_groups: HashSet<String>,
    pub failing_groups: HashSet<String>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fetches: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
}

impl InstrumentedBackend {
    pub fn new(dim: usize, groups_per_query: usize) -> Self {
        Self {
            dim,
            groups_per_query,
            overlap: false,
            delay: Duration::from_millis(2),
            empty_groups: HashSet::new(),
            failing_groups: HashSet::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, group_id: &str, file_id: &str) -> VectorRecord {
        let mut vector = vec![0.0; self.dim];
        vector[0] = 1.0;
        VectorRecord::batch(group_id, file_id, vec![vector], MediaType::Image, None).remove(0)
    }

    pub fn file_of(group_id: &str) -> String {
        format!("file-{group_id}")
    }
}

#[async_trait]
impl IndexBackend for InstrumentedBackend {
    fn backend_name(&self) -> &'static str {
        "instrumented"
    }

    async fn has_collection(&self, _name: &str) -> BackendResult<bool> {
        Ok(true)
    }

    async fn describe_collection(&self, name: &str) -> BackendResult<CollectionSchema> {
        Ok(CollectionSchema::current(name, self.dim))
    }

    async fn create_collection(&self, schema: CollectionSchema) -> BackendResult<()> {
        Err(BackendError::CollectionExists(schema.name))
    }

    async fn create_index(&self, _name: &str, _params: IndexParams) -> BackendResult<()> {
        Ok(())
    }

    async fn load_collection(&self, _name: &str) -> BackendResult<()> {
        Ok(())
    }

    async fn drop_collection(&self, _name: &str) -> BackendResult<()> {
        Ok(())
    }

    async fn list_collections(&self) -> BackendResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn insert(&self, _name: &str, rows: Vec<StoredRow>) -> BackendResult<Vec<PrimaryKey>> {
        Ok((0..rows.len() as i64).collect())
    }

    async fn delete(&self, _name: &str, filter: &Filter) -> BackendResult<usize> {
        if let Filter::Field {
            condition: FieldCondition::In(values),
            ..
        } = filter
        {
            let mut deleted = self.deleted.lock();
            for value in values {
                if let Some(file) = value.as_str() {
                    deleted.push(file.to_string());
                }
            }
            return Ok(values.len());
        }
        Ok(0)
    }

    async fn search(&self, _name: &str, request: SearchRequest) -> BackendResult<Vec<Vec<BackendHit>>> {
        Ok(request
            .queries
            .iter()
            .enumerate()
            .map(|(qi, _)| {
                (0..self.groups_per_query)
                    .map(|j| {
                        let index = if self.overlap { j } else { qi * self.groups_per_query + j };
                        let group = format!("g{index}");
                        let record = self.record(&group, &Self::file_of(&group));
                        BackendHit {
                            pk: index as i64,
                            score: 1.0,
                            row: record.to_row(CollectionShape::Current),
                        }
                    })
                    .collect()
            })
            .collect())
    }

    async fn query(&self, _name: &str, request: QueryRequest) -> BackendResult<Vec<StoredRow>> {
        let group = group_of(request.filter.as_ref())
            .ok_or_else(|| BackendError::InvalidRow("expected a group filter".to_string()))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_groups.contains(&group) {
            return Err(BackendError::Unavailable(format!("fetch of {group} failed")));
        }
        if self.empty_groups.contains(&group) {
            return Ok(Vec::new());
        }
        let record = self.record(&group, &Self::file_of(&group));
        Ok(vec![record.to_row(CollectionShape::Current)])
    }

    async fn row_count(&self, _name: &str) -> BackendResult<usize> {
        Ok(0)
    }

    async fn flush(&self, _name: &str) -> BackendResult<()> {
        Ok(())
    }
}

/// Memory backend whose scans, inserts or index builds can be switched to fail
pub struct FlakyBackend {
    pub inner: MemoryIndexBackend,
    pub fail_scans: AtomicBool,
    /// Number of upcoming `create_index` calls that fail
    pub failing_index_builds: AtomicUsize,
    /// Inserts start failing once this many rows were accepted
    pub insert_budget: Mutex<Option<usize>>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryIndexBackend::new(),
            fail_scans: AtomicBool::new(false),
            failing_index_builds: AtomicUsize::new(0),
            insert_budget: Mutex::new(None),
        }
    }
}

#[async_trait]
impl IndexBackend for FlakyBackend {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn has_collection(&self, name: &str) -> BackendResult<bool> {
        self.inner.has_collection(name).await
    }

    async fn describe_collection(&self, name: &str) -> BackendResult<CollectionSchema> {
        self.inner.describe_collection(name).await
    }

    async fn create_collection(&self, schema: CollectionSchema) -> BackendResult<()> {
        self.inner.create_collection(schema).await
    }

    async fn create_index(&self, name: &str, params: IndexParams) -> BackendResult<()> {
        let failing = self
            .failing_index_builds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BackendError::Unavailable("index build failed".to_string()));
        }
        self.inner.create_index(name, params).await
    }

    async fn load_collection(&self, name: &str) -> BackendResult<()> {
        self.inner.load_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> BackendResult<()> {
        self.inner.drop_collection(name).await
    }

    async fn list_collections(&self) -> BackendResult<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn insert(&self, name: &str, rows: Vec<StoredRow>) -> BackendResult<Vec<PrimaryKey>> {
        {
            let mut budget = self.insert_budget.lock();
            if let Some(remaining) = budget.as_mut() {
                if rows.len() > *remaining {
                    return Err(BackendError::Unavailable("insert rejected".to_string()));
                }
                *remaining -= rows.len();
            }
        }
        self.inner.insert(name, rows).await
    }

    async fn delete(&self, name: &str, filter: &Filter) -> BackendResult<usize> {
        self.inner.delete(name, filter).await
    }

    async fn search(&self, name: &str, request: SearchRequest) -> BackendResult<Vec<Vec<BackendHit>>> {
        self.inner.search(name, request).await
    }

    async fn query(&self, name: &str, request: QueryRequest) -> BackendResult<Vec<StoredRow>> {
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("scan failed".to_string()));
        }
        self.inner.query(name, request).await
    }

    async fn row_count(&self, name: &str) -> BackendResult<usize> {
        self.inner.row_count(name).await
    }

    async fn flush(&self, name: &str) -> BackendResult<()> {
        self.inner.flush(name).await
    }
}
