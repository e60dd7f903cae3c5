// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Collection snapshots
//!
//! One file per collection: `{name}.snap` holding
//! `magic | version | payload length | bincode payload | crc32(payload)`,
//! all integers little endian. Writes go to a temporary file first and are
//! renamed into place.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use super::BackendResult;
use crate::core::{BackendError, PrimaryKey};
use crate::schema::{CollectionSchema, IndexParams, StoredRow};

const MAGIC: &[u8; 4] = b"KBVS";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 12;
const EXTENSION: &str = "snap";

/// Persisted state of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub schema: CollectionSchema,
    pub index: Option<IndexParams>,
    pub loaded: bool,
    pub next_pk: PrimaryKey,
    pub rows: Vec<StoredRow>,
}

pub fn snapshot_path(dir: &Path, collection: &str) -> PathBuf {
    dir.join(format!("{collection}.{EXTENSION}"))
}

pub fn encode(snapshot: &CollectionSnapshot) -> BackendResult<Vec<u8>> {
    let payload = bincode::serialize(snapshot)?;
    let len = payload_len(payload.len())?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len() + 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> BackendResult<CollectionSnapshot> {
    if bytes.len() < HEADER_LEN + 4 || &bytes[..4] != MAGIC {
        return Err(BackendError::Serialization("not a collection snapshot".to_string()));
    }
    let version = read_u32(&bytes[4..8]);
    if version != FORMAT_VERSION {
        return Err(BackendError::Serialization(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let len = read_u32(&bytes[8..12]) as usize;
    if bytes.len() != HEADER_LEN + len + 4 {
        return Err(BackendError::Serialization("truncated snapshot".to_string()));
    }

    let payload = &bytes[HEADER_LEN..HEADER_LEN + len];
    let stored_checksum = read_u32(&bytes[HEADER_LEN + len..]);
    if stored_checksum != crc32fast::hash(payload) {
        return Err(BackendError::Serialization("snapshot checksum mismatch".to_string()));
    }
    Ok(bincode::deserialize(payload)?)
}

/// Length field of the frame; payloads must fit in 32 bits.
fn payload_len(len: usize) -> BackendResult<u32> {
    u32::try_from(len).map_err(|_| {
        BackendError::Serialization(format!(
            "snapshot payload of {len} bytes exceeds the {} byte frame limit",
            u32::MAX
        ))
    })
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

pub async fn write(dir: &Path, collection: &str, bytes: &[u8]) -> BackendResult<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = snapshot_path(dir, collection);
    let tmp = path.with_extension("snap.tmp");

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, &path).await?;
    debug!("wrote snapshot {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

pub async fn remove(dir: &Path, collection: &str) -> BackendResult<()> {
    match tokio::fs::remove_file(snapshot_path(dir, collection)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Load every snapshot in `dir`. A snapshot that cannot be decoded fails the
/// whole load.
pub async fn read_all(dir: &Path) -> BackendResult<Vec<CollectionSnapshot>> {
    let mut snapshots = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshots),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            continue;
        }
        let bytes = tokio::fs::read(&path).await?;
        let snapshot = decode(&bytes).map_err(|e| {
            error!("snapshot {} is unreadable: {}", path.display(), e);
            BackendError::Serialization(format!("snapshot {}: {}", path.display(), e))
        })?;
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}
