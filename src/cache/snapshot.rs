use super::{CacheEntry, CacheManager, CurrentState};
use crate::compression::CompressedPayload;
use crate::core::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const ENTRIES_TREE: &str = "entries";
const FINGERPRINTS_TREE: &str = "fingerprints";

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    module_id: String,
    content_hash: String,
    payload: CompressedPayload,
    created_at: DateTime<Utc>,
    ttl_millis: u64,
    dependency_fingerprint: String,
}

fn entry_key(id: &str, hash: &str) -> Vec<u8> {
    format!("{}\0{}", id, hash).into_bytes()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let serialized = bincode::serialize(value)?;
    Ok(zstd::encode_all(&*serialized, 3)?)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    let raw = zstd::decode_all(bytes)?;
    Ok(bincode::deserialize(&raw)?)
}

impl CacheManager {
    /// Persist the per-module tier and the fingerprint table. Replaces any
    /// previous snapshot at `path`.
    pub fn save_snapshot(&self, path: &Path) -> Result<usize> {
        let db = sled::open(path)?;
        let entries_tree = db.open_tree(ENTRIES_TREE)?;
        let fingerprints_tree = db.open_tree(FINGERPRINTS_TREE)?;
        entries_tree.clear()?;
        fingerprints_tree.clear()?;

        let mut saved = 0;
        for item in self.per_module.iter() {
            let entry = item.value();
            let stored = StoredEntry {
                module_id: entry.module_id.clone(),
                content_hash: entry.content_hash.clone(),
                payload: (*entry.payload).clone(),
                created_at: entry.created_at,
                ttl_millis: entry.ttl.as_millis() as u64,
                dependency_fingerprint: entry.dependency_fingerprint.clone(),
            };
            entries_tree.insert(
                entry_key(&entry.module_id, &entry.content_hash),
                encode(&stored)?,
            )?;
            saved += 1;
        }

        for item in self.current.iter() {
            fingerprints_tree.insert(item.key().as_bytes(), encode(item.value())?)?;
        }

        db.flush()?;
        info!("Saved cache snapshot with {} entries to {:?}", saved, path);
        Ok(saved)
    }

    /// Load a snapshot written by `save_snapshot`. Expired entries are skipped.
    /// Restored entries enter the global tier on their first hit.
    pub fn restore_snapshot(&self, path: &Path) -> Result<usize> {
        let db = sled::open(path)?;
        let entries_tree = db.open_tree(ENTRIES_TREE)?;
        let fingerprints_tree = db.open_tree(FINGERPRINTS_TREE)?;

        for item in fingerprints_tree.iter() {
            let (key, value) = item?;
            let id = String::from_utf8_lossy(&key).into_owned();
            let state: CurrentState = decode(&value)?;
            self.current.insert(id, state);
        }

        let now = Utc::now();
        let mut restored = 0;
        for item in entries_tree.iter() {
            let (_, value) = item?;
            let stored: StoredEntry = decode(&value)?;
            let entry = CacheEntry::with_created_at(
                stored.module_id,
                stored.content_hash,
                stored.payload,
                stored.created_at,
                Duration::from_millis(stored.ttl_millis),
                stored.dependency_fingerprint,
                self.tick(),
            );
            if entry.is_expired(now) {
                debug!("Skipping expired snapshot entry for {}", entry.module_id);
                continue;
            }
            self.per_module.insert(
                (entry.module_id.clone(), entry.content_hash.clone()),
                Arc::new(entry),
            );
            restored += 1;
        }

        info!("Restored {} cache entries from {:?}", restored, path);
        Ok(restored)
    }
}
