//! Cache Manager
//!
//! Two tiers of loaded module output:
//! - a global tier bounded by a byte budget with least-recently-used eviction;
//! - an unbounded per-module tier keyed by `(module id, content hash)`.
//!
//! A lookup only hits while the entry's TTL holds and its dependency
//! fingerprint matches the fingerprint computed from the current state of its
//! dependencies. Anything else is a miss and the entry is dropped on the spot.
//! Compatibility records live in a third tier that follows the same
//! invalidation rule.

mod entry;
mod hash;
mod snapshot;

pub use entry::CacheEntry;
pub use hash::{content_hash, fingerprint};

use crate::compat::CompatibilityRecord;
use crate::compression::CompressedPayload;
use crate::core::errors::{ModlinkError, Result};
use crate::registry::{ModuleId, Registry};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for cache behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget of the global tier
    pub byte_budget: usize,
    /// TTL applied when `put` is called without one
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            byte_budget: 64 * 1024 * 1024, // 64MB
            default_ttl_secs: 3600,        // 1 hour
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.byte_budget == 0 {
            return Err(ModlinkError::configuration_field(
                "byte_budget cannot be zero",
                "cache.byte_budget",
            ));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// LRU evictions from the global tier
    pub evictions: u64,
    pub expirations: u64,
    /// Fingerprint mismatches found on lookup
    pub corruptions: u64,
    pub invalidations: u64,
    pub bytes_used: usize,
    pub byte_budget: usize,
    pub global_entries: usize,
    pub module_entries: usize,
    pub compat_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn utilization(&self) -> f64 {
        if self.byte_budget == 0 {
            0.0
        } else {
            self.bytes_used as f64 / self.byte_budget as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    corruptions: AtomicU64,
    invalidations: AtomicU64,
}

#[derive(Debug, Default)]
struct GlobalTier {
    entries: HashMap<ModuleId, Arc<CacheEntry>>,
    bytes: usize,
}

impl GlobalTier {
    fn remove(&mut self, id: &str) -> Option<Arc<CacheEntry>> {
        let removed = self.entries.remove(id)?;
        self.bytes = self.bytes.saturating_sub(removed.size());
        Some(removed)
    }
}

/// Content hash and fingerprint of the most recently stored version of a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CurrentState {
    content_hash: String,
    fingerprint: String,
}

enum Staleness {
    Expired,
    FingerprintMismatch,
}

#[derive(Debug)]
pub struct CacheManager {
    config: CacheConfig,
    registry: Arc<Registry>,
    global: RwLock<GlobalTier>,
    per_module: DashMap<(ModuleId, String), Arc<CacheEntry>>,
    current: DashMap<ModuleId, CurrentState>,
    compat: DashMap<(ModuleId, ModuleId), CompatibilityRecord>,
    clock: AtomicU64,
    counters: Counters,
}

impl CacheManager {
    pub fn new(config: CacheConfig, registry: Arc<Registry>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            registry,
            global: RwLock::new(GlobalTier::default()),
            per_module: DashMap::new(),
            current: DashMap::new(),
            compat: DashMap::new(),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fingerprint an entry for `id` must carry to be valid right now
    pub fn fingerprint_for(&self, id: &str, content_hash: &str) -> String {
        let deps: Vec<(ModuleId, Option<String>)> = self
            .registry
            .get(id)
            .map(|module| {
                module
                    .dependencies
                    .iter()
                    .map(|dep| {
                        let current = self.current.get(dep).map(|s| s.fingerprint.clone());
                        (dep.clone(), current)
                    })
                    .collect()
            })
            .unwrap_or_default();

        fingerprint(
            content_hash,
            deps.iter().map(|(id, fp)| (id.as_str(), fp.as_deref())),
        )
    }

    /// Fingerprint of the last stored version of `id`
    pub fn current_fingerprint(&self, id: &str) -> Option<String> {
        self.current.get(id).map(|s| s.fingerprint.clone())
    }

    pub fn get(&self, id: &str, content_hash: &str) -> Option<Arc<CompressedPayload>> {
        let global_hit = {
            let tier = self.global.read();
            tier.entries
                .get(id)
                .filter(|entry| entry.content_hash == content_hash)
                .cloned()
        };

        if let Some(entry) = global_hit {
            return self.validate_hit(entry, false);
        }

        let tier_hit = self
            .per_module
            .get(&(id.to_string(), content_hash.to_string()))
            .map(|entry| Arc::clone(entry.value()));

        match tier_hit {
            Some(entry) => self.validate_hit(entry, true),
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss for {}", id);
                None
            }
        }
    }

    fn validate_hit(
        &self,
        entry: Arc<CacheEntry>,
        promote: bool,
    ) -> Option<Arc<CompressedPayload>> {
        match self.staleness(&entry) {
            None => {
                entry.touch(self.tick());
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {}", entry.module_id);
                let live = self
                    .current
                    .get(&entry.module_id)
                    .is_some_and(|state| state.content_hash == entry.content_hash);
                if !live {
                    // An older version came back from the module tier
                    self.set_current(
                        &entry.module_id,
                        &entry.content_hash,
                        &entry.dependency_fingerprint,
                    );
                }
                let payload = Arc::clone(&entry.payload);
                if promote {
                    self.insert_global(entry);
                }
                Some(payload)
            }
            Some(reason) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.drop_stale(&entry, reason);
                None
            }
        }
    }

    fn staleness(&self, entry: &CacheEntry) -> Option<Staleness> {
        if entry.is_expired(Utc::now()) {
            return Some(Staleness::Expired);
        }
        let expected = self.fingerprint_for(&entry.module_id, &entry.content_hash);
        if expected != entry.dependency_fingerprint {
            return Some(Staleness::FingerprintMismatch);
        }
        None
    }

    fn drop_stale(&self, entry: &Arc<CacheEntry>, reason: Staleness) {
        match reason {
            Staleness::Expired => {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                debug!("Cache entry for {} expired", entry.module_id);
                {
                    let mut tier = self.global.write();
                    if tier
                        .entries
                        .get(&entry.module_id)
                        .is_some_and(|current| Arc::ptr_eq(current, entry))
                    {
                        tier.remove(&entry.module_id);
                    }
                }
                self.per_module.remove_if(
                    &(entry.module_id.clone(), entry.content_hash.clone()),
                    |_, current| Arc::ptr_eq(current, entry),
                );
            }
            Staleness::FingerprintMismatch => {
                self.counters.corruptions.fetch_add(1, Ordering::Relaxed);
                let corruption = ModlinkError::CacheCorruption {
                    module_id: entry.module_id.clone(),
                };
                debug!("{}; treating as miss", corruption);
                // Anything built on top of this entry is stale as well
                self.invalidate(&entry.module_id);
            }
        }
    }

    /// Store a payload. `ttl = None` uses the configured default.
    /// Returns the shared handle to the stored payload.
    pub fn put(
        &self,
        id: &str,
        content_hash: &str,
        payload: CompressedPayload,
        ttl: Option<Duration>,
        dependency_fingerprint: String,
    ) -> Result<Arc<CompressedPayload>> {
        if id.is_empty() {
            return Err(ModlinkError::validation_field("module id cannot be empty", "id"));
        }

        self.set_current(id, content_hash, &dependency_fingerprint);

        let entry = Arc::new(CacheEntry::new(
            id.to_string(),
            content_hash.to_string(),
            payload,
            ttl.unwrap_or_else(|| self.config.default_ttl()),
            dependency_fingerprint,
            self.tick(),
        ));

        self.per_module.insert(
            (id.to_string(), content_hash.to_string()),
            Arc::clone(&entry),
        );
        let stored = Arc::clone(&entry.payload);
        self.insert_global(entry);
        Ok(stored)
    }

    /// Record `content_hash` as the live version of `id`. Switching to a
    /// different hash, forward or back, invalidates every transitive dependent.
    fn set_current(&self, id: &str, content_hash: &str, fingerprint: &str) {
        let previous = self.current.insert(
            id.to_string(),
            CurrentState {
                content_hash: content_hash.to_string(),
                fingerprint: fingerprint.to_string(),
            },
        );
        let changed = previous.is_some_and(|previous| previous.content_hash != content_hash);
        if !changed {
            return;
        }
        let dependents = self.registry.transitive_dependents(id);
        if !dependents.is_empty() {
            info!(
                "Content of {} changed, invalidating {} dependents",
                id,
                dependents.len()
            );
            self.remove_modules(&dependents);
        }
    }

    fn insert_global(&self, entry: Arc<CacheEntry>) {
        let mut tier = self.global.write();
        tier.remove(&entry.module_id);

        if entry.size() > self.config.byte_budget {
            debug!(
                "Entry for {} ({} bytes) exceeds the global budget, kept in module tier only",
                entry.module_id,
                entry.size()
            );
            return;
        }

        let id = entry.module_id.clone();
        tier.bytes += entry.size();
        tier.entries.insert(id.clone(), entry);

        if tier.bytes <= self.config.byte_budget {
            return;
        }

        // Evict least recently used until the budget holds again
        let mut by_age: Vec<(ModuleId, u64)> = tier
            .entries
            .iter()
            .filter(|(key, _)| **key != id)
            .map(|(key, entry)| (key.clone(), entry.last_access()))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        for (key, _) in by_age {
            if tier.bytes <= self.config.byte_budget {
                break;
            }
            if tier.remove(&key).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Evicted {} from global cache tier", key);
            }
        }
    }

    /// Drop `id` and every transitive dependent from all tiers.
    /// Returns the invalidated ids.
    pub fn invalidate(&self, id: &str) -> BTreeSet<ModuleId> {
        let mut affected = self.registry.transitive_dependents(id);
        affected.insert(id.to_string());
        self.remove_modules(&affected);
        info!("Invalidated {} cache modules starting at {}", affected.len(), id);
        affected
    }

    /// Drop a precomputed set of modules, e.g. the result of a registry update
    pub fn invalidate_all(&self, ids: &BTreeSet<ModuleId>) {
        self.remove_modules(ids);
    }

    fn remove_modules(&self, ids: &BTreeSet<ModuleId>) {
        {
            let mut tier = self.global.write();
            for id in ids {
                tier.remove(id);
            }
        }
        self.per_module.retain(|(id, _), _| !ids.contains(id));
        for id in ids {
            self.current.remove(id);
        }
        self.compat
            .retain(|(a, b), _| !ids.contains(a) && !ids.contains(b));
        self.counters
            .invalidations
            .fetch_add(ids.len() as u64, Ordering::Relaxed);
    }

    /// Cached compatibility record for an unordered pair
    pub fn get_compat(&self, a: &str, b: &str) -> Option<CompatibilityRecord> {
        let key = ordered_pair(a, b);
        self.compat.get(&key).map(|record| record.value().clone())
    }

    pub fn put_compat(&self, record: CompatibilityRecord) {
        let key = ordered_pair(&record.module_a, &record.module_b);
        self.compat.insert(key, record);
    }

    pub fn clear(&self) {
        *self.global.write() = GlobalTier::default();
        self.per_module.clear();
        self.current.clear();
        self.compat.clear();
    }

    pub fn bytes_used(&self) -> usize {
        self.global.read().bytes
    }

    pub fn stats(&self) -> CacheStats {
        let (bytes_used, global_entries) = {
            let tier = self.global.read();
            (tier.bytes, tier.entries.len())
        };
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            corruptions: self.counters.corruptions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            bytes_used,
            byte_budget: self.config.byte_budget,
            global_entries,
            module_entries: self.per_module.len(),
            compat_entries: self.compat.len(),
        }
    }
}

fn ordered_pair(a: &str, b: &str) -> (ModuleId, ModuleId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
