//! Concurrent Loader
//!
//! Loads the groups produced by the resolver strictly in order. Inside a
//! group at most `max_parallel` tokio tasks run at once; the next group starts
//! only after every task of the current one has finished.

mod store;

pub use store::{ContentStore, FsContentStore, InMemoryContentStore};

use crate::cache::{content_hash, CacheManager};
use crate::compression::{CompressedPayload, CompressionEngine};
use crate::core::errors::{ModlinkError, Result};
use crate::core::limits::{LoadStats, LoadTracker, LoaderLimits};
use crate::monitor::{PerformanceMonitor, PerformanceSample};
use crate::registry::{Module, ModuleId, Registry, SizeClass};
use crate::resolver::{LoadGroup, Resolver};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a single module did not load
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LoadFailure {
    #[error("load timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("dependency {dependency} failed")]
    DependencyFailed { dependency: ModuleId },

    #[error("content store error: {message}")]
    ContentStore { message: String },

    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("load cancelled")]
    Cancelled,

    #[error("load task aborted: {message}")]
    Aborted { message: String },
}

impl LoadFailure {
    /// Convert into the crate error for callers that want a single `Result`
    pub fn into_error(self, module_id: &str) -> ModlinkError {
        match self {
            LoadFailure::Timeout { timeout_ms } => {
                ModlinkError::timeout(format!("load {}", module_id), timeout_ms)
            }
            LoadFailure::DependencyFailed { dependency } => ModlinkError::DependencyFailed {
                module_id: module_id.to_string(),
                dependency,
            },
            LoadFailure::ContentStore { message } => {
                ModlinkError::content_store(module_id, message)
            }
            LoadFailure::PayloadTooLarge { size, limit } => ModlinkError::validation_field(
                format!("payload of {} is {} bytes, limit is {}", module_id, size, limit),
                "loader.max_payload_bytes",
            ),
            LoadFailure::Cancelled => ModlinkError::internal(format!("load of {} cancelled", module_id))
                .with_context("module_id", module_id),
            LoadFailure::Aborted { message } => ModlinkError::internal(message)
                .with_context("module_id", module_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub id: ModuleId,
    pub content_hash: String,
    pub payload: Arc<CompressedPayload>,
    pub from_cache: bool,
    pub duration: Duration,
    /// Bytes written to the cache by this load; 0 for a cache hit
    pub stored_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct LoadResult {
    pub run_id: Uuid,
    pub loaded: BTreeMap<ModuleId, LoadedModule>,
    pub failed: BTreeMap<ModuleId, LoadFailure>,
    pub from_cache: BTreeSet<ModuleId>,
    pub groups: Vec<LoadGroup>,
    pub elapsed: Duration,
}

impl LoadResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn loaded_ids(&self) -> Vec<ModuleId> {
        self.loaded.keys().cloned().collect()
    }

    /// `Err` for the lexicographically first failed module, if any
    pub fn ensure_complete(&self) -> Result<()> {
        match self.failed.iter().next() {
            Some((id, failure)) => Err(failure.clone().into_error(id)),
            None => Ok(()),
        }
    }
}

/// Everything a spawned load task needs
struct LoadContext {
    cache: Arc<CacheManager>,
    compression: Arc<CompressionEngine>,
    store: Arc<dyn ContentStore>,
    limits: LoaderLimits,
    monitor: Option<Arc<PerformanceMonitor>>,
}

pub struct ConcurrentLoader {
    registry: Arc<Registry>,
    context: Arc<LoadContext>,
    tracker: Arc<LoadTracker>,
    cancel: CancellationToken,
}

impl ConcurrentLoader {
    pub fn new(
        registry: Arc<Registry>,
        cache: Arc<CacheManager>,
        compression: Arc<CompressionEngine>,
        store: Arc<dyn ContentStore>,
        limits: LoaderLimits,
    ) -> Result<Self> {
        limits.validate()?;
        Ok(Self {
            registry,
            context: Arc::new(LoadContext {
                cache,
                compression,
                store,
                limits,
                monitor: None,
            }),
            tracker: Arc::new(LoadTracker::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Record a sample for every load into `monitor`
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        let context = LoadContext {
            cache: Arc::clone(&self.context.cache),
            compression: Arc::clone(&self.context.compression),
            store: Arc::clone(&self.context.store),
            limits: self.context.limits.clone(),
            monitor: Some(monitor),
        };
        self.context = Arc::new(context);
        self
    }

    pub fn limits(&self) -> &LoaderLimits {
        &self.context.limits
    }

    pub fn load_stats(&self) -> LoadStats {
        self.tracker.stats()
    }

    /// Token observed by every run of this loader. Once cancelled the loader
    /// stays cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        info!("Cancelling loader");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Load `ids` and their dependencies using the configured limits
    pub async fn load(&self, ids: &[ModuleId]) -> Result<LoadResult> {
        let limits = &self.context.limits;
        self.load_all(ids, limits.max_parallel, limits.per_module_timeout())
            .await
    }

    /// Resolve and load. Only resolution and configuration problems are
    /// returned as `Err`; per-module failures land in `LoadResult::failed`.
    pub async fn load_all(
        &self,
        ids: &[ModuleId],
        max_parallel: usize,
        per_module_timeout: Duration,
    ) -> Result<LoadResult> {
        if max_parallel == 0 {
            return Err(ModlinkError::configuration_field(
                "max_parallel must be greater than 0",
                "max_parallel",
            ));
        }

        let start = Instant::now();
        let groups = Resolver::new(&self.registry).resolve(ids.iter())?;
        self.context
            .limits
            .validate_dependency_depth(groups.len())?;

        let run_id = Uuid::new_v4();
        let module_count: usize = groups.iter().map(LoadGroup::len).sum();
        info!(
            "Load run {} started: {} modules in {} groups (max_parallel {})",
            run_id,
            module_count,
            groups.len(),
            max_parallel
        );

        let token = self.cancel.child_token();
        self.tracker.reset_peak();

        let mut loaded = BTreeMap::new();
        let mut failed: BTreeMap<ModuleId, LoadFailure> = BTreeMap::new();
        let mut from_cache = BTreeSet::new();

        for group in &groups {
            info!(
                "Dispatching group {} ({} modules)",
                group.index,
                group.len()
            );
            let semaphore = Arc::new(Semaphore::new(max_parallel));
            let mut tasks = FuturesUnordered::new();

            for id in &group.modules {
                if token.is_cancelled() {
                    failed.insert(id.clone(), LoadFailure::Cancelled);
                    continue;
                }

                let module = match self.registry.get(id) {
                    Some(module) => module,
                    None => {
                        failed.insert(
                            id.clone(),
                            LoadFailure::Aborted {
                                message: format!("module {} is no longer registered", id),
                            },
                        );
                        continue;
                    }
                };

                // Dependencies are sorted, so this is the smallest failed one
                if let Some(dep) = module.dependencies.iter().find(|d| failed.contains_key(*d)) {
                    debug!("Skipping {}: dependency {} failed", id, dep);
                    failed.insert(
                        id.clone(),
                        LoadFailure::DependencyFailed {
                            dependency: dep.clone(),
                        },
                    );
                    continue;
                }

                let handle = tokio::spawn(run_task(
                    Arc::clone(&self.context),
                    Arc::clone(&self.tracker),
                    Arc::clone(&semaphore),
                    token.clone(),
                    module,
                    per_module_timeout,
                ));
                let id = id.clone();
                tasks.push(async move { (id, handle.await) });
            }

            // Group barrier
            while let Some((id, joined)) = tasks.next().await {
                let outcome = joined.unwrap_or_else(|e| {
                    error!("Load task for {} aborted: {}", id, e);
                    Err(LoadFailure::Aborted {
                        message: e.to_string(),
                    })
                });
                match outcome {
                    Ok(module) => {
                        if module.from_cache {
                            from_cache.insert(id.clone());
                        }
                        loaded.insert(id, module);
                    }
                    Err(failure) => {
                        failed.insert(id, failure);
                    }
                }
            }
        }

        let elapsed = start.elapsed();
        if let Some(monitor) = &self.context.monitor {
            let stored: usize = loaded.values().map(|m: &LoadedModule| m.stored_bytes).sum();
            monitor.record(PerformanceSample::new("load_all", elapsed, stored as i64));
        }

        info!(
            "Load run {} finished in {:?}: {} loaded ({} from cache), {} failed",
            run_id,
            elapsed,
            loaded.len(),
            from_cache.len(),
            failed.len()
        );

        Ok(LoadResult {
            run_id,
            loaded,
            failed,
            from_cache,
            groups,
            elapsed,
        })
    }
}

async fn run_task(
    context: Arc<LoadContext>,
    tracker: Arc<LoadTracker>,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    module: Arc<Module>,
    per_module_timeout: Duration,
) -> std::result::Result<LoadedModule, LoadFailure> {
    let _permit = tokio::select! {
        _ = token.cancelled() => return Err(LoadFailure::Cancelled),
        permit = semaphore.acquire_owned() => permit.map_err(|e| LoadFailure::Aborted {
            message: format!("semaphore closed: {}", e),
        })?,
    };

    let _guard = tracker.start(&module.id);
    let outcome = tokio::select! {
        _ = token.cancelled() => Err(LoadFailure::Cancelled),
        result = tokio::time::timeout(per_module_timeout, load_one(&context, &module)) => {
            match result {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Load of {} timed out after {:?}", module.id, per_module_timeout);
                    tracker.record_timeout();
                    return Err(LoadFailure::Timeout {
                        timeout_ms: per_module_timeout.as_millis() as u64,
                    });
                }
            }
        }
    };

    if outcome.is_err() {
        tracker.record_failure();
    }
    outcome
}

async fn load_one(
    context: &LoadContext,
    module: &Module,
) -> std::result::Result<LoadedModule, LoadFailure> {
    let start = Instant::now();
    let id = module.id.as_str();

    let hash = context
        .store
        .content_hash(id)
        .await
        .map_err(|e| store_failure(id, e))?;

    if let Some(payload) = context.cache.get(id, &hash) {
        let duration = start.elapsed();
        if let Some(monitor) = &context.monitor {
            monitor.record(PerformanceSample::new("cache_hit", duration, 0));
        }
        return Ok(LoadedModule {
            id: id.to_string(),
            content_hash: hash,
            payload,
            from_cache: true,
            duration,
            stored_bytes: 0,
        });
    }

    let raw = context
        .store
        .fetch(id)
        .await
        .map_err(|e| store_failure(id, e))?;

    let limit = context.limits.max_payload_bytes;
    if raw.len() > limit {
        warn!("Payload of {} is {} bytes, limit is {}", id, raw.len(), limit);
        return Err(LoadFailure::PayloadTooLarge {
            size: raw.len(),
            limit,
        });
    }

    // The store may have changed between the hash and the fetch
    let hash = content_hash(&raw);
    let compressed = match module.size_class {
        SizeClass::Large => {
            let engine = Arc::clone(&context.compression);
            tokio::task::spawn_blocking(move || engine.compress(&raw, SizeClass::Large))
                .await
                .map_err(|e| LoadFailure::Aborted {
                    message: format!("compression task failed: {}", e),
                })?
        }
        size_class => context.compression.compress(&raw, size_class),
    };
    let stored_bytes = compressed.compressed_size();

    let fingerprint = context.cache.fingerprint_for(id, &hash);
    let payload = context
        .cache
        .put(id, &hash, compressed, None, fingerprint)
        .map_err(|e| LoadFailure::Aborted {
            message: e.to_string(),
        })?;

    let duration = start.elapsed();
    if let Some(monitor) = &context.monitor {
        monitor.record(PerformanceSample::new(
            "load_module",
            duration,
            stored_bytes as i64,
        ));
    }
    debug!("Loaded {} in {:?} ({} bytes stored)", id, duration, stored_bytes);

    Ok(LoadedModule {
        id: id.to_string(),
        content_hash: hash,
        payload,
        from_cache: false,
        duration,
        stored_bytes,
    })
}

fn store_failure(id: &str, err: anyhow::Error) -> LoadFailure {
    warn!("Content store failed for {}: {:#}", id, err);
    LoadFailure::ContentStore {
        message: format!("{:#}", err),
    }
}
