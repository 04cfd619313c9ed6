use crate::cache::{CacheManager, CacheStats};
use crate::compat::{CompatibilityMatrix, CompatibilityRecord, CompatibilityValidator};
use crate::compression::CompressionEngine;
use crate::core::config::EngineConfig;
use crate::core::errors::{ModlinkError, Result};
use crate::core::limits::LoadStats;
use crate::loader::{ConcurrentLoader, ContentStore, LoadResult};
use crate::monitor::{Alert, PerformanceMonitor, PerformanceSample};
use crate::registry::{Module, ModuleId, Registry};
use crate::resolver::{LoadGroup, Resolver};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Load result plus the advisory scores of every loaded pair
#[derive(Debug, Clone)]
pub struct ValidatedLoad {
    pub load: LoadResult,
    pub compatibility: Vec<CompatibilityRecord>,
}

impl ValidatedLoad {
    pub fn incompatible_pairs(&self) -> impl Iterator<Item = &CompatibilityRecord> {
        self.compatibility.iter().filter(|r| r.is_incompatible())
    }
}

/// All components wired together from an [`EngineConfig`]
pub struct ModuleEngine {
    config: EngineConfig,
    registry: Arc<Registry>,
    cache: Arc<CacheManager>,
    loader: ConcurrentLoader,
    validator: CompatibilityValidator,
    monitor: Arc<PerformanceMonitor>,
    groups: BTreeMap<String, Vec<ModuleId>>,
}

impl ModuleEngine {
    pub fn from_config(config: EngineConfig, store: Arc<dyn ContentStore>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::from_modules(config.modules().cloned())?);
        let cache = Arc::new(CacheManager::new(config.cache.clone(), Arc::clone(&registry))?);
        let compression = Arc::new(CompressionEngine::new(config.compression.clone())?);
        let monitor = Arc::new(PerformanceMonitor::new(config.monitor.clone())?);
        let loader = ConcurrentLoader::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            compression,
            store,
            config.loader.clone(),
        )?
        .with_monitor(Arc::clone(&monitor));
        let validator =
            CompatibilityValidator::new(CompatibilityMatrix::with_rules(&config.compatibility)?);

        let groups = config
            .groups
            .iter()
            .map(|group| {
                let members = group.modules.iter().map(|m| m.id.clone()).collect();
                (group.name.clone(), members)
            })
            .collect();

        info!(
            "Module engine ready: {} modules in {} groups",
            registry.len(),
            config.groups.len()
        );

        Ok(Self {
            config,
            registry,
            cache,
            loader,
            validator,
            monitor,
            groups,
        })
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P, store: Arc<dyn ContentStore>) -> Result<Self> {
        Self::from_config(EngineConfig::from_yaml_file(path)?, store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn group_members(&self, name: &str) -> Option<&[ModuleId]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn register(&self, module: Module) -> Result<()> {
        self.registry.register(module)
    }

    /// Rewire a module's dependencies and drop every cached result built on it
    pub fn update_dependencies(
        &self,
        id: &str,
        dependencies: BTreeSet<ModuleId>,
        dependency_versions: BTreeMap<ModuleId, String>,
    ) -> Result<BTreeSet<ModuleId>> {
        let affected = self
            .registry
            .update_dependencies(id, dependencies, dependency_versions)?;
        self.cache.invalidate_all(&affected);
        Ok(affected)
    }

    pub fn invalidate(&self, id: &str) -> BTreeSet<ModuleId> {
        self.cache.invalidate(id)
    }

    pub fn resolve(&self, ids: &[ModuleId]) -> Result<Vec<LoadGroup>> {
        Resolver::new(&self.registry).resolve(ids.iter())
    }

    /// Load with the configured parallelism and timeout
    pub async fn load_all(&self, ids: &[ModuleId]) -> Result<LoadResult> {
        self.loader.load(ids).await
    }

    pub async fn load_all_with(
        &self,
        ids: &[ModuleId],
        max_parallel: usize,
        per_module_timeout: Duration,
    ) -> Result<LoadResult> {
        self.loader
            .load_all(ids, max_parallel, per_module_timeout)
            .await
    }

    /// Load every member of a configured group
    pub async fn load_group(&self, name: &str) -> Result<LoadResult> {
        let members = self.group_members(name).ok_or_else(|| {
            ModlinkError::validation_field(format!("unknown module group '{}'", name), "group")
        })?;
        self.loader.load(members).await
    }

    /// Score a pair of registered modules, served from the record tier when possible
    pub fn score(&self, a: &str, b: &str) -> Result<CompatibilityRecord> {
        let module_a = self.registry.get_required(a)?;
        let module_b = self.registry.get_required(b)?;

        if let Some(record) = self.cache.get_compat(a, b) {
            debug!("Compatibility record for ({}, {}) served from cache", a, b);
            return Ok(record);
        }

        let record = self.validator.score(&module_a, &module_b);
        self.cache.put_compat(record.clone());
        Ok(record)
    }

    /// Score every unordered pair of `ids`
    pub fn score_combinations(&self, ids: &[ModuleId]) -> Result<Vec<CompatibilityRecord>> {
        let unique: BTreeSet<&ModuleId> = ids.iter().collect();
        let unique: Vec<&ModuleId> = unique.into_iter().collect();

        let mut records = Vec::new();
        for (i, a) in unique.iter().enumerate() {
            for b in &unique[i + 1..] {
                records.push(self.score(a, b)?);
            }
        }
        Ok(records)
    }

    /// Load, then score every pair of loaded modules. Scores never block the
    /// load; they are recorded into the monitor for threshold checks.
    pub async fn load_and_validate(&self, ids: &[ModuleId]) -> Result<ValidatedLoad> {
        let load = self.load_all(ids).await?;
        let compatibility = self.score_combinations(&load.loaded_ids())?;
        for record in &compatibility {
            self.monitor.record_compatibility(record);
        }

        let incompatible = compatibility.iter().filter(|r| r.is_incompatible()).count();
        info!(
            "Validated {} module pairs ({} incompatible)",
            compatibility.len(),
            incompatible
        );
        Ok(ValidatedLoad {
            load,
            compatibility,
        })
    }

    pub fn record(&self, sample: PerformanceSample) {
        self.monitor.record(sample);
    }

    pub fn check_thresholds(&self) -> Vec<Alert> {
        self.monitor.check_thresholds()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn load_stats(&self) -> LoadStats {
        self.loader.load_stats()
    }

    pub fn cancel(&self) {
        self.loader.cancel();
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<usize> {
        self.cache.save_snapshot(path)
    }

    pub fn restore_snapshot(&self, path: &Path) -> Result<usize> {
        self.cache.restore_snapshot(path)
    }
}
