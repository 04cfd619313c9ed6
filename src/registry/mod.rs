//! Module Registry
//!
//! In-memory catalog of module metadata plus the reverse-dependency index
//! used by the cache to cascade invalidations.

mod module;

pub use module::{Category, Module, ModuleId, SizeClass};

use crate::core::errors::{ModlinkError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// Registry for module metadata
#[derive(Debug, Default)]
pub struct Registry {
    modules: DashMap<ModuleId, Arc<Module>>,
    /// dependency id -> ids of modules that declare it
    dependents: RwLock<HashMap<ModuleId, BTreeSet<ModuleId>>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of modules, failing on the first invalid one
    pub fn from_modules<I: IntoIterator<Item = Module>>(modules: I) -> Result<Self> {
        let registry = Self::new();
        for module in modules {
            registry.register(module)?;
        }
        Ok(registry)
    }

    /// Register a module. Dependencies may reference modules registered later.
    pub fn register(&self, module: Module) -> Result<()> {
        if module.id.is_empty() {
            return Err(ModlinkError::validation_field("module id cannot be empty", "id"));
        }
        if module.dependencies.contains(&module.id) {
            return Err(ModlinkError::validation_field(
                format!("module {} declares itself as a dependency", module.id),
                "dependencies",
            ));
        }
        let id = module.id.clone();
        let deps = module.dependencies.clone();
        match self.modules.entry(id.clone()) {
            Entry::Occupied(_) => return Err(ModlinkError::DuplicateModule { id }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(module));
            }
        }

        // The shard lock is released before the index lock is taken
        {
            let mut dependents = self.dependents.write();
            for dep in &deps {
                dependents.entry(dep.clone()).or_default().insert(id.clone());
            }
        }

        debug!("Registered module {} ({} deps)", id, deps.len());
        Ok(())
    }

    /// Get a module by id
    pub fn get(&self, id: &str) -> Option<Arc<Module>> {
        self.modules.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_required(&self, id: &str) -> Result<Arc<Module>> {
        self.get(id).ok_or_else(|| ModlinkError::unknown_module(id))
    }

    /// Check if a module is registered
    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    /// All registered ids, sorted
    pub fn ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.modules.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Direct dependents of `id`
    pub fn dependents(&self, id: &str) -> BTreeSet<ModuleId> {
        self.dependents.read().get(id).cloned().unwrap_or_default()
    }

    /// Every module that depends on `id`, directly or transitively. Excludes `id`.
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<ModuleId> {
        let index = self.dependents.read();
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            if let Some(direct) = index.get(current) {
                for dependent in direct {
                    if dependent != id && seen.insert(dependent.clone()) {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }
        seen
    }

    /// Replace the dependency set of a registered module.
    ///
    /// Returns `id` together with all of its transitive dependents; these are the
    /// modules whose cached output is now stale.
    pub fn update_dependencies(
        &self,
        id: &str,
        dependencies: BTreeSet<ModuleId>,
        dependency_versions: BTreeMap<ModuleId, String>,
    ) -> Result<BTreeSet<ModuleId>> {
        let current = self.get_required(id)?;

        if dependencies.contains(id) {
            return Err(ModlinkError::validation_field(
                format!("module {} declares itself as a dependency", id),
                "dependencies",
            ));
        }
        for dep in &dependencies {
            if !self.contains(dep) {
                return Err(ModlinkError::unknown_dependency(dep.clone(), id));
            }
        }

        // A new dependency that already depends on `id` would close a cycle
        let upstream = self.transitive_dependents(id);
        let closing: Vec<ModuleId> = dependencies
            .iter()
            .filter(|dep| upstream.contains(*dep))
            .cloned()
            .collect();
        if !closing.is_empty() {
            let mut ids = closing;
            ids.push(id.to_string());
            return Err(ModlinkError::cycle(ids));
        }

        let mut updated = (*current).clone();
        let removed: Vec<ModuleId> = updated
            .dependencies
            .difference(&dependencies)
            .cloned()
            .collect();
        let added: Vec<ModuleId> = dependencies
            .difference(&updated.dependencies)
            .cloned()
            .collect();
        updated.dependencies = dependencies;
        updated.dependency_versions = dependency_versions;

        {
            let mut index = self.dependents.write();
            for dep in &removed {
                if let Some(set) = index.get_mut(dep) {
                    set.remove(id);
                    if set.is_empty() {
                        index.remove(dep);
                    }
                }
            }
            for dep in &added {
                index.entry(dep.clone()).or_default().insert(id.to_string());
            }
        }
        self.modules.insert(id.to_string(), Arc::new(updated));

        let mut affected = self.transitive_dependents(id);
        affected.insert(id.to_string());
        info!(
            "Dependencies of {} changed (+{} -{}), {} modules affected",
            id,
            added.len(),
            removed.len(),
            affected.len()
        );
        Ok(affected)
    }
}
