//! Module resolution and loading engine.
//!
//! Resolves inter-dependent modules into ordered parallel load groups, loads
//! them concurrently from a [`ContentStore`], compresses large payloads,
//! caches results with dependency-aware invalidation and scores pairwise
//! compatibility.

// Core infrastructure modules
pub mod core;

pub mod cache;
pub mod compat;
pub mod compression;
pub mod engine;
pub mod loader;
pub mod monitor;
pub mod registry;
pub mod resolver;

// Re-exports for convenience
pub use crate::core::config::{CompatibilityRule, EngineConfig, ModuleGroup};
pub use crate::core::errors::{ModlinkError, Result};
pub use crate::core::limits::{LoadStats, LoadTracker, LoaderLimits};
pub use cache::{CacheConfig, CacheManager, CacheStats};
pub use compat::{CompatLevel, CompatibilityMatrix, CompatibilityRecord, CompatibilityValidator, Reason};
pub use compression::{CompressedPayload, CompressionConfig, CompressionEngine, CompressionMode};
pub use engine::{ModuleEngine, ValidatedLoad};
pub use loader::{
    ConcurrentLoader, ContentStore, FsContentStore, InMemoryContentStore, LoadFailure, LoadResult,
    LoadedModule,
};
pub use monitor::{
    Alert, AlertMetric, AlertSeverity, MonitorConfig, OperationMetrics, PerformanceMonitor,
    PerformanceSample,
};
pub use registry::{Category, Module, ModuleId, Registry, SizeClass};
pub use resolver::{LoadGroup, Resolver};
