// Core infrastructure shared by every component

pub mod config;
pub mod errors;
pub mod limits;

// Re-export commonly used types
pub use config::{CompatibilityRule, EngineConfig, ModuleGroup};
pub use errors::{ModlinkError, Result};
pub use limits::{LoadGuard, LoadStats, LoadTracker, LoaderLimits};
