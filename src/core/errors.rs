use std::collections::HashMap;
use thiserror::Error;

/// Unified error type for the modlink library
#[derive(Debug, Error)]
pub enum ModlinkError {
    /// A requested module, or a dependency it references, is not registered
    #[error("Unknown module: {id}{}", referenced_by.as_ref().map(|r| format!(" (referenced by {})", r)).unwrap_or_default())]
    UnknownModule {
        id: String,
        referenced_by: Option<String>,
    },

    /// The dependency graph contains a cycle through the listed modules
    #[error("Dependency cycle detected between: {}", ids.join(", "))]
    CycleDetected { ids: Vec<String> },

    /// A module with the same id is already registered
    #[error("Module already registered: {id}")]
    DuplicateModule { id: String },

    /// Resolved plan is deeper than the configured limit
    #[error("Dependency depth {depth} exceeds limit {limit}")]
    DependencyDepthExceeded { depth: usize, limit: usize },

    /// Timeout errors
    #[error("Operation timed out: {operation} (timeout: {timeout_ms}ms)")]
    Timeout {
        operation: String,
        timeout_ms: u64,
    },

    /// A module could not be loaded because one of its dependencies failed
    #[error("Module {module_id} skipped: dependency {dependency} failed")]
    DependencyFailed {
        module_id: String,
        dependency: String,
    },

    /// Compression produced a payload larger than the input
    #[error("Compression overflow: {compressed_size} bytes from {original_size} (ratio {ratio:.3})")]
    CompressionOverflow {
        original_size: usize,
        compressed_size: usize,
        ratio: f64,
    },

    /// A cache entry's dependency fingerprint no longer matches
    #[error("Cache entry for {module_id} has a stale dependency fingerprint")]
    CacheCorruption { module_id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// The external content store failed
    #[error("Content store failed for {module_id}: {message}")]
    ContentStore {
        module_id: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network/IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Database/persistence errors
    #[error("Database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        context: HashMap<String, String>,
    },
}

impl ModlinkError {
    /// Create an unknown-module error
    pub fn unknown_module<S: Into<String>>(id: S) -> Self {
        Self::UnknownModule {
            id: id.into(),
            referenced_by: None,
        }
    }

    /// Create an unknown-module error naming the module that referenced it
    pub fn unknown_dependency<S: Into<String>, R: Into<String>>(id: S, referenced_by: R) -> Self {
        Self::UnknownModule {
            id: id.into(),
            referenced_by: Some(referenced_by.into()),
        }
    }

    pub fn cycle(mut ids: Vec<String>) -> Self {
        ids.sort();
        ids.dedup();
        Self::CycleDetected { ids }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error with field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn content_store<S: Into<String>, M: Into<String>>(module_id: S, message: M) -> Self {
        Self::ContentStore {
            module_id: module_id.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create a database error
    pub fn database<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        operation: S,
        source: E,
    ) -> Self {
        Self::Database {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    /// Add context to an internal error
    pub fn with_context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        if let Self::Internal { ref mut context, .. } = self {
            context.insert(key.into(), value.into());
        }
        self
    }

    /// Errors that stop a whole `load_all` call rather than a single module
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownModule { .. }
                | Self::CycleDetected { .. }
                | Self::DependencyDepthExceeded { .. }
                | Self::Configuration { .. }
        )
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Io { .. } | Self::ContentStore { .. } => true,
            // Both are handled as cache misses
            Self::CompressionOverflow { .. } | Self::CacheCorruption { .. } => true,
            Self::Database { .. } => true,
            Self::Validation { .. } | Self::Configuration { .. } => false,
            _ => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownModule { .. } => "unknown_module",
            Self::CycleDetected { .. } => "cycle",
            Self::DuplicateModule { .. } => "duplicate",
            Self::DependencyDepthExceeded { .. } => "depth",
            Self::Timeout { .. } => "timeout",
            Self::DependencyFailed { .. } => "dependency",
            Self::CompressionOverflow { .. } => "compression",
            Self::CacheCorruption { .. } => "cache",
            Self::Configuration { .. } => "configuration",
            Self::Validation { .. } => "validation",
            Self::ContentStore { .. } => "content_store",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
            Self::Database { .. } => "database",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ModlinkError>;

impl From<std::io::Error> for ModlinkError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for ModlinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for ModlinkError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<bincode::Error> for ModlinkError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization("bincode", err)
    }
}

impl From<sled::Error> for ModlinkError {
    fn from(err: sled::Error) -> Self {
        Self::database("sled_operation", err)
    }
}

impl From<anyhow::Error> for ModlinkError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string()).with_context("source", "anyhow")
    }
}
