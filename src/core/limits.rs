use crate::core::errors::{ModlinkError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Limits applied by the concurrent loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderLimits {
    /// Maximum number of modules loading at once within a group
    pub max_parallel: usize,
    /// Timeout for a single module load
    pub per_module_timeout_ms: u64,
    /// Maximum size of a fetched payload
    pub max_payload_bytes: usize,
    /// Maximum number of load groups a single request may resolve into
    pub max_dependency_depth: usize,
}

impl Default for LoaderLimits {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            per_module_timeout_ms: 30_000,     // 30 seconds
            max_payload_bytes: 10_000_000,     // 10MB
            max_dependency_depth: 32,
        }
    }
}

impl LoaderLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(ModlinkError::configuration_field(
                "max_parallel must be greater than 0",
                "loader.max_parallel",
            ));
        }
        if self.per_module_timeout_ms == 0 {
            return Err(ModlinkError::configuration_field(
                "per_module_timeout_ms must be greater than 0",
                "loader.per_module_timeout_ms",
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(ModlinkError::configuration_field(
                "max_payload_bytes must be greater than 0",
                "loader.max_payload_bytes",
            ));
        }
        if self.max_dependency_depth == 0 {
            return Err(ModlinkError::configuration_field(
                "max_dependency_depth must be greater than 0",
                "loader.max_dependency_depth",
            ));
        }
        Ok(())
    }

    pub fn per_module_timeout(&self) -> Duration {
        Duration::from_millis(self.per_module_timeout_ms)
    }

    pub fn validate_payload_size(&self, module_id: &str, size: usize) -> Result<()> {
        if size > self.max_payload_bytes {
            return Err(ModlinkError::validation_field(
                format!(
                    "payload of {} is {} bytes, limit is {}",
                    module_id, size, self.max_payload_bytes
                ),
                "loader.max_payload_bytes",
            ));
        }
        Ok(())
    }

    pub fn validate_dependency_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_dependency_depth {
            return Err(ModlinkError::DependencyDepthExceeded {
                depth,
                limit: self.max_dependency_depth,
            });
        }
        Ok(())
    }
}

/// In-flight load accounting shared by every task of a loader
#[derive(Debug, Default)]
pub struct LoadTracker {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    started: AtomicU64,
    completed: AtomicU64,
    timeouts: AtomicU64,
    failed: AtomicU64,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a load as started. The load ends when the guard is dropped.
    pub fn start(self: &Arc<Self>, module_id: &str) -> LoadGuard {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::Relaxed);
        debug!("Started load of {}, in flight: {}", module_id, now);

        LoadGuard {
            tracker: Arc::clone(self),
            start_time: Instant::now(),
        }
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Forget the peak, e.g. at the start of a new run
    pub fn reset_peak(&self) {
        self.peak_in_flight
            .store(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    pub fn stats(&self) -> LoadStats {
        LoadStats {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn end(&self, start_time: Instant) {
        let now = self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        self.completed.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Ended load, in flight: {}, duration: {:?}",
            now,
            start_time.elapsed()
        );
    }
}

/// RAII load tracker
#[derive(Debug)]
pub struct LoadGuard {
    tracker: Arc<LoadTracker>,
    start_time: Instant,
}

impl LoadGuard {
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.tracker.end(self.start_time);
    }
}

/// Load accounting snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadStats {
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub started: u64,
    /// Loads whose guard was dropped, successful or not
    pub completed: u64,
    pub timeouts: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_limits_validation() {
        let mut limits = LoaderLimits::default();
        assert!(limits.validate().is_ok());

        limits.max_parallel = 0;
        assert!(matches!(
            limits.validate(),
            Err(ModlinkError::Configuration { .. })
        ));
    }

    #[test]
    fn test_limit_checks() {
        let limits = LoaderLimits {
            max_payload_bytes: 1_000_000,
            max_dependency_depth: 10,
            ..Default::default()
        };
        assert!(limits.validate_payload_size("m", 10).is_ok());
        assert!(limits
            .validate_payload_size("m", limits.max_payload_bytes + 1)
            .is_err());

        assert!(limits.validate_dependency_depth(3).is_ok());
        match limits.validate_dependency_depth(11) {
            Err(ModlinkError::DependencyDepthExceeded { depth, limit }) => {
                assert_eq!((depth, limit), (11, 10));
            }
            other => panic!("Expected depth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_guard_tracks_in_flight_and_peak() {
        let tracker = Arc::new(LoadTracker::new());

        let first = tracker.start("a");
        let second = tracker.start("b");
        assert_eq!(tracker.in_flight(), 2);

        drop(first);
        let moved = tokio::spawn(async move {
            drop(second);
        });
        moved.await.unwrap();

        tracker.record_timeout();
        let stats = tracker.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.peak_in_flight, 2);
        assert_eq!(stats.started, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.failed, 1);

        tracker.reset_peak();
        assert_eq!(tracker.stats().peak_in_flight, 0);
    }
}
