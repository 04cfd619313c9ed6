//! Performance Monitor
//!
//! Rolling per-operation windows of load samples plus a window of
//! compatibility scores. `check_thresholds` turns them into [`Alert`]s; the
//! monitor itself never acts on them.

use crate::compat::CompatibilityRecord;
use crate::core::errors::{ModlinkError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Monitor thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Samples kept per operation
    pub window_size: usize,
    /// Samples averaged into an automatic baseline
    pub baseline_samples: usize,
    /// Allowed relative load-time increase over the baseline
    pub load_time_regression: f64,
    pub min_avg_compat_score: f64,
    /// Absolute ceiling on the window mean duration
    pub max_duration_ms: Option<f64>,
    /// Absolute ceiling on the window mean memory delta
    pub max_memory_delta_bytes: Option<i64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            baseline_samples: 10,
            load_time_regression: 0.2,
            min_avg_compat_score: 0.6,
            max_duration_ms: None,
            max_memory_delta_bytes: None,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(ModlinkError::configuration_field(
                "window_size must be greater than 0",
                "monitor.window_size",
            ));
        }
        if self.baseline_samples == 0 || self.baseline_samples > self.window_size {
            return Err(ModlinkError::configuration_field(
                "baseline_samples must be within 1..=window_size",
                "monitor.baseline_samples",
            ));
        }
        if self.load_time_regression <= 0.0 {
            return Err(ModlinkError::configuration_field(
                "load_time_regression must be positive",
                "monitor.load_time_regression",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_avg_compat_score) {
            return Err(ModlinkError::configuration_field(
                "min_avg_compat_score must be within [0, 1]",
                "monitor.min_avg_compat_score",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub operation: String,
    pub duration_ms: f64,
    pub memory_delta_bytes: i64,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSample {
    pub fn new(operation: impl Into<String>, duration: Duration, memory_delta_bytes: i64) -> Self {
        Self {
            operation: operation.into(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            memory_delta_bytes,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    LoadTimeRegression,
    Duration,
    MemoryDelta,
    CompatibilityScore,
    IncompatiblePair,
}

/// Threshold violation, pure data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub metric: AlertMetric,
    /// `None` for compatibility alerts
    pub operation: Option<String>,
    pub observed: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub operation: String,
    /// Samples recorded since the monitor started
    pub count: u64,
    /// Samples currently in the window
    pub window_len: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_memory_delta_bytes: f64,
    pub baseline_ms: Option<f64>,
}

#[derive(Debug, Default)]
struct OperationWindow {
    samples: VecDeque<PerformanceSample>,
    count: u64,
    baseline_ms: Option<f64>,
    /// Durations collected until the automatic baseline freezes
    warmup: Vec<f64>,
    since_baseline: usize,
}

impl OperationWindow {
    fn push(&mut self, sample: PerformanceSample, config: &MonitorConfig) {
        self.count += 1;
        let duration_ms = sample.duration_ms;
        self.samples.push_back(sample);
        if self.samples.len() > config.window_size {
            self.samples.pop_front();
        }

        match self.baseline_ms {
            Some(_) => self.since_baseline += 1,
            None => {
                self.warmup.push(duration_ms);
                if self.warmup.len() >= config.baseline_samples {
                    let baseline = mean(self.warmup.iter().copied());
                    debug!("Baseline frozen at {:.3}ms", baseline);
                    self.baseline_ms = Some(baseline);
                    self.warmup.clear();
                    self.since_baseline = 0;
                }
            }
        }
    }

    /// Mean duration of the samples recorded after the baseline
    fn post_baseline_mean(&self) -> Option<f64> {
        let n = self.since_baseline.min(self.samples.len());
        if n == 0 {
            return None;
        }
        Some(mean(
            self.samples.iter().rev().take(n).map(|s| s.duration_ms),
        ))
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    config: MonitorConfig,
    operations: DashMap<String, OperationWindow>,
    compat_scores: Mutex<VecDeque<CompatibilityRecord>>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            operations: DashMap::new(),
            compat_scores: Mutex::new(VecDeque::new()),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn record(&self, sample: PerformanceSample) {
        self.operations
            .entry(sample.operation.clone())
            .or_default()
            .push(sample, &self.config);
    }

    pub fn record_compatibility(&self, record: &CompatibilityRecord) {
        let mut window = self.compat_scores.lock();
        window.push_back(record.clone());
        if window.len() > self.config.window_size {
            window.pop_front();
        }
    }

    /// Pin the baseline for an operation; later samples are compared against it
    pub fn set_baseline(&self, operation: &str, baseline_ms: f64) {
        let mut window = self.operations.entry(operation.to_string()).or_default();
        window.baseline_ms = Some(baseline_ms);
        window.warmup.clear();
        window.since_baseline = 0;
        info!("Baseline for {} set to {:.3}ms", operation, baseline_ms);
    }

    pub fn baseline(&self, operation: &str) -> Option<f64> {
        self.operations.get(operation)?.baseline_ms
    }

    pub fn check_thresholds(&self) -> Vec<Alert> {
        let now = Utc::now();
        let mut alerts = Vec::new();

        let mut operations: Vec<String> =
            self.operations.iter().map(|e| e.key().clone()).collect();
        operations.sort();

        for operation in operations {
            let Some(window) = self.operations.get(&operation) else {
                continue;
            };
            self.check_operation(&operation, &window, now, &mut alerts);
        }

        self.check_compatibility(now, &mut alerts);

        for alert in &alerts {
            warn!(
                "{:?} alert on {:?} ({}): observed {:.3}, threshold {:.3}",
                alert.severity,
                alert.metric,
                alert.operation.as_deref().unwrap_or("compatibility"),
                alert.observed,
                alert.threshold
            );
        }
        alerts
    }

    fn check_operation(
        &self,
        operation: &str,
        window: &OperationWindow,
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) {
        let alert = |severity, metric, observed, threshold| Alert {
            severity,
            metric,
            operation: Some(operation.to_string()),
            observed,
            threshold,
            timestamp: now,
        };

        if let (Some(baseline), Some(current)) = (window.baseline_ms, window.post_baseline_mean()) {
            let regression = self.config.load_time_regression;
            let threshold = baseline * (1.0 + regression);
            if current > threshold {
                let severity = if current > baseline * (1.0 + 2.0 * regression) {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                };
                alerts.push(alert(
                    severity,
                    AlertMetric::LoadTimeRegression,
                    current,
                    threshold,
                ));
            }
        }

        if window.samples.is_empty() {
            return;
        }

        if let Some(max) = self.config.max_duration_ms {
            let observed = mean(window.samples.iter().map(|s| s.duration_ms));
            if observed > max {
                alerts.push(alert(AlertSeverity::Warning, AlertMetric::Duration, observed, max));
            }
        }

        if let Some(max) = self.config.max_memory_delta_bytes {
            let observed = mean(window.samples.iter().map(|s| s.memory_delta_bytes as f64));
            if observed > max as f64 {
                alerts.push(alert(
                    AlertSeverity::Warning,
                    AlertMetric::MemoryDelta,
                    observed,
                    max as f64,
                ));
            }
        }
    }

    fn check_compatibility(&self, now: DateTime<Utc>, alerts: &mut Vec<Alert>) {
        let window = self.compat_scores.lock();
        if window.is_empty() {
            return;
        }

        let average = mean(window.iter().map(|r| r.score));
        if average < self.config.min_avg_compat_score {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                metric: AlertMetric::CompatibilityScore,
                operation: None,
                observed: average,
                threshold: self.config.min_avg_compat_score,
                timestamp: now,
            });
        }

        let incompatible = window.iter().filter(|r| r.is_incompatible()).count();
        if incompatible > 0 {
            alerts.push(Alert {
                severity: AlertSeverity::Critical,
                metric: AlertMetric::IncompatiblePair,
                operation: None,
                observed: incompatible as f64,
                threshold: 0.0,
                timestamp: now,
            });
        }
    }

    pub fn operation_metrics(&self, operation: &str) -> Option<OperationMetrics> {
        let window = self.operations.get(operation)?;
        if window.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<f64> = window.samples.iter().map(|s| s.duration_ms).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let len = sorted.len();

        Some(OperationMetrics {
            operation: operation.to_string(),
            count: window.count,
            window_len: len,
            avg_ms: mean(sorted.iter().copied()),
            p50_ms: sorted[len / 2],
            p95_ms: sorted[(len * 95) / 100],
            min_ms: sorted[0],
            max_ms: sorted[len - 1],
            mean_memory_delta_bytes: mean(
                window.samples.iter().map(|s| s.memory_delta_bytes as f64),
            ),
            baseline_ms: window.baseline_ms,
        })
    }

    /// Metrics for every operation, sorted by name
    pub fn all_metrics(&self) -> Vec<OperationMetrics> {
        let mut operations: Vec<String> =
            self.operations.iter().map(|e| e.key().clone()).collect();
        operations.sort();
        operations
            .iter()
            .filter_map(|op| self.operation_metrics(op))
            .collect()
    }
}
