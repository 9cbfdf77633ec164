//! Component health tracking
//!
//! Each component moves `healthy -> degraded -> unhealthy` as consecutive
//! failures cross the configured thresholds. Any success brings it back
//! to `healthy`.

use crate::error::{ObservabilityError, Result};
use chrono::{DateTime, Utc};
use common::{HealthReport, HealthStatus};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Consecutive-failure thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    pub degraded_after: u32,
    pub unhealthy_after: u32,
}

impl HealthThresholds {
    pub fn new(degraded_after: u32, unhealthy_after: u32) -> Result<Self> {
        if degraded_after == 0 {
            return Err(ObservabilityError::Configuration(
                "degraded_after must be at least 1".to_string(),
            ));
        }
        if unhealthy_after < degraded_after {
            return Err(ObservabilityError::Configuration(format!(
                "unhealthy_after ({}) must not be below degraded_after ({})",
                unhealthy_after, degraded_after
            )));
        }
        Ok(Self {
            degraded_after,
            unhealthy_after,
        })
    }

    fn status_for(&self, consecutive_failures: u32) -> HealthStatus {
        if consecutive_failures >= self.unhealthy_after {
            HealthStatus::Unhealthy
        } else if consecutive_failures >= self.degraded_after {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_after: config::default_degraded_after(),
            unhealthy_after: config::default_unhealthy_after(),
        }
    }
}

impl TryFrom<&config::HealthConfig> for HealthThresholds {
    type Error = ObservabilityError;

    fn try_from(cfg: &config::HealthConfig) -> Result<Self> {
        Self::new(cfg.degraded_after, cfg.unhealthy_after)
    }
}

/// Tracks the health of named components
#[derive(Debug, Default)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    components: RwLock<BTreeMap<String, HealthReport>>,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            components: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    /// Register a component. Returns false if it was already known; its
    /// history is kept in that case.
    pub fn register(&self, name: &str) -> bool {
        let mut components = self.components.write();
        if components.contains_key(name) {
            return false;
        }
        components.insert(name.to_string(), HealthReport::new(name));
        debug!(component = name, "Health component registered");
        true
    }

    /// Record a success. Unknown components are registered on first use.
    pub fn record_success(&self, name: &str, at: DateTime<Utc>) -> HealthStatus {
        let mut components = self.components.write();
        let report = components
            .entry(name.to_string())
            .or_insert_with(|| HealthReport::new(name));

        let previous = report.status;
        report.consecutive_failures = 0;
        report.total_successes += 1;
        report.last_success_time = Some(at);
        report.status = HealthStatus::Healthy;

        if previous != HealthStatus::Healthy {
            info!(component = name, from = %previous, "Component recovered");
        }
        report.status
    }

    /// Record a failure. Unknown components are registered on first use.
    pub fn record_failure(&self, name: &str, error: &str, at: DateTime<Utc>) -> HealthStatus {
        let mut components = self.components.write();
        let report = components
            .entry(name.to_string())
            .or_insert_with(|| HealthReport::new(name));

        let previous = report.status;
        report.consecutive_failures = report.consecutive_failures.saturating_add(1);
        report.total_failures += 1;
        report.last_failure_time = Some(at);
        report.last_error = Some(error.to_string());
        report.status = self.thresholds.status_for(report.consecutive_failures);

        if report.status != previous {
            warn!(
                component = name,
                from = %previous,
                to = %report.status,
                consecutive_failures = report.consecutive_failures,
                error,
                "Component health changed"
            );
        }
        report.status
    }

    /// Reports for every component, keyed by name
    pub fn report(&self) -> BTreeMap<String, HealthReport> {
        self.components.read().clone()
    }

    pub fn report_for(&self, name: &str) -> Option<HealthReport> {
        self.components.read().get(name).cloned()
    }

    /// Worst status across all components (healthy when none are registered)
    pub fn overall(&self) -> HealthStatus {
        self.components
            .read()
            .values()
            .map(|r| r.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 10, 5, minute, 0).unwrap()
    }

    #[test]
    fn test_threshold_transitions() {
        let monitor = HealthMonitor::new(HealthThresholds::new(1, 3).unwrap());
        monitor.register("provider");

        assert_eq!(monitor.record_failure("provider", "timeout", at(1)), HealthStatus::Degraded);
        assert_eq!(monitor.record_failure("provider", "timeout", at(2)), HealthStatus::Degraded);
        assert_eq!(monitor.record_failure("provider", "timeout", at(3)), HealthStatus::Unhealthy);

        let report = monitor.report_for("provider").unwrap();
        assert_eq!(report.consecutive_failures, 3);
        assert_eq!(report.total_failures, 3);
        assert_eq!(report.last_error.as_deref(), Some("timeout"));
        assert_eq!(report.last_failure_time, Some(at(3)));
    }

    #[test]
    fn test_success_resets_counter() {
        let monitor = HealthMonitor::default();
        monitor.register("provider");
        for m in 0..5 {
            monitor.record_failure("provider", "boom", at(m));
        }
        assert_eq!(monitor.overall(), HealthStatus::Unhealthy);

        assert_eq!(monitor.record_success("provider", at(10)), HealthStatus::Healthy);
        let report = monitor.report_for("provider").unwrap();
        assert_eq!(report.consecutive_failures, 0);
        assert_eq!(report.total_failures, 5);
        assert_eq!(report.total_successes, 1);
        assert_eq!(report.last_success_time, Some(at(10)));

        // Counter starts over after the reset
        assert_eq!(monitor.record_failure("provider", "boom", at(11)), HealthStatus::Degraded);
    }

    #[test]
    fn test_report_is_sorted_and_overall_is_worst() {
        let monitor = HealthMonitor::default();
        monitor.register("provider");
        monitor.register("collector.NIFTY");
        monitor.register("collector.BANKNIFTY");
        monitor.record_failure("collector.NIFTY", "stale", at(0));

        let names: Vec<String> = monitor.report().into_keys().collect();
        assert_eq!(names, vec!["collector.BANKNIFTY", "collector.NIFTY", "provider"]);
        assert_eq!(monitor.overall(), HealthStatus::Degraded);
    }

    #[test]
    fn test_register_keeps_history() {
        let monitor = HealthMonitor::default();
        assert!(monitor.register("provider"));
        monitor.record_failure("provider", "boom", at(0));
        assert!(!monitor.register("provider"));
        assert_eq!(monitor.report_for("provider").unwrap().consecutive_failures, 1);
    }

    #[test]
    fn test_invalid_thresholds() {
        assert!(HealthThresholds::new(0, 3).is_err());
        assert!(HealthThresholds::new(3, 2).is_err());
        assert!(HealthThresholds::new(2, 2).is_ok());
    }

    #[test]
    fn test_empty_monitor_is_healthy() {
        assert_eq!(HealthMonitor::default().overall(), HealthStatus::Healthy);
    }
}
