//! Tuning knobs for the scheduling tier.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Timeout applied to tasks that declare no `max_execution_time_ms`.
    pub default_task_timeout_ms: u64,
    /// Upper bound on how long the timeout supervisor sleeps between scans.
    pub timeout_scan_interval_ms: u64,
    /// How often tasks that failed to reach the queue are re-published.
    pub dispatch_retry_interval_ms: u64,
    /// Buffer of the job-completed broadcast channel.
    pub completion_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_task_timeout_ms: 60 * 60 * 1000,
            timeout_scan_interval_ms: 1000,
            dispatch_retry_interval_ms: 5000,
            completion_channel_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_millis(self.default_task_timeout_ms)
    }

    pub fn timeout_scan_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_scan_interval_ms)
    }

    pub fn dispatch_retry_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_retry_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{ "default_task_timeout_ms": 500 }"#).unwrap();
        assert_eq!(config.default_task_timeout(), Duration::from_millis(500));
        assert_eq!(config.timeout_scan_interval(), Duration::from_secs(1));
        assert_eq!(config.completion_channel_capacity, 256);
    }
}
