//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// HTTP port serving `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// HTTP server startup timeout (seconds)
    pub server_startup_timeout_secs: u64,
    /// HTTP server readiness poll interval (milliseconds)
    pub server_poll_interval_ms: u64,
    /// Maximum concurrent reconciliations
    /// Distinct workloads reconcile in parallel up to this bound; one workload never runs twice at once
    pub max_concurrent_reconciliations: u16,
    /// Fibonacci backoff floor for failed reconciliations (seconds)
    pub error_backoff_min_secs: u64,
    /// Fibonacci backoff ceiling for failed reconciliations (seconds)
    pub error_backoff_max_secs: u64,
    /// Exponential backoff starting value for watch stream errors (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value for watch stream errors (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// How long a pending scale-down deletion may stay unobserved (seconds)
    pub expectations_timeout_secs: u64,
    /// Attempts for status patches retried on resourceVersion conflicts
    pub status_update_retries: u32,
    /// Attempts for Pod updates retried on resourceVersion conflicts
    pub pod_update_retries: u32,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            error_backoff_min_secs: DEFAULT_ERROR_BACKOFF_MIN_SECS,
            error_backoff_max_secs: DEFAULT_ERROR_BACKOFF_MAX_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            expectations_timeout_secs: DEFAULT_EXPECTATIONS_TIMEOUT_SECS,
            status_update_retries: DEFAULT_CONFLICT_RETRIES,
            pod_update_retries: DEFAULT_CONFLICT_RETRIES,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            server_startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            server_poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            error_backoff_min_secs: env_var_or_default(
                "ERROR_BACKOFF_MIN_SECS",
                DEFAULT_ERROR_BACKOFF_MIN_SECS,
            ),
            error_backoff_max_secs: env_var_or_default(
                "ERROR_BACKOFF_MAX_SECS",
                DEFAULT_ERROR_BACKOFF_MAX_SECS,
            ),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            expectations_timeout_secs: env_var_or_default(
                "EXPECTATIONS_TIMEOUT_SECS",
                DEFAULT_EXPECTATIONS_TIMEOUT_SECS,
            ),
            status_update_retries: env_var_or_default(
                "STATUS_UPDATE_RETRIES",
                DEFAULT_CONFLICT_RETRIES,
            ),
            pod_update_retries: env_var_or_default("POD_UPDATE_RETRIES", DEFAULT_CONFLICT_RETRIES),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }

    /// Get expectations timeout duration
    #[must_use]
    pub fn expectations_timeout(&self) -> Duration {
        Duration::from_secs(self.expectations_timeout_secs)
    }

    /// Whether logs should be emitted as JSON lines
    #[must_use]
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
