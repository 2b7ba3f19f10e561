//! Engine configuration
//!
//! All knobs are environment-driven with `CASCADE_*` variables; defaults
//! suit a single-node deployment.

use std::time::Duration;

/// Configuration for the engine and its background workers
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Age threshold for the retention worker, in days
    pub retention_days: u32,

    /// Executions handled per retention batch
    pub retention_batch_size: i64,

    /// Cadence of the timeout scheduler sweep
    pub timeout_scan_interval: Duration,

    /// Bound on version-conflict retries
    pub max_optimistic_retry_attempts: u32,

    /// Event-wait deadline used when an event-driven action omits its own
    pub default_step_timeout: Duration,

    /// Default initiator for internal triggers
    pub system_user_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            retention_batch_size: 100,
            timeout_scan_interval: Duration::from_secs(5),
            max_optimistic_retry_attempts: 3,
            default_step_timeout: Duration::from_secs(3600),
            system_user_id: "system".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment (and `.env` if present)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            retention_days: env_parse("CASCADE_RETENTION_DAYS", defaults.retention_days).max(1),
            retention_batch_size: env_parse(
                "CASCADE_RETENTION_BATCH_SIZE",
                defaults.retention_batch_size,
            )
            .max(1),
            timeout_scan_interval: Duration::from_secs(env_parse(
                "CASCADE_TIMEOUT_SCAN_INTERVAL_SECONDS",
                defaults.timeout_scan_interval.as_secs(),
            )),
            max_optimistic_retry_attempts: env_parse(
                "CASCADE_MAX_OPTIMISTIC_RETRY_ATTEMPTS",
                defaults.max_optimistic_retry_attempts,
            )
            .max(1),
            default_step_timeout: Duration::from_secs(env_parse(
                "CASCADE_DEFAULT_STEP_TIMEOUT_SECONDS",
                defaults.default_step_timeout.as_secs(),
            )),
            system_user_id: std::env::var("CASCADE_SYSTEM_USER_ID")
                .unwrap_or(defaults.system_user_id),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.retention_batch_size, 100);
        assert_eq!(config.timeout_scan_interval, Duration::from_secs(5));
        assert_eq!(config.max_optimistic_retry_attempts, 3);
        assert_eq!(config.system_user_id, "system");
    }
}
