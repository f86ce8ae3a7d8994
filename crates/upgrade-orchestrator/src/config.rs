//! Orchestrator configuration
//!
//! Every knob has a default and can be overridden from the environment:
//!
//! | Variable | Default |
//! |---|---|
//! | `UPGRADE_MAX_ATTEMPTS` | 5 |
//! | `UPGRADE_RETRY_MIN_MS` | 500 |
//! | `UPGRADE_RETRY_MAX_MS` | 30000 |
//! | `UPGRADE_PROVISION_POOL` | 4 |
//! | `UPGRADE_POLL_INTERVAL_SECS` | 5 |
//! | `UPGRADE_NODE_READY_TIMEOUT_SECS` | 600 |
//! | `UPGRADE_ROLLOUT_TIMEOUT_SECS` | 900 |

use crate::error::OrchestratorError;
use std::str::FromStr;
use std::time::Duration;

/// Bounded retry policy for collaborator calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per step, including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub min_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Tuning for plan execution and convergence polling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub retry: RetryConfig,
    /// Maximum concurrent node provisioning calls
    pub provision_pool_size: usize,
    /// Delay between observations while waiting on the cluster
    pub poll_interval: Duration,
    /// How long a new node may take to become ready
    pub node_ready_timeout: Duration,
    /// How long one component rollout may take to stabilise
    pub rollout_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            provision_pool_size: 4,
            poll_interval: Duration::from_secs(5),
            node_ready_timeout: Duration::from_secs(600),
            rollout_timeout: Duration::from_secs(900),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, OrchestratorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, OrchestratorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            retry: RetryConfig {
                max_attempts: parse(&lookup, "UPGRADE_MAX_ATTEMPTS")?.unwrap_or(defaults.retry.max_attempts),
                min_delay: parse(&lookup, "UPGRADE_RETRY_MIN_MS")?
                    .map_or(defaults.retry.min_delay, Duration::from_millis),
                max_delay: parse(&lookup, "UPGRADE_RETRY_MAX_MS")?
                    .map_or(defaults.retry.max_delay, Duration::from_millis),
            },
            provision_pool_size: parse(&lookup, "UPGRADE_PROVISION_POOL")?.unwrap_or(defaults.provision_pool_size),
            poll_interval: parse(&lookup, "UPGRADE_POLL_INTERVAL_SECS")?
                .map_or(defaults.poll_interval, Duration::from_secs),
            node_ready_timeout: parse(&lookup, "UPGRADE_NODE_READY_TIMEOUT_SECS")?
                .map_or(defaults.node_ready_timeout, Duration::from_secs),
            rollout_timeout: parse(&lookup, "UPGRADE_ROLLOUT_TIMEOUT_SECS")?
                .map_or(defaults.rollout_timeout, Duration::from_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a loop unbounded or a pool empty
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.retry.max_attempts == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "UPGRADE_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.provision_pool_size == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "UPGRADE_PROVISION_POOL must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(OrchestratorError::InvalidConfig(
                "UPGRADE_POLL_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }
        if self.retry.min_delay > self.retry.max_delay {
            return Err(OrchestratorError::InvalidConfig(format!(
                "retry min delay {:?} exceeds max delay {:?}",
                self.retry.min_delay, self.retry.max_delay
            )));
        }
        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>, OrchestratorError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| OrchestratorError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
    }
}
