//! Controller configuration
//!
//! Everything the binary needs beyond `OrchestratorConfig` comes from the
//! environment:
//!
//! | Variable | Default |
//! |---|---|
//! | `CLUSTER_SPEC_PATH` | required |
//! | `NODE_INVENTORY_PATH` | required |
//! | `RKE_BINARY` | `rke` |
//! | `RKE_WORKDIR` | `.` |
//! | `RKE_COMMAND_TIMEOUT_SECS` | 1800 |
//! | `PROBE_PORT` | 10250 |
//! | `CONVERGE_TIMEOUT_SECS` | 1200 |
//! | `UPGRADE_DRY_RUN` | false |

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid or missing controller setting
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{key}={value:?} is not valid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub spec_path: PathBuf,
    pub inventory_path: PathBuf,
    pub rke_binary: PathBuf,
    pub rke_workdir: PathBuf,
    pub rke_command_timeout: Duration,
    pub probe_port: u16,
    pub converge_timeout: Duration,
    /// Print the plan and stop before executing it
    pub dry_run: bool,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty()).ok_or(ConfigError::Missing(key));

        Ok(Self {
            spec_path: required("CLUSTER_SPEC_PATH")?.into(),
            inventory_path: required("NODE_INVENTORY_PATH")?.into(),
            rke_binary: lookup("RKE_BINARY").unwrap_or_else(|| "rke".to_string()).into(),
            rke_workdir: lookup("RKE_WORKDIR").unwrap_or_else(|| ".".to_string()).into(),
            rke_command_timeout: Duration::from_secs(number(&lookup, "RKE_COMMAND_TIMEOUT_SECS", 1800)?),
            probe_port: number(&lookup, "PROBE_PORT", 10250)?,
            converge_timeout: Duration::from_secs(number(&lookup, "CONVERGE_TIMEOUT_SECS", 1200)?),
            dry_run: flag(&lookup, "UPGRADE_DRY_RUN")?,
        })
    }
}

fn number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn flag<F>(lookup: &F, key: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None | Some("" | "0" | "false" | "no") => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            key,
            value: other.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let vars = env(&[("CLUSTER_SPEC_PATH", "cluster.yml"), ("NODE_INVENTORY_PATH", "hosts.yml")]);
        let config = ControllerConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.rke_binary, PathBuf::from("rke"));
        assert_eq!(config.rke_command_timeout, Duration::from_secs(1800));
        assert_eq!(config.probe_port, 10250);
        assert_eq!(config.converge_timeout, Duration::from_secs(1200));
        assert!(!config.dry_run);
    }

    #[test]
    fn test_spec_path_required() {
        let vars = env(&[("NODE_INVENTORY_PATH", "hosts.yml")]);
        let err = ControllerConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CLUSTER_SPEC_PATH")));
    }

    #[test]
    fn test_invalid_port() {
        let vars = env(&[
            ("CLUSTER_SPEC_PATH", "cluster.yml"),
            ("NODE_INVENTORY_PATH", "hosts.yml"),
            ("PROBE_PORT", "70000"),
        ]);
        let err = ControllerConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PROBE_PORT", .. }));
    }

    #[test]
    fn test_dry_run_flag() {
        let vars = env(&[
            ("CLUSTER_SPEC_PATH", "cluster.yml"),
            ("NODE_INVENTORY_PATH", "hosts.yml"),
            ("UPGRADE_DRY_RUN", "true"),
        ]);
        assert!(ControllerConfig::from_lookup(|k| vars.get(k).cloned()).unwrap().dry_run);
    }
}
