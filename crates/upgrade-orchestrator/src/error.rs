//! Orchestrator error types.
//!
//! `InvalidSpec` and `InvariantViolation` are raised before anything is
//! mutated. `ProvisioningFailure`, `Timeout` and `Cancelled` happen mid-run
//! and carry whatever was accomplished so the caller can decide on cleanup.

use crate::executor::ExecutionResult;
use cluster_client::ClientError;
use cluster_model::{ClusterState, ModelError};
use thiserror::Error;

/// Errors that can occur while planning, executing or checking an upgrade.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Desired topology is malformed or unsafe
    #[error("Invalid cluster spec: {0}")]
    InvalidSpec(String),

    /// Control-plane/etcd node identity would not be preserved
    #[error("Invariant violation on node {node}: {detail}")]
    InvariantViolation { node: String, detail: String },

    /// A step failed after exhausting retries
    #[error("Provisioning failure during {step}: {source}")]
    ProvisioningFailure {
        step: String,
        #[source]
        source: ClientError,
        partial: Box<ExecutionResult>,
    },

    /// The cluster did not reach the target in time
    #[error("Timed out waiting for {waiting_for}: {}", .gaps.join("; "))]
    Timeout {
        waiting_for: String,
        gaps: Vec<String>,
        last_observed: Option<Box<ClusterState>>,
        partial: Option<Box<ExecutionResult>>,
    },

    /// Another upgrade holds the cluster
    #[error("An upgrade is already in progress on cluster {cluster_id}")]
    ConcurrentUpgradeInProgress { cluster_id: String },

    /// Post-upgrade validation found mismatches
    #[error("Validation failed with {count} finding(s): {}", .findings.join("; "))]
    ValidationMismatch { count: usize, findings: Vec<String> },

    /// Caller aborted the operation
    #[error("Cancelled while {during}")]
    Cancelled {
        during: String,
        last_observed: Option<Box<ClusterState>>,
        partial: Option<Box<ExecutionResult>>,
    },

    /// Invalid orchestrator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Collaborator error outside a retried step (e.g. observing the cluster)
    #[error("Collaborator error: {0}")]
    Client(#[from] ClientError),

    /// Spec document error
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

impl OrchestratorError {
    /// Partial execution result carried by mid-run failures
    pub fn partial_result(&self) -> Option<&ExecutionResult> {
        match self {
            OrchestratorError::ProvisioningFailure { partial, .. } => Some(partial.as_ref()),
            OrchestratorError::Timeout { partial, .. } | OrchestratorError::Cancelled { partial, .. } => {
                partial.as_deref()
            }
            _ => None,
        }
    }

    /// Whether the error was raised before any mutation
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            OrchestratorError::InvalidSpec(_)
                | OrchestratorError::InvariantViolation { .. }
                | OrchestratorError::ConcurrentUpgradeInProgress { .. }
        )
    }
}
