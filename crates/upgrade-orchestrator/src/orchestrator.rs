//! Upgrade orchestrator
//!
//! Public entry point tying the differ, executor, reconciler and validation
//! gate to one cluster handle. Collaborators are injected at construction.

use crate::collaborators::Collaborators;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::executor::{ExecutionResult, UpgradeExecutor};
use crate::lock::UpgradeLocks;
use crate::plan::{diff, validate_spec, UpgradePlan};
use crate::reconciler::StateReconciler;
use crate::validation::{ValidationGate, ValidationReport};
use cluster_model::{ClusterHandle, ClusterSpec, ClusterState, Component};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Plans, executes, confirms and validates upgrades of one cluster
#[derive(Debug)]
pub struct UpgradeOrchestrator {
    handle: Mutex<ClusterHandle>,
    config: OrchestratorConfig,
    locks: UpgradeLocks,
    cancel: CancellationToken,
    executor: UpgradeExecutor,
    reconciler: StateReconciler,
    gate: ValidationGate,
}

impl UpgradeOrchestrator {
    /// Create an orchestrator for the cluster behind `handle`
    pub fn new(handle: ClusterHandle, collaborators: Collaborators, config: OrchestratorConfig) -> Self {
        let cancel = CancellationToken::new();
        Self {
            handle: Mutex::new(handle),
            executor: UpgradeExecutor::new(collaborators.clone(), config.clone(), cancel.clone()),
            reconciler: StateReconciler::new(collaborators.clone(), config.clone(), cancel.clone()),
            gate: ValidationGate::new(collaborators),
            locks: UpgradeLocks::new(),
            config,
            cancel,
        }
    }

    /// Share a lock registry with other orchestrators
    ///
    /// Orchestrators built over the same registry refuse to upgrade the same
    /// cluster concurrently.
    pub fn with_locks(mut self, locks: UpgradeLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Current cluster handle, updated after every push to the cluster
    pub fn handle(&self) -> ClusterHandle {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Token that aborts in-flight operations when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Snapshot the live cluster
    pub async fn observe(&self) -> Result<ClusterState, OrchestratorError> {
        self.reconciler.observe(&self.handle()).await
    }

    /// Observe the cluster and diff it against `desired`
    ///
    /// Structurally invalid specs are rejected before the cluster is queried.
    pub async fn plan_upgrade(&self, desired: &ClusterSpec) -> Result<UpgradePlan, OrchestratorError> {
        validate_spec(desired)?;
        let current = self.observe().await?;
        let plan = diff(&current, desired)?;
        info!(
            cluster_id = %plan.cluster_id,
            plan_id = %plan.plan_id,
            "Planned upgrade: {}",
            plan.summary()
        );
        Ok(plan)
    }

    /// Apply `plan`
    ///
    /// Fails immediately with `ConcurrentUpgradeInProgress` while another
    /// execution holds the cluster.
    pub async fn execute(&self, plan: &UpgradePlan) -> Result<ExecutionResult, OrchestratorError> {
        let _guard = self.locks.try_acquire(&plan.cluster_id)?;

        let handle = self.handle();
        if handle.cluster_id != plan.cluster_id {
            return Err(OrchestratorError::InvalidSpec(format!(
                "plan targets cluster {}, orchestrator manages {}",
                plan.cluster_id, handle.cluster_id
            )));
        }

        let outcome = self.executor.execute(&handle, plan).await;
        let latest = match &outcome {
            Ok(result) => Some(&result.handle),
            Err(e) => e.partial_result().map(|partial| &partial.handle),
        };
        if let Some(latest) = latest {
            *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = latest.clone();
        }
        outcome
    }

    /// Poll until the cluster matches `target`
    pub async fn wait_until_converged(
        &self,
        target: &ClusterSpec,
        timeout: Duration,
    ) -> Result<ClusterState, OrchestratorError> {
        self.reconciler
            .wait_until_converged(&self.handle(), target, timeout)
            .await
    }

    /// Check `nodes` against `expected` component versions
    pub async fn validate(
        &self,
        nodes: &[String],
        expected: &BTreeMap<Component, String>,
    ) -> Result<ValidationReport, OrchestratorError> {
        self.gate.validate(&self.handle(), nodes, expected).await
    }
}
