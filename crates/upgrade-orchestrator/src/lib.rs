//! Cluster Upgrade Orchestrator
//!
//! Moves a running cluster from its current topology and component versions
//! to a desired [`ClusterSpec`](cluster_model::ClusterSpec) without losing
//! control-plane or etcd identity.
//!
//! ## Flow
//!
//! 1. [`UpgradeOrchestrator::plan_upgrade`] observes the cluster and diffs it
//!    against the desired spec, rejecting unsafe specs before anything changes.
//! 2. [`UpgradeOrchestrator::execute`] applies the plan: node additions, the
//!    topology update, one staged rollout per component, then node removals.
//! 3. [`UpgradeOrchestrator::wait_until_converged`] polls until the live state
//!    matches the desired spec.
//! 4. [`UpgradeOrchestrator::validate`] reports version mismatches, missing
//!    nodes and network health.
//!
//! ```no_run
//! # async fn run(orchestrator: upgrade_orchestrator::UpgradeOrchestrator, desired: cluster_model::ClusterSpec)
//! #     -> Result<(), upgrade_orchestrator::OrchestratorError> {
//! use std::time::Duration;
//!
//! let plan = orchestrator.plan_upgrade(&desired).await?;
//! orchestrator.execute(&plan).await?;
//! orchestrator.wait_until_converged(&desired, Duration::from_secs(1200)).await?;
//!
//! let nodes: Vec<String> = desired.node_names().map(str::to_string).collect();
//! orchestrator.validate(&nodes, &desired.versions).await?.into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod executor;
pub mod lock;
pub mod orchestrator;
pub mod plan;
pub mod reconciler;
pub mod retry;
pub mod validation;

pub use collaborators::Collaborators;
pub use config::{OrchestratorConfig, RetryConfig};
pub use error::OrchestratorError;
pub use executor::{ExecutionResult, StepRecord, StepStatus, UpgradeExecutor};
pub use lock::{UpgradeGuard, UpgradeLocks};
pub use orchestrator::UpgradeOrchestrator;
pub use plan::{diff, ComponentUpgrade, PlanStep, RoleChange, UpgradePlan};
pub use reconciler::{convergence_gaps, StateReconciler};
pub use validation::{ValidationGate, ValidationReport, VersionMismatch};
