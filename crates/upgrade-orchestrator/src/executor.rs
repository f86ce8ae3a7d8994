//! Upgrade executor
//!
//! Applies an [`UpgradePlan`] in four phases:
//!
//! 1. **Add nodes** - new machines are provisioned through a bounded pool and
//!    each one must report `Ready` before the phase ends.
//! 2. **Update topology** - added nodes join and worker role changes apply,
//!    with every component still at its baseline version.
//! 3. **Upgrade components** - one component at a time in priority order. The
//!    staged spec for a step is the baseline overlaid with every target up to
//!    and including that step; the next step starts only after every node that
//!    runs the component reports the target version.
//! 4. **Remove nodes** - leaving nodes are dropped from the cluster
//!    configuration first, then deleted from the cloud provider.
//!
//! Every step is checked against live state before it runs and recorded as
//! `Skipped` when it is already satisfied, so re-running a finished plan makes
//! no mutating calls. A failed step aborts the run; nothing is rolled back.

use crate::collaborators::Collaborators;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::plan::{PlanStep, UpgradePlan};
use crate::reconciler::{membership_gaps, version_gaps, StateReconciler};
use crate::retry::{retry_transient, RetryError};
use chrono::{DateTime, Utc};
use cluster_client::ClientError;
use cluster_model::{ClusterHandle, ClusterSpec, ClusterState, Node, NodeRequest, NodeSpec, NodeState};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one plan step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded { attempts: u32 },
    /// Live state already satisfied the step
    Skipped,
    Failed { attempts: u32, error: String },
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: PlanStep,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What an execution run accomplished
///
/// Returned on success and carried by mid-run errors as the partial result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: Uuid,
    pub cluster_id: String,
    /// Latest handle returned by the cluster client
    pub handle: ClusterHandle,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
}

impl ExecutionResult {
    fn new(plan: &UpgradePlan, handle: ClusterHandle) -> Self {
        Self {
            plan_id: plan.plan_id,
            cluster_id: plan.cluster_id.clone(),
            handle,
            started_at: Utc::now(),
            finished_at: None,
            steps: plan
                .steps()
                .into_iter()
                .map(|step| StepRecord {
                    step,
                    status: StepStatus::NotStarted,
                    started_at: None,
                    finished_at: None,
                })
                .collect(),
        }
    }

    fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Every step succeeded or was skipped
    pub fn is_complete(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Succeeded { .. } | StepStatus::Skipped))
    }

    /// Number of steps that performed work
    pub fn mutations(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Succeeded { .. }))
            .count()
    }

    pub fn status_of(&self, step: &PlanStep) -> Option<&StepStatus> {
        self.steps.iter().find(|s| &s.step == step).map(|s| &s.status)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Why a single step stopped
#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error("{source}")]
    Failed { source: ClientError, attempts: u32 },
    #[error("{error}")]
    Aborted { error: OrchestratorError, attempts: u32 },
}

impl StepError {
    fn attempts(&self) -> u32 {
        match self {
            StepError::Failed { attempts, .. } | StepError::Aborted { attempts, .. } => *attempts,
        }
    }

    fn from_retry(e: RetryError, during: &str) -> Self {
        match e {
            RetryError::Failed { source, attempts } => StepError::Failed { source, attempts },
            RetryError::Cancelled { attempts } => StepError::Aborted {
                error: OrchestratorError::Cancelled {
                    during: during.to_string(),
                    last_observed: None,
                    partial: None,
                },
                attempts,
            },
        }
    }

    /// Attach the partial result and lift into the public error type
    fn into_orchestrator_error(self, step: &PlanStep, partial: ExecutionResult) -> OrchestratorError {
        match self {
            StepError::Failed { source, .. } => OrchestratorError::ProvisioningFailure {
                step: step.to_string(),
                source,
                partial: Box::new(partial),
            },
            StepError::Aborted { error, .. } => match error {
                OrchestratorError::Timeout {
                    waiting_for,
                    gaps,
                    last_observed,
                    ..
                } => OrchestratorError::Timeout {
                    waiting_for,
                    gaps,
                    last_observed,
                    partial: Some(Box::new(partial)),
                },
                OrchestratorError::Cancelled {
                    during, last_observed, ..
                } => OrchestratorError::Cancelled {
                    during,
                    last_observed,
                    partial: Some(Box::new(partial)),
                },
                other => other,
            },
        }
    }
}

/// Runs plans against the injected collaborators
#[derive(Debug, Clone)]
pub struct UpgradeExecutor {
    collaborators: Collaborators,
    reconciler: StateReconciler,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl UpgradeExecutor {
    pub fn new(collaborators: Collaborators, config: OrchestratorConfig, cancel: CancellationToken) -> Self {
        let reconciler = StateReconciler::new(collaborators.clone(), config.clone(), cancel.clone());
        Self {
            collaborators,
            reconciler,
            config,
            cancel,
        }
    }

    /// Execute every step of `plan` in order
    ///
    /// The caller is responsible for holding the cluster's upgrade lock.
    pub async fn execute(&self, handle: &ClusterHandle, plan: &UpgradePlan) -> Result<ExecutionResult, OrchestratorError> {
        let mut result = ExecutionResult::new(plan, handle.clone());
        let mut handle = handle.clone();

        info!(
            cluster_id = %plan.cluster_id,
            plan_id = %plan.plan_id,
            steps = result.steps.len(),
            "Executing upgrade plan: {}",
            plan.summary()
        );

        for index in 0..result.steps.len() {
            let step = result.steps[index].step.clone();

            if self.cancel.is_cancelled() {
                warn!(cluster_id = %plan.cluster_id, plan_id = %plan.plan_id, step = %step, "Upgrade cancelled");
                result.finish();
                return Err(OrchestratorError::Cancelled {
                    during: format!("before step {}", step),
                    last_observed: None,
                    partial: Some(Box::new(result)),
                });
            }

            info!(cluster_id = %plan.cluster_id, plan_id = %plan.plan_id, step = %step, "Starting step");
            result.steps[index].started_at = Some(Utc::now());
            let outcome = self.run_step(&mut handle, plan, &step).await;
            result.steps[index].finished_at = Some(Utc::now());
            result.handle = handle.clone();

            match outcome {
                Ok(status) => {
                    info!(
                        cluster_id = %plan.cluster_id,
                        plan_id = %plan.plan_id,
                        step = %step,
                        status = ?status,
                        "Step finished"
                    );
                    result.steps[index].status = status;
                }
                Err(e) => {
                    error!(
                        cluster_id = %plan.cluster_id,
                        plan_id = %plan.plan_id,
                        step = %step,
                        attempts = e.attempts(),
                        error = %e,
                        "Step failed, aborting plan"
                    );
                    result.steps[index].status = StepStatus::Failed {
                        attempts: e.attempts(),
                        error: e.to_string(),
                    };
                    result.finish();
                    return Err(e.into_orchestrator_error(&step, result));
                }
            }
        }

        result.finish();
        info!(
            cluster_id = %plan.cluster_id,
            plan_id = %plan.plan_id,
            mutations = result.mutations(),
            "Upgrade plan executed"
        );
        Ok(result)
    }

    async fn run_step(&self, handle: &mut ClusterHandle, plan: &UpgradePlan, step: &PlanStep) -> Result<StepStatus, StepError> {
        match step {
            PlanStep::AddNodes { .. } => self.add_nodes(plan).await,
            PlanStep::UpdateTopology => self.update_topology(handle, plan).await,
            PlanStep::UpgradeComponent { index, .. } => self.upgrade_component(handle, plan, *index).await,
            PlanStep::RemoveNodes { .. } => self.remove_nodes(handle, plan).await,
        }
    }

    async fn add_nodes(&self, plan: &UpgradePlan) -> Result<StepStatus, StepError> {
        let mut outstanding = Vec::new();
        for spec in &plan.additions {
            match self.find_node(&spec.name).await? {
                Some(node) if node.is_ready() => debug!(node = %spec.name, "Node already provisioned"),
                Some(_) => outstanding.push((spec, false)),
                None => outstanding.push((spec, true)),
            }
        }
        if outstanding.is_empty() {
            return Ok(StepStatus::Skipped);
        }

        let results: Vec<Result<u32, StepError>> = stream::iter(outstanding)
            .map(|(spec, create)| self.provision_node(spec, create))
            .buffer_unordered(self.config.provision_pool_size)
            .collect()
            .await;

        let mut attempts = 1;
        for outcome in results {
            attempts = attempts.max(outcome?);
        }
        Ok(StepStatus::Succeeded { attempts })
    }

    /// Create one node (unless it already exists) and wait until it is Ready
    async fn provision_node(&self, spec: &NodeSpec, create: bool) -> Result<u32, StepError> {
        let mut attempts = 1;
        if create {
            let cloud = self.collaborators.cloud.as_ref();
            let name = spec.name.as_str();
            let request = [NodeRequest::new(name, spec.roles.iter().copied())];
            let request = &request[..];

            let (_, n) = self
                .retry(&format!("create node {}", name), || async move {
                    // A retried create must not trip over a machine an earlier attempt made
                    if let Some(node) = cloud.find_node(name).await? {
                        return Ok(vec![node]);
                    }
                    cloud.create_nodes(request).await
                })
                .await?;
            attempts = n;
            info!(node = %name, attempts, "Node created");
        }
        self.wait_node_ready(&spec.name).await?;
        Ok(attempts)
    }

    async fn wait_node_ready(&self, name: &str) -> Result<(), StepError> {
        let deadline = Instant::now() + self.config.node_ready_timeout;
        let cloud = self.collaborators.cloud.as_ref();
        let during = format!("waiting for node {} to become Ready", name);

        loop {
            let (state, _) = self.retry(&during, || cloud.node_state(name)).await?;
            if state == NodeState::Ready {
                info!(node = %name, "Node is Ready");
                return Ok(());
            }
            debug!(node = %name, state = %state, "Waiting for node to become Ready");

            let now = Instant::now();
            if now >= deadline {
                return Err(StepError::Aborted {
                    error: OrchestratorError::Timeout {
                        waiting_for: format!("node {} to become Ready", name),
                        gaps: vec![format!("node {} is {}", name, state)],
                        last_observed: None,
                        partial: None,
                    },
                    attempts: 1,
                });
            }

            let pause = self.config.poll_interval.min(deadline - now);
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Err(StepError::from_retry(RetryError::Cancelled { attempts: 1 }, &during));
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    async fn update_topology(&self, handle: &mut ClusterHandle, plan: &UpgradePlan) -> Result<StepStatus, StepError> {
        let state = self.observe(handle).await?;
        let spec = plan.staged_spec_for(0, &state);
        if membership_gaps(&spec, &state).is_empty() {
            return Ok(StepStatus::Skipped);
        }

        let attempts = self.push(handle, &spec, "update topology").await?;
        self.reconciler
            .poll_until(handle, "nodes to join the cluster", self.config.node_ready_timeout, |state| {
                membership_gaps(&spec, state)
            })
            .await
            .map_err(|error| StepError::Aborted { error, attempts })?;
        Ok(StepStatus::Succeeded { attempts })
    }

    async fn upgrade_component(
        &self,
        handle: &mut ClusterHandle,
        plan: &UpgradePlan,
        index: usize,
    ) -> Result<StepStatus, StepError> {
        let Some(step) = plan.component_steps.get(index) else {
            return Err(StepError::Aborted {
                error: OrchestratorError::InvalidSpec(format!("plan has no component step {}", index)),
                attempts: 0,
            });
        };
        let nodes: Vec<&str> = plan
            .desired
            .nodes_running(&step.component)
            .map(|n| n.name.as_str())
            .collect();
        let gaps_of = |state: &ClusterState| version_gaps(&step.component, &step.to, &nodes, state);

        let state = self.observe(handle).await?;
        if gaps_of(&state).is_empty() {
            return Ok(StepStatus::Skipped);
        }

        let spec = plan.staged_spec_for(index + 1, &state);
        let attempts = self.push(handle, &spec, &format!("upgrade {}", step.component)).await?;
        info!(
            cluster_id = %plan.cluster_id,
            component = %step.component,
            version = %step.to,
            nodes = nodes.len(),
            "Waiting for rollout"
        );

        let waiting_for = format!("{} rollout to {}", step.component, step.to);
        self.reconciler
            .poll_until(handle, &waiting_for, self.config.rollout_timeout, gaps_of)
            .await
            .map_err(|error| StepError::Aborted { error, attempts })?;
        Ok(StepStatus::Succeeded { attempts })
    }

    async fn remove_nodes(&self, handle: &mut ClusterHandle, plan: &UpgradePlan) -> Result<StepStatus, StepError> {
        let state = self.observe(handle).await?;
        let in_cluster: Vec<&str> = plan
            .removals
            .iter()
            .filter(|r| state.node(&r.name).is_some_and(|n| n.state != NodeState::Removed))
            .map(|r| r.name.as_str())
            .collect();

        let mut machines = Vec::new();
        for removal in &plan.removals {
            if let Some(node) = self.find_node(&removal.name).await? {
                machines.push(node);
            }
        }

        if in_cluster.is_empty() && machines.is_empty() {
            return Ok(StepStatus::Skipped);
        }

        let mut attempts = 1;
        if !in_cluster.is_empty() {
            info!(cluster_id = %plan.cluster_id, nodes = ?in_cluster, "Dropping nodes from cluster configuration");
            attempts = self.push(handle, &plan.final_spec(), "drop removed nodes").await?;
        }

        if !machines.is_empty() {
            let cloud = self.collaborators.cloud.as_ref();
            let doomed = &machines[..];
            let (_, n) = self.retry("delete nodes", || cloud.delete_nodes(doomed)).await?;
            attempts = attempts.max(n);
            let names: Vec<&str> = machines.iter().map(|m| m.name.as_str()).collect();
            info!(cluster_id = %plan.cluster_id, nodes = ?names, "Nodes deleted from cloud provider");
        }
        Ok(StepStatus::Succeeded { attempts })
    }

    /// Push `spec` to the cluster client, keeping the handle current
    async fn push(&self, handle: &mut ClusterHandle, spec: &ClusterSpec, during: &str) -> Result<u32, StepError> {
        let nodes = self.nodes_for(spec).await?;
        let cluster = self.collaborators.cluster.as_ref();
        let nodes = &nodes[..];

        let (mut updated, attempts) = self
            .retry(during, || cluster.create_or_update_cluster(nodes, spec))
            .await?;
        if updated.kubeconfig.is_none() {
            updated.kubeconfig = handle.kubeconfig.take();
        }
        *handle = updated;
        Ok(attempts)
    }

    /// Cloud nodes for every node in `spec`, carrying the spec's roles
    async fn nodes_for(&self, spec: &ClusterSpec) -> Result<Vec<Node>, StepError> {
        let mut nodes = Vec::with_capacity(spec.nodes.len());
        for wanted in &spec.nodes {
            let Some(mut node) = self.find_node(&wanted.name).await? else {
                return Err(StepError::Failed {
                    source: ClientError::NotFound(format!("node {} is not known to the cloud provider", wanted.name)),
                    attempts: 1,
                });
            };
            node.roles = wanted.roles.clone();
            nodes.push(node);
        }
        Ok(nodes)
    }

    async fn find_node(&self, name: &str) -> Result<Option<Node>, StepError> {
        let cloud = self.collaborators.cloud.as_ref();
        let (node, _) = self
            .retry(&format!("look up node {}", name), || cloud.find_node(name))
            .await?;
        Ok(node)
    }

    async fn observe(&self, handle: &ClusterHandle) -> Result<ClusterState, StepError> {
        let reconciler = &self.reconciler;
        let (state, _) = self.retry("observe cluster", || reconciler.try_observe(handle)).await?;
        Ok(state)
    }

    async fn retry<F, Fut, T>(&self, during: &str, operation: F) -> Result<(T, u32), StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        retry_transient(&self.config.retry, &self.cancel, during, operation)
            .await
            .map_err(|e| StepError::from_retry(e, during))
    }
}
