//! State reconciler
//!
//! Observes the live cluster and polls until it matches a target. Every wait
//! is bounded by a deadline and abandoned as soon as the cancellation token
//! fires. Transient observation failures count as a gap for that poll rather
//! than aborting the wait.

use crate::collaborators::Collaborators;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use cluster_client::ClientError;
use cluster_model::{versions_match, ClusterHandle, ClusterSpec, ClusterState, Component, NodeState};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polls the cluster through the inspector and network probe
#[derive(Debug, Clone)]
pub struct StateReconciler {
    collaborators: Collaborators,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl StateReconciler {
    pub fn new(collaborators: Collaborators, config: OrchestratorConfig, cancel: CancellationToken) -> Self {
        Self {
            collaborators,
            config,
            cancel,
        }
    }

    /// Take one snapshot of the cluster
    pub async fn try_observe(&self, handle: &ClusterHandle) -> Result<ClusterState, ClientError> {
        let nodes = self.collaborators.inspector.observe_nodes(handle).await?;
        let network = self.collaborators.probe.probe(&nodes).await?;
        Ok(ClusterState::new(handle.cluster_id.clone(), nodes, network))
    }

    pub async fn observe(&self, handle: &ClusterHandle) -> Result<ClusterState, OrchestratorError> {
        Ok(self.try_observe(handle).await?)
    }

    /// Poll until `target` is fully converged or `timeout` elapses
    pub async fn wait_until_converged(
        &self,
        handle: &ClusterHandle,
        target: &ClusterSpec,
        timeout: Duration,
    ) -> Result<ClusterState, OrchestratorError> {
        let waiting_for = format!("cluster {} to converge", target.name);
        let state = self
            .poll_until(handle, &waiting_for, timeout, |state| convergence_gaps(target, state))
            .await?;
        info!(cluster_id = %handle.cluster_id, nodes = state.nodes.len(), "Cluster converged");
        Ok(state)
    }

    /// Observe repeatedly until `gaps_of` reports nothing outstanding
    pub async fn poll_until<F>(
        &self,
        handle: &ClusterHandle,
        waiting_for: &str,
        timeout: Duration,
        mut gaps_of: F,
    ) -> Result<ClusterState, OrchestratorError>
    where
        F: FnMut(&ClusterState) -> Vec<String>,
    {
        let deadline = Instant::now() + timeout;
        let mut last_observed: Option<ClusterState> = None;
        let mut last_gaps = Vec::new();
        let mut polls = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(cancelled(waiting_for, last_observed));
            }
            polls += 1;

            match self.try_observe(handle).await {
                Ok(state) => {
                    let gaps = gaps_of(&state);
                    if gaps.is_empty() {
                        debug!(cluster_id = %handle.cluster_id, polls, "Done waiting for {}", waiting_for);
                        return Ok(state);
                    }
                    debug!(
                        cluster_id = %handle.cluster_id,
                        polls,
                        outstanding = gaps.len(),
                        "Still waiting for {}",
                        waiting_for
                    );
                    last_gaps = gaps;
                    last_observed = Some(state);
                }
                Err(e) if e.is_transient() => {
                    warn!(cluster_id = %handle.cluster_id, polls, error = %e, "Observation failed, will poll again");
                    last_gaps = vec![format!("observation failed: {}", e)];
                }
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(OrchestratorError::Timeout {
                    waiting_for: waiting_for.to_string(),
                    gaps: last_gaps,
                    last_observed: last_observed.map(Box::new),
                    partial: None,
                });
            }

            let pause = self.config.poll_interval.min(deadline - now);
            tokio::select! {
                () = self.cancel.cancelled() => return Err(cancelled(waiting_for, last_observed)),
                () = tokio::time::sleep(pause) => {}
            }
        }
    }
}

fn cancelled(waiting_for: &str, last_observed: Option<ClusterState>) -> OrchestratorError {
    OrchestratorError::Cancelled {
        during: format!("waiting for {}", waiting_for),
        last_observed: last_observed.map(Box::new),
        partial: None,
    }
}

/// Everything keeping `state` from matching `target`, as readable sentences
pub fn convergence_gaps(target: &ClusterSpec, state: &ClusterState) -> Vec<String> {
    let mut gaps = membership_gaps(target, state);

    let wanted: BTreeSet<&str> = target.node_names().collect();
    for node in &state.nodes {
        if node.state != NodeState::Removed && !wanted.contains(node.name.as_str()) {
            gaps.push(format!("node {} is still in the cluster", node.name));
        }
    }

    for (component, version) in &target.versions {
        let nodes: Vec<&str> = target.nodes_running(component).map(|n| n.name.as_str()).collect();
        gaps.extend(version_gaps(component, version, &nodes, state));
    }

    let mut seen = BTreeSet::new();
    gaps.retain(|gap| seen.insert(gap.clone()));
    gaps
}

/// Target nodes that are missing, not ready, or hold the wrong roles
pub fn membership_gaps(target: &ClusterSpec, state: &ClusterState) -> Vec<String> {
    let mut gaps = Vec::new();
    for wanted in &target.nodes {
        match state.node(&wanted.name) {
            None => gaps.push(format!("node {} is missing", wanted.name)),
            Some(node) if node.state == NodeState::Removed => {
                gaps.push(format!("node {} is missing", wanted.name));
            }
            Some(node) => {
                if !node.is_ready() {
                    gaps.push(format!("node {} is {}", node.name, node.state));
                }
                if node.roles != wanted.roles {
                    let have: Vec<&str> = node.roles.iter().map(|r| r.as_str()).collect();
                    let want: Vec<&str> = wanted.roles.iter().map(|r| r.as_str()).collect();
                    gaps.push(format!(
                        "node {} has roles [{}], want [{}]",
                        node.name,
                        have.join(", "),
                        want.join(", ")
                    ));
                }
            }
        }
    }
    gaps
}

/// Nodes among `nodes` not ready or not reporting `version` for `component`
pub fn version_gaps(component: &Component, version: &str, nodes: &[&str], state: &ClusterState) -> Vec<String> {
    let mut gaps = Vec::new();
    for name in nodes {
        let Some(node) = state.node(name) else {
            gaps.push(format!("node {} is missing", name));
            continue;
        };
        if !node.is_ready() {
            gaps.push(format!("node {} is {}", name, node.state));
        }
        match node.version(component) {
            Some(running) if versions_match(version, running) => {}
            Some(running) => gaps.push(format!("node {} runs {} {}, want {}", name, component, running, version)),
            None => gaps.push(format!("node {} reports no {} version, want {}", name, component, version)),
        }
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_model::{NetworkHealth, NodeRole, NodeSpec, ObservedNode};

    fn target() -> ClusterSpec {
        ClusterSpec::new("c1")
            .with_node(NodeSpec::new("node-0", [NodeRole::ControlPlane, NodeRole::Etcd]))
            .with_node(NodeSpec::new("node-1", [NodeRole::Worker]))
            .with_version(Component::Kubernetes, "v1.17.4-rancher1-3")
    }

    fn node(name: &str, roles: &[NodeRole], version: &str) -> ObservedNode {
        ObservedNode::new(name, roles.iter().copied(), NodeState::Ready).with_version(Component::Kubernetes, version)
    }

    #[test]
    fn test_converged_state_has_no_gaps() {
        let state = ClusterState::new(
            "c1",
            vec![
                node("node-0", &[NodeRole::ControlPlane, NodeRole::Etcd], "v1.17.4"),
                node("node-1", &[NodeRole::Worker], "v1.17.4-rancher1-3"),
            ],
            NetworkHealth::default(),
        );
        assert!(convergence_gaps(&target(), &state).is_empty());
    }

    #[test]
    fn test_gaps_describe_every_difference() {
        let mut stale = node("node-1", &[NodeRole::Worker], "v1.16.8");
        stale.state = NodeState::Pending;
        let state = ClusterState::new(
            "c1",
            vec![stale, node("node-2", &[NodeRole::Worker], "v1.17.4")],
            NetworkHealth::default(),
        );

        let gaps = convergence_gaps(&target(), &state);
        assert!(gaps.contains(&"node node-0 is missing".to_string()));
        assert!(gaps.contains(&"node node-1 is Pending".to_string()));
        assert!(gaps.contains(&"node node-2 is still in the cluster".to_string()));
        assert!(gaps.iter().any(|g| g.starts_with("node node-1 runs kubernetes v1.16.8")));
    }

    #[test]
    fn test_wrong_roles_reported() {
        let state = ClusterState::new(
            "c1",
            vec![
                node("node-0", &[NodeRole::ControlPlane, NodeRole::Etcd, NodeRole::Worker], "v1.17.4"),
                node("node-1", &[NodeRole::Worker], "v1.17.4"),
            ],
            NetworkHealth::default(),
        );
        let gaps = membership_gaps(&target(), &state);
        assert_eq!(gaps, vec!["node node-0 has roles [controlplane, etcd, worker], want [controlplane, etcd]"]);
    }
}
