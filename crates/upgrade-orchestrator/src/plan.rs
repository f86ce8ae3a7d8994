//! Plan differ
//!
//! Compares an observed [`ClusterState`] with a desired [`ClusterSpec`] and
//! produces an [`UpgradePlan`]. Nothing here talks to a collaborator; every
//! rejection happens before the executor touches the cluster.

use crate::error::OrchestratorError;
use chrono::{DateTime, Utc};
use cluster_model::{versions_match, ClusterSpec, ClusterState, Component, NodeRole, NodeSpec, NodeState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use uuid::Uuid;

/// Worker role change on a node that stays in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChange {
    pub node: String,
    pub from: BTreeSet<NodeRole>,
    pub to: BTreeSet<NodeRole>,
}

/// Version change for one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentUpgrade {
    pub component: Component,
    /// Version the cluster runs before the step, if any node reported one
    pub from: Option<String>,
    pub to: String,
    pub priority: u8,
    /// Nodes that must report `to` before the step counts as rolled out
    pub affected_nodes: Vec<String>,
}

/// One unit of work in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    AddNodes { nodes: Vec<String> },
    UpdateTopology,
    UpgradeComponent { component: Component, index: usize },
    RemoveNodes { nodes: Vec<String> },
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::AddNodes { nodes } => write!(f, "add nodes [{}]", nodes.join(", ")),
            PlanStep::UpdateTopology => write!(f, "update topology"),
            PlanStep::UpgradeComponent { component, .. } => write!(f, "upgrade {}", component),
            PlanStep::RemoveNodes { nodes } => write!(f, "remove nodes [{}]", nodes.join(", ")),
        }
    }
}

/// Ordered set of changes turning the current cluster into the desired one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradePlan {
    pub plan_id: Uuid,
    pub cluster_id: String,
    pub desired: ClusterSpec,
    pub additions: Vec<NodeSpec>,
    /// Nodes leaving the cluster, with the roles they currently hold
    pub removals: Vec<NodeSpec>,
    pub role_changes: Vec<RoleChange>,
    /// Sorted by component priority
    pub component_steps: Vec<ComponentUpgrade>,
    pub baseline: BTreeMap<Component, String>,
    pub created_at: DateTime<Utc>,
}

impl UpgradePlan {
    /// True when executing the plan would change nothing
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty()
            && self.removals.is_empty()
            && self.role_changes.is_empty()
            && self.component_steps.is_empty()
    }

    /// Steps in execution order
    pub fn steps(&self) -> Vec<PlanStep> {
        let mut steps = Vec::new();
        if !self.additions.is_empty() {
            steps.push(PlanStep::AddNodes {
                nodes: self.additions.iter().map(|n| n.name.clone()).collect(),
            });
        }
        if !self.additions.is_empty() || !self.role_changes.is_empty() {
            steps.push(PlanStep::UpdateTopology);
        }
        for (index, step) in self.component_steps.iter().enumerate() {
            steps.push(PlanStep::UpgradeComponent {
                component: step.component.clone(),
                index,
            });
        }
        if !self.removals.is_empty() {
            steps.push(PlanStep::RemoveNodes {
                nodes: self.removals.iter().map(|n| n.name.clone()).collect(),
            });
        }
        steps
    }

    /// Spec to push while component steps `0..applied` have been applied
    ///
    /// Nodes scheduled for removal stay in the topology until the removal
    /// step; versions are the baseline overlaid with every applied target.
    pub fn staged_spec(&self, applied: usize) -> ClusterSpec {
        let mut versions = self.baseline.clone();
        for step in self.component_steps.iter().take(applied) {
            versions.insert(step.component.clone(), step.to.clone());
        }

        let mut nodes = self.desired.nodes.clone();
        nodes.extend(self.removals.iter().cloned());

        ClusterSpec {
            name: self.desired.name.clone(),
            nodes,
            versions,
            decommission: self.desired.decommission.clone(),
        }
    }

    /// `staged_spec` keeping only the removal nodes `current` still reports
    ///
    /// Once a removal node has left the cluster it is not pushed again.
    pub fn staged_spec_for(&self, applied: usize, current: &ClusterState) -> ClusterSpec {
        let mut spec = self.staged_spec(applied);
        spec.nodes.retain(|node| {
            self.desired.node(&node.name).is_some()
                || current
                    .node(&node.name)
                    .is_some_and(|observed| observed.state != NodeState::Removed)
        });
        spec
    }

    /// Spec for the final topology with every target applied
    pub fn final_spec(&self) -> ClusterSpec {
        let mut spec = self.desired.clone();
        let mut versions = self.baseline.clone();
        versions.extend(self.desired.versions.iter().map(|(c, v)| (c.clone(), v.clone())));
        spec.versions = versions;
        spec
    }

    /// One-line description for logs
    pub fn summary(&self) -> String {
        format!(
            "{} addition(s), {} removal(s), {} role change(s), {} component step(s)",
            self.additions.len(),
            self.removals.len(),
            self.role_changes.len(),
            self.component_steps.len()
        )
    }
}

/// Compute the plan that moves `current` to `desired`
pub fn diff(current: &ClusterState, desired: &ClusterSpec) -> Result<UpgradePlan, OrchestratorError> {
    validate_spec(desired)?;

    if !current.nodes.is_empty() && current.cluster_id != desired.name {
        return Err(OrchestratorError::InvalidSpec(format!(
            "observed state belongs to cluster {}, spec targets {}",
            current.cluster_id, desired.name
        )));
    }

    // Nodes already gone from the cluster do not count as present
    let present: BTreeMap<&str, &cluster_model::ObservedNode> = current
        .nodes
        .iter()
        .filter(|n| n.state != NodeState::Removed)
        .map(|n| (n.name.as_str(), n))
        .collect();

    let mut additions = Vec::new();
    let mut role_changes = Vec::new();
    for node in &desired.nodes {
        let Some(observed) = present.get(node.name.as_str()) else {
            additions.push(node.clone());
            continue;
        };
        if observed.protected_roles() != node.protected_roles() {
            return Err(OrchestratorError::InvariantViolation {
                node: node.name.clone(),
                detail: format!(
                    "control-plane/etcd roles would change from {} to {}",
                    format_roles(&observed.protected_roles()),
                    format_roles(&node.protected_roles())
                ),
            });
        }
        if observed.roles != node.roles {
            role_changes.push(RoleChange {
                node: node.name.clone(),
                from: observed.roles.clone(),
                to: node.roles.clone(),
            });
        }
    }

    let mut removals = Vec::new();
    for (name, observed) in &present {
        if desired.node(name).is_some() {
            continue;
        }
        let protected = observed.protected_roles();
        if !protected.is_empty() && !desired.decommission.contains(*name) {
            return Err(OrchestratorError::InvariantViolation {
                node: (*name).to_string(),
                detail: format!(
                    "node holds {} but is neither in the desired topology nor scheduled for decommission",
                    format_roles(&protected)
                ),
            });
        }
        removals.push(NodeSpec::new(*name, observed.roles.iter().copied()));
    }

    let added: HashSet<&str> = additions.iter().map(|n| n.name.as_str()).collect();
    let mut baseline = BTreeMap::new();
    let mut component_steps = Vec::new();
    for (component, target) in &desired.versions {
        let prevailing = current.prevailing_version(component);
        let base = match prevailing {
            Some(running) if !versions_match(target, running) => running.to_string(),
            _ => target.clone(),
        };

        let affected_nodes: Vec<String> = desired
            .nodes_running(component)
            .filter(|node| {
                if added.contains(node.name.as_str()) {
                    return !versions_match(target, &base);
                }
                present
                    .get(node.name.as_str())
                    .and_then(|observed| observed.version(component))
                    .is_none_or(|running| !versions_match(target, running))
            })
            .map(|node| node.name.clone())
            .collect();

        let kept_mismatch = affected_nodes.iter().any(|name| !added.contains(name.as_str()));
        if kept_mismatch {
            component_steps.push(ComponentUpgrade {
                component: component.clone(),
                from: prevailing.map(str::to_string),
                to: target.clone(),
                priority: component.priority(),
                affected_nodes,
            });
        }
        baseline.insert(component.clone(), base);
    }

    // Unlisted components keep running what they run now and are never scheduled
    for component in current.components() {
        if baseline.contains_key(component) {
            continue;
        }
        if let Some(running) = current.prevailing_version(component) {
            baseline.insert(component.clone(), running.to_string());
        }
    }
    component_steps.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.component.cmp(&b.component)));

    Ok(UpgradePlan {
        plan_id: Uuid::new_v4(),
        cluster_id: desired.name.clone(),
        desired: desired.clone(),
        additions,
        removals,
        role_changes,
        component_steps,
        baseline,
        created_at: Utc::now(),
    })
}

/// Structural checks on a desired spec
pub fn validate_spec(spec: &ClusterSpec) -> Result<(), OrchestratorError> {
    if spec.name.trim().is_empty() {
        return Err(OrchestratorError::InvalidSpec("cluster name is empty".to_string()));
    }
    if spec.nodes.is_empty() {
        return Err(OrchestratorError::InvalidSpec("spec lists no nodes".to_string()));
    }

    let mut seen = HashSet::new();
    for node in &spec.nodes {
        if node.name.trim().is_empty() {
            return Err(OrchestratorError::InvalidSpec("node with empty name".to_string()));
        }
        if !seen.insert(node.name.as_str()) {
            return Err(OrchestratorError::InvalidSpec(format!("duplicate node {}", node.name)));
        }
        if node.roles.is_empty() {
            return Err(OrchestratorError::InvalidSpec(format!("node {} has no roles", node.name)));
        }
        if spec.decommission.contains(&node.name) {
            return Err(OrchestratorError::InvalidSpec(format!(
                "node {} is both desired and scheduled for decommission",
                node.name
            )));
        }
    }

    if let Some((component, _)) = spec.versions.iter().find(|(_, v)| v.trim().is_empty()) {
        return Err(OrchestratorError::InvalidSpec(format!("component {} has an empty version", component)));
    }

    for role in [NodeRole::Etcd, NodeRole::ControlPlane] {
        if spec.nodes_with_role(role).next().is_none() {
            return Err(OrchestratorError::InvalidSpec(format!("spec has no {} node", role)));
        }
    }
    Ok(())
}

fn format_roles(roles: &BTreeSet<NodeRole>) -> String {
    if roles.is_empty() {
        return "no protected roles".to_string();
    }
    let names: Vec<&str> = roles.iter().map(NodeRole::as_str).collect();
    format!("[{}]", names.join(", "))
}
