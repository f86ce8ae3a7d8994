//! Validation gate
//!
//! Read-only post-condition check run after an upgrade. Mismatches are
//! collected into a [`ValidationReport`] rather than raised; callers that
//! want to fail fast use [`ValidationReport::into_result`].

use crate::collaborators::Collaborators;
use crate::error::OrchestratorError;
use chrono::{DateTime, Utc};
use cluster_model::{versions_match, ClusterHandle, Component, NetworkHealth, NodeState, ObservedNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A node running something other than the expected version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMismatch {
    pub node: String,
    pub component: Component,
    pub expected: String,
    /// `None` when the node reports no version for the component
    pub actual: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub cluster_id: String,
    /// Requested nodes the cluster reports, in request order
    #[serde(default)]
    pub nodes: Vec<String>,
    pub mismatches: Vec<VersionMismatch>,
    /// Requested nodes the cluster does not report
    pub missing_nodes: Vec<String>,
    pub network: NetworkHealth,
    pub checked_at: DateTime<Utc>,
}

impl ValidationReport {
    /// No mismatches, no missing nodes and a healthy network
    pub fn is_valid(&self) -> bool {
        self.mismatches.is_empty() && self.missing_nodes.is_empty() && self.network.is_healthy()
    }

    /// Every problem as a readable sentence
    pub fn findings(&self) -> Vec<String> {
        let mut findings = Vec::new();
        for m in &self.mismatches {
            match &m.actual {
                Some(actual) => findings.push(format!(
                    "node {} runs {} {}, expected {}",
                    m.node, m.component, actual, m.expected
                )),
                None => findings.push(format!(
                    "node {} reports no {} version, expected {}",
                    m.node, m.component, m.expected
                )),
            }
        }
        for node in &self.missing_nodes {
            findings.push(format!("node {} is not in the cluster", node));
        }
        for node in &self.network.unreachable {
            findings.push(format!("node {} is unreachable", node));
        }
        for node in &self.network.dns_failures {
            findings.push(format!("node {} does not resolve", node));
        }
        findings
    }

    /// Turn findings into `ValidationMismatch`
    pub fn into_result(self) -> Result<Self, OrchestratorError> {
        if self.is_valid() {
            return Ok(self);
        }
        let findings = self.findings();
        Err(OrchestratorError::ValidationMismatch {
            count: findings.len(),
            findings,
        })
    }

    /// Problems on nodes that were healthy in `before`
    ///
    /// A node counts as healthy when `before` checked it and found it
    /// reachable and resolving. Nodes `before` never saw are not compared.
    pub fn regressions(&self, before: &ValidationReport) -> Vec<String> {
        let mut regressions = Vec::new();
        for node in &before.nodes {
            if before.network.unreachable.contains(node) || before.network.dns_failures.contains(node) {
                continue;
            }
            if self.missing_nodes.contains(node) {
                regressions.push(format!("node {} left the cluster", node));
                continue;
            }
            if self.network.unreachable.contains(node) {
                regressions.push(format!("node {} became unreachable", node));
            }
            if self.network.dns_failures.contains(node) {
                regressions.push(format!("node {} stopped resolving", node));
            }
        }
        regressions
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Checks running versions and connectivity of a set of nodes
#[derive(Debug, Clone)]
pub struct ValidationGate {
    collaborators: Collaborators,
}

impl ValidationGate {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Compare `nodes` against `expected`
    ///
    /// A component is only checked on nodes whose roles run it. The only
    /// error is a failed collaborator query.
    pub async fn validate(
        &self,
        handle: &ClusterHandle,
        nodes: &[String],
        expected: &BTreeMap<Component, String>,
    ) -> Result<ValidationReport, OrchestratorError> {
        let observed = self.collaborators.inspector.observe_nodes(handle).await?;

        let mut checked: Vec<ObservedNode> = Vec::with_capacity(nodes.len());
        let mut missing_nodes = Vec::new();
        for name in nodes {
            match observed.iter().find(|n| &n.name == name && n.state != NodeState::Removed) {
                Some(node) => checked.push(node.clone()),
                None => missing_nodes.push(name.clone()),
            }
        }

        let mismatches = version_mismatches(&checked, expected);
        let network = self.collaborators.probe.probe(&checked).await?;

        let report = ValidationReport {
            cluster_id: handle.cluster_id.clone(),
            nodes: checked.iter().map(|n| n.name.clone()).collect(),
            mismatches,
            missing_nodes,
            network,
            checked_at: Utc::now(),
        };

        if report.is_valid() {
            info!(cluster_id = %report.cluster_id, nodes = nodes.len(), "Validation passed");
        } else {
            warn!(
                cluster_id = %report.cluster_id,
                mismatches = report.mismatches.len(),
                missing = report.missing_nodes.len(),
                unreachable = report.network.unreachable.len(),
                dns_failures = report.network.dns_failures.len(),
                "Validation found problems"
            );
        }
        Ok(report)
    }
}

/// Expected versions not matched by the nodes that run each component
pub fn version_mismatches(nodes: &[ObservedNode], expected: &BTreeMap<Component, String>) -> Vec<VersionMismatch> {
    let mut mismatches = Vec::new();
    for node in nodes {
        for (component, version) in expected {
            if !component.runs_on(&node.roles) {
                continue;
            }
            let actual = node.version(component);
            if actual.is_some_and(|running| versions_match(version, running)) {
                continue;
            }
            mismatches.push(VersionMismatch {
                node: node.name.clone(),
                component: component.clone(),
                expected: version.clone(),
                actual: actual.map(str::to_string),
            });
        }
    }
    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_model::NodeRole;
    use std::collections::BTreeSet;

    fn expected() -> BTreeMap<Component, String> {
        BTreeMap::from([
            (Component::Kubernetes, "v1.17.4-rancher1-3".to_string()),
            (Component::Etcd, "v3.4.3-rancher1".to_string()),
        ])
    }

    #[test]
    fn test_component_checked_only_where_it_runs() {
        let worker = ObservedNode::new("node-1", [NodeRole::Worker], NodeState::Ready)
            .with_version(Component::Kubernetes, "v1.17.4");
        assert!(version_mismatches(&[worker], &expected()).is_empty());
    }

    #[test]
    fn test_mismatch_and_missing_version() {
        let etcd = ObservedNode::new("node-0", [NodeRole::Etcd, NodeRole::ControlPlane], NodeState::Ready)
            .with_version(Component::Kubernetes, "v1.16.8");

        let mismatches = version_mismatches(&[etcd], &expected());
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].component, Component::Etcd);
        assert_eq!(mismatches[0].actual, None);
        assert_eq!(mismatches[1].actual.as_deref(), Some("v1.16.8"));
    }

    #[test]
    fn test_into_result_lists_findings() {
        let report = ValidationReport {
            cluster_id: "c1".to_string(),
            nodes: vec!["node-2".to_string()],
            mismatches: Vec::new(),
            missing_nodes: vec!["node-9".to_string()],
            network: NetworkHealth {
                unreachable: BTreeSet::from(["node-2".to_string()]),
                dns_failures: BTreeSet::new(),
            },
            checked_at: Utc::now(),
        };
        assert!(!report.is_valid());

        let err = report.into_result().unwrap_err();
        match err {
            OrchestratorError::ValidationMismatch { count, findings } => {
                assert_eq!(count, 2);
                assert_eq!(findings[0], "node node-9 is not in the cluster");
                assert_eq!(findings[1], "node node-2 is unreachable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    fn report(nodes: &[&str], missing: &[&str], unreachable: &[&str], dns_failures: &[&str]) -> ValidationReport {
        let names = |list: &[&str]| list.iter().map(ToString::to_string).collect::<Vec<_>>();
        ValidationReport {
            cluster_id: "c1".to_string(),
            nodes: names(nodes),
            mismatches: Vec::new(),
            missing_nodes: names(missing),
            network: NetworkHealth {
                unreachable: names(unreachable).into_iter().collect(),
                dns_failures: names(dns_failures).into_iter().collect(),
            },
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_regressions_only_for_previously_healthy_nodes() {
        let before = report(&["node-0", "node-1", "node-2", "node-3"], &[], &["node-2"], &[]);
        let after = report(&["node-1", "node-2", "node-3", "node-4"], &["node-0"], &["node-1", "node-2", "node-4"], &["node-3"]);

        assert_eq!(
            after.regressions(&before),
            vec![
                "node node-0 left the cluster".to_string(),
                "node node-1 became unreachable".to_string(),
                "node node-3 stopped resolving".to_string(),
            ]
        );
    }

    #[test]
    fn test_no_regressions_against_itself() {
        let before = report(&["node-0", "node-1"], &[], &["node-1"], &[]);
        assert!(before.regressions(&before).is_empty());
    }
}
