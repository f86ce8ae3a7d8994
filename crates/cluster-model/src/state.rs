//! Observed cluster state
//!
//! A `ClusterState` is a snapshot assembled from the cluster inspector and the
//! network probe. It is never persisted; every reconciliation poll rebuilds it.

use crate::component::Component;
use crate::role::{NodeRole, NodeState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Handle to a cluster managed by the cluster client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterHandle {
    /// Cluster id (the spec name)
    pub cluster_id: String,

    /// Kubeconfig written by the cluster tool, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
}

impl ClusterHandle {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            kubeconfig: None,
        }
    }
}

/// One node as the live cluster reports it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedNode {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    pub roles: BTreeSet<NodeRole>,

    pub state: NodeState,

    /// Running version of each component on this node
    #[serde(default)]
    pub versions: BTreeMap<Component, String>,
}

impl ObservedNode {
    pub fn new(name: impl Into<String>, roles: impl IntoIterator<Item = NodeRole>, state: NodeState) -> Self {
        Self {
            name: name.into(),
            address: None,
            roles: roles.into_iter().collect(),
            state,
            versions: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, component: impl Into<Component>, version: impl Into<String>) -> Self {
        self.versions.insert(component.into(), version.into());
        self
    }

    pub fn version(&self, component: &Component) -> Option<&str> {
        self.versions.get(component).map(String::as_str)
    }

    pub fn is_ready(&self) -> bool {
        self.state == NodeState::Ready
    }

    pub fn protected_roles(&self) -> BTreeSet<NodeRole> {
        self.roles.iter().copied().filter(NodeRole::is_protected).collect()
    }
}

/// Connectivity and DNS snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NetworkHealth {
    /// Nodes that could not be reached
    #[serde(default)]
    pub unreachable: BTreeSet<String>,

    /// Nodes whose name did not resolve
    #[serde(default)]
    pub dns_failures: BTreeSet<String>,
}

impl NetworkHealth {
    pub fn is_healthy(&self) -> bool {
        self.unreachable.is_empty() && self.dns_failures.is_empty()
    }
}

/// Snapshot of the live cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterState {
    pub cluster_id: String,
    pub nodes: Vec<ObservedNode>,
    #[serde(default)]
    pub network: NetworkHealth,
    pub observed_at: DateTime<Utc>,
}

impl ClusterState {
    pub fn new(cluster_id: impl Into<String>, nodes: Vec<ObservedNode>, network: NetworkHealth) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            nodes,
            network,
            observed_at: Utc::now(),
        }
    }

    /// State of a cluster that does not exist yet
    pub fn empty(cluster_id: impl Into<String>) -> Self {
        Self::new(cluster_id, Vec::new(), NetworkHealth::default())
    }

    pub fn node(&self, name: &str) -> Option<&ObservedNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Most common running version of `component` across the nodes that run it
    ///
    /// Nodes already `Removed` do not count. Ties resolve to the lexically
    /// smallest version so the result is stable.
    pub fn prevailing_version(&self, component: &Component) -> Option<&str> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for node in self.nodes.iter().filter(|n| n.state != NodeState::Removed) {
            if let Some(version) = node.version(component) {
                *counts.entry(version).or_default() += 1;
            }
        }
        let mut best: Option<(&str, usize)> = None;
        for (version, count) in counts {
            if best.is_none_or(|(_, c)| count > c) {
                best = Some((version, count));
            }
        }
        best.map(|(version, _)| version)
    }

    /// Every component a node still in the cluster reports
    pub fn components(&self) -> BTreeSet<&Component> {
        self.nodes
            .iter()
            .filter(|n| n.state != NodeState::Removed)
            .flat_map(|n| n.versions.keys())
            .collect()
    }
}
