//! Node records owned by the cloud provider

use crate::role::{NodeRole, NodeState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A provisioned machine
///
/// The cloud provider owns these records; the orchestrator only references
/// them by `name`, which is also the node name the cluster reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Node {
    /// Stable node identity
    pub name: String,

    /// Address the cluster tool connects to
    pub address: String,

    /// Roles the node was provisioned for
    #[serde(default)]
    pub roles: BTreeSet<NodeRole>,

    /// Provisioning state as last reported by the provider
    #[serde(default)]
    pub state: NodeState,

    /// SSH user for the cluster tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// SSH private key path for the cluster tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<String>,
}

impl Node {
    pub fn is_ready(&self) -> bool {
        self.state == NodeState::Ready
    }
}

/// Request for one new node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRequest {
    pub name: String,
    pub roles: BTreeSet<NodeRole>,
}

impl NodeRequest {
    pub fn new(name: impl Into<String>, roles: impl IntoIterator<Item = NodeRole>) -> Self {
        Self {
            name: name.into(),
            roles: roles.into_iter().collect(),
        }
    }
}
