//! Desired cluster topology
//!
//! A `ClusterSpec` is what a caller submits for one upgrade request: the
//! ordered node role assignments and the image version of every component it
//! wants to manage. It is treated as immutable once handed to the planner.
//!
//! Specs are usually loaded from YAML:
//!
//! ```yaml
//! name: upgrade-2
//! nodes:
//!   - name: node-0
//!     roles: [controlplane, etcd]
//!   - name: node-1
//!     roles: [worker]
//! versions:
//!   kubernetes: v1.17.4-rancher1-3
//! ```

use crate::component::Component;
use crate::error::ModelError;
use crate::role::NodeRole;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Desired roles for one node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSpec {
    /// Node identity (matches `Node::name` and the cluster's node name)
    pub name: String,

    /// Roles the node must hold
    pub roles: BTreeSet<NodeRole>,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, roles: impl IntoIterator<Item = NodeRole>) -> Self {
        Self {
            name: name.into(),
            roles: roles.into_iter().collect(),
        }
    }

    /// Control-plane and etcd roles held by this node
    pub fn protected_roles(&self) -> BTreeSet<NodeRole> {
        self.roles.iter().copied().filter(NodeRole::is_protected).collect()
    }
}

/// Desired cluster topology and component versions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClusterSpec {
    /// Cluster name, used as the cluster id
    pub name: String,

    /// Ordered node role assignments
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,

    /// Target image version per component; unlisted components are left alone
    #[serde(default)]
    pub versions: BTreeMap<Component, String>,

    /// Control-plane/etcd nodes the caller explicitly schedules for removal
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub decommission: BTreeSet<String>,
}

impl ClusterSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse a spec from a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, ModelError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a spec from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn to_yaml(&self) -> Result<String, ModelError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_version(mut self, component: impl Into<Component>, version: impl Into<String>) -> Self {
        self.versions.insert(component.into(), version.into());
        self
    }

    pub fn with_decommissioned(mut self, node: impl Into<String>) -> Self {
        self.decommission.insert(node.into());
        self
    }

    /// Look up a node by name
    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Nodes holding `role`
    pub fn nodes_with_role(&self, role: NodeRole) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(move |n| n.roles.contains(&role))
    }

    /// Nodes that should run `component`
    pub fn nodes_running<'a>(&'a self, component: &'a Component) -> impl Iterator<Item = &'a NodeSpec> + 'a {
        self.nodes.iter().filter(move |n| component.runs_on(&n.roles))
    }

    pub fn version_for(&self, component: &Component) -> Option<&str> {
        self.versions.get(component).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"
name: upgrade-2
nodes:
  - name: node-0
    roles: [controlplane, etcd]
  - name: node-1
    roles: [worker]
  - name: node-2
    roles: [worker]
versions:
  kubernetes: v1.17.4-rancher1-3
  etcd: v3.4.3-rancher1
"#;

    #[test]
    fn test_from_yaml() {
        let spec = ClusterSpec::from_yaml(SPEC).unwrap();
        assert_eq!(spec.name, "upgrade-2");
        assert_eq!(spec.nodes.len(), 3);
        assert_eq!(spec.version_for(&Component::Kubernetes), Some("v1.17.4-rancher1-3"));
        assert_eq!(spec.version_for(&Component::Etcd), Some("v3.4.3-rancher1"));
        assert!(spec.decommission.is_empty());
    }

    #[test]
    fn test_role_queries() {
        let spec = ClusterSpec::from_yaml(SPEC).unwrap();
        assert_eq!(spec.nodes_with_role(NodeRole::Worker).count(), 2);
        assert_eq!(spec.nodes_running(&Component::Etcd).count(), 1);
        assert_eq!(spec.nodes_running(&Component::Kubernetes).count(), 3);
        assert_eq!(
            spec.node("node-0").map(NodeSpec::protected_roles),
            Some(BTreeSet::from([NodeRole::ControlPlane, NodeRole::Etcd]))
        );
    }

    #[test]
    fn test_yaml_roundtrip_preserves_decommission() {
        let spec = ClusterSpec::from_yaml(SPEC).unwrap().with_decommissioned("node-0");
        let back = ClusterSpec::from_yaml(&spec.to_yaml().unwrap()).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_from_missing_file() {
        let err = ClusterSpec::from_file("/nonexistent/cluster.yml").unwrap_err();
        assert!(matches!(err, ModelError::Io { .. }));
    }
}
