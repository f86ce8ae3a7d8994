//! Node roles and provisioning states

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a node holds in the cluster
///
/// Serializes with the RKE spelling (`controlplane`, `etcd`, `worker`) and
/// also accepts the Kubernetes spelling `control-plane` on input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Runs the cluster-management services
    #[serde(alias = "control-plane", alias = "control_plane")]
    ControlPlane,

    /// Runs a member of the consistency store
    Etcd,

    /// Runs workloads only
    Worker,
}

impl NodeRole {
    /// Roles whose node identity must survive an upgrade
    pub const PROTECTED: [NodeRole; 2] = [NodeRole::ControlPlane, NodeRole::Etcd];

    /// The RKE spelling of this role
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::ControlPlane => "controlplane",
            NodeRole::Etcd => "etcd",
            NodeRole::Worker => "worker",
        }
    }

    /// Whether the role is control-plane or etcd
    pub fn is_protected(&self) -> bool {
        Self::PROTECTED.contains(self)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "controlplane" | "control-plane" | "control_plane" | "master" => Ok(NodeRole::ControlPlane),
            "etcd" => Ok(NodeRole::Etcd),
            "worker" => Ok(NodeRole::Worker),
            other => Err(ModelError::UnknownRole(other.to_string())),
        }
    }
}

/// Provisioning state of a node
///
/// Serializes as PascalCase but accepts lowercase on input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum NodeState {
    /// Requested but not yet usable
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// Accepting work
    #[serde(alias = "ready")]
    Ready,

    /// Being evacuated ahead of removal
    #[serde(alias = "draining")]
    Draining,

    /// Gone from the cluster
    #[serde(alias = "removed")]
    Removed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Pending => "Pending",
            NodeState::Ready => "Ready",
            NodeState::Draining => "Draining",
            NodeState::Removed => "Removed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_accepts_both_spellings() {
        let rke: NodeRole = serde_yaml::from_str("controlplane").unwrap();
        let k8s: NodeRole = serde_yaml::from_str("control-plane").unwrap();
        assert_eq!(rke, NodeRole::ControlPlane);
        assert_eq!(k8s, NodeRole::ControlPlane);
        assert_eq!(serde_yaml::to_string(&NodeRole::ControlPlane).unwrap().trim(), "controlplane");
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("master".parse::<NodeRole>().unwrap(), NodeRole::ControlPlane);
        assert_eq!("Worker".parse::<NodeRole>().unwrap(), NodeRole::Worker);
        assert!(matches!("ingress".parse::<NodeRole>(), Err(ModelError::UnknownRole(_))));
    }

    #[test]
    fn test_protected_roles() {
        assert!(NodeRole::Etcd.is_protected());
        assert!(NodeRole::ControlPlane.is_protected());
        assert!(!NodeRole::Worker.is_protected());
    }

    #[test]
    fn test_state_lowercase_alias() {
        let state: NodeState = serde_yaml::from_str("draining").unwrap();
        assert_eq!(state, NodeState::Draining);
        assert_eq!(NodeState::default(), NodeState::Pending);
    }
}
