//! Cluster components whose image versions are managed
//!
//! Components are keyed by their RKE service/system-image name. The enum
//! variant order is the rollout priority: the derived `Ord` puts etcd and the
//! control-plane services ahead of the node agents and addons.

use crate::role::NodeRole;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A versioned cluster component
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Component {
    /// Consistency store
    Etcd,
    /// Hyperkube image shared by every Kubernetes service
    Kubernetes,
    /// API server
    KubeApi,
    /// Controller manager
    KubeController,
    /// Scheduler
    Scheduler,
    /// Node agent
    Kubelet,
    /// Service proxy
    Kubeproxy,
    /// Any other system image (DNS, ingress, network plugin, ...)
    Addon(String),
}

impl Component {
    /// Service name as RKE spells it
    pub fn name(&self) -> &str {
        match self {
            Component::Etcd => "etcd",
            Component::Kubernetes => "kubernetes",
            Component::KubeApi => "kube-api",
            Component::KubeController => "kube-controller",
            Component::Scheduler => "scheduler",
            Component::Kubelet => "kubelet",
            Component::Kubeproxy => "kubeproxy",
            Component::Addon(name) => name,
        }
    }

    /// Rollout priority; lower values roll out first
    pub fn priority(&self) -> u8 {
        match self {
            Component::Etcd => 0,
            Component::Kubernetes => 1,
            Component::KubeApi | Component::KubeController | Component::Scheduler => 2,
            Component::Kubelet | Component::Kubeproxy => 3,
            Component::Addon(_) => 4,
        }
    }

    /// Whether a node holding `roles` runs this component
    pub fn runs_on<'a, I>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = &'a NodeRole>,
    {
        let mut roles = roles.into_iter();
        match self {
            Component::Etcd => roles.any(|r| *r == NodeRole::Etcd),
            Component::KubeApi | Component::KubeController | Component::Scheduler => {
                roles.any(|r| *r == NodeRole::ControlPlane)
            }
            Component::Kubernetes | Component::Kubelet | Component::Kubeproxy => {
                roles.next().is_some()
            }
            Component::Addon(_) => roles.any(|r| *r == NodeRole::Worker),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for Component {
    fn from(value: String) -> Self {
        match value.as_str() {
            "etcd" => Component::Etcd,
            "kubernetes" | "hyperkube" => Component::Kubernetes,
            "kube-api" | "kube-apiserver" => Component::KubeApi,
            "kube-controller" | "kube-controller-manager" => Component::KubeController,
            "scheduler" | "kube-scheduler" => Component::Scheduler,
            "kubelet" => Component::Kubelet,
            "kubeproxy" | "kube-proxy" => Component::Kubeproxy,
            _ => Component::Addon(value),
        }
    }
}

impl From<&str> for Component {
    fn from(value: &str) -> Self {
        Component::from(value.to_string())
    }
}

impl From<Component> for String {
    fn from(value: Component) -> Self {
        value.name().to_string()
    }
}

impl FromStr for Component {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Component::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_matches_ord() {
        let mut components = vec![
            Component::Kubelet,
            Component::Addon("coredns".to_string()),
            Component::Scheduler,
            Component::Etcd,
            Component::Kubernetes,
        ];
        components.sort();
        assert_eq!(components.first(), Some(&Component::Etcd));
        assert_eq!(components.last(), Some(&Component::Addon("coredns".to_string())));
        assert!(Component::KubeApi.priority() < Component::Kubelet.priority());
    }

    #[test]
    fn test_kubernetes_spellings_normalize() {
        assert_eq!(Component::from("kube-apiserver"), Component::KubeApi);
        assert_eq!(Component::from("kube-proxy"), Component::Kubeproxy);
        assert_eq!(Component::from("hyperkube"), Component::Kubernetes);
        assert_eq!(Component::from("nginx-ingress"), Component::Addon("nginx-ingress".to_string()));
    }

    #[test]
    fn test_runs_on_roles() {
        let worker = [NodeRole::Worker];
        let master = [NodeRole::ControlPlane, NodeRole::Etcd];

        assert!(Component::Kubernetes.runs_on(&worker));
        assert!(Component::Kubernetes.runs_on(&master));
        assert!(!Component::Etcd.runs_on(&worker));
        assert!(Component::Etcd.runs_on(&master));
        assert!(!Component::Scheduler.runs_on(&worker));
        assert!(!Component::Addon("coredns".into()).runs_on(&master));
        assert!(!Component::Kubelet.runs_on(&[]));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Component::KubeController).unwrap();
        assert_eq!(json, "\"kube-controller\"");
        let back: Component = serde_json::from_str("\"scheduler\"").unwrap();
        assert_eq!(back, Component::Scheduler);
    }
}
