//! Kubernetes-backed cluster inspector
//!
//! Derives the observed node set from the Kubernetes API:
//! - roles from `node-role.kubernetes.io/<role>` labels
//! - readiness from the `Ready` condition, draining from `spec.unschedulable`
//! - kubelet / kube-proxy versions from `status.nodeInfo`
//! - etcd, control-plane and addon versions from `kube-system` pod image tags
//! - when the handle's kubeconfig sits in an RKE cluster directory, etcd and
//!   control-plane versions from `cluster.rkestate`, since RKE runs those
//!   services outside Kubernetes

use crate::collaborators::ClusterInspector;
use crate::error::ClientError;
use crate::rkestate::{RkeFullState, STATE_FILE};
use cluster_model::{ClusterHandle, Component, NodeRole, NodeState, ObservedNode};
use k8s_openapi::api::core::v1::{Node as KubeNode, Pod};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";
const SYSTEM_NAMESPACE: &str = "kube-system";

/// Reads node roles, readiness and component versions from the Kubernetes API
pub struct KubeInspector {
    default_client: Option<Client>,
}

impl std::fmt::Debug for KubeInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeInspector")
            .field("has_default_client", &self.default_client.is_some())
            .finish()
    }
}

impl KubeInspector {
    /// Inspector that uses the handle's kubeconfig when present, otherwise `client`
    pub fn new(client: Option<Client>) -> Self {
        Self { default_client: client }
    }

    async fn client_for(&self, handle: &ClusterHandle) -> Result<Option<Client>, ClientError> {
        let Some(path) = handle.kubeconfig.as_deref() else {
            return Ok(self.default_client.clone());
        };
        if !Path::new(path).exists() {
            // The cluster tool writes the kubeconfig on first `up`
            debug!("Kubeconfig {} does not exist yet, cluster {} not created", path, handle.cluster_id);
            return Ok(None);
        }
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| ClientError::Provider(format!("Failed to read kubeconfig {}: {}", path, e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClientError::Provider(format!("Invalid kubeconfig {}: {}", path, e)))?;
        Ok(Some(Client::try_from(config)?))
    }
}

#[async_trait::async_trait]
impl ClusterInspector for KubeInspector {
    async fn observe_nodes(&self, handle: &ClusterHandle) -> Result<Vec<ObservedNode>, ClientError> {
        let Some(client) = self.client_for(handle).await? else {
            return Ok(Vec::new());
        };

        let nodes: Api<KubeNode> = Api::all(client.clone());
        let pods: Api<Pod> = Api::namespaced(client, SYSTEM_NAMESPACE);

        let node_list = nodes.list(&ListParams::default()).await?;
        let pod_list = pods.list(&ListParams::default()).await?;
        debug!(
            "Observed {} nodes and {} system pods in cluster {}",
            node_list.items.len(),
            pod_list.items.len(),
            handle.cluster_id
        );

        let mut observed = observe(&node_list.items, &pod_list.items);
        if let Some(kubeconfig) = handle.kubeconfig.as_deref()
            && let Some(state) = read_rke_state(Path::new(kubeconfig)).await?
        {
            merge_applied_versions(&mut observed, &state);
        }
        Ok(observed)
    }
}

/// RKE state file beside `kubeconfig`, if RKE wrote one
async fn read_rke_state(kubeconfig: &Path) -> Result<Option<RkeFullState>, ClientError> {
    let Some(dir) = kubeconfig.parent() else {
        return Ok(None);
    };
    let path = dir.join(STATE_FILE);
    if !tokio::fs::try_exists(&path).await? {
        return Ok(None);
    }
    let json = tokio::fs::read_to_string(&path).await?;
    RkeFullState::from_json(&json).map(Some)
}

/// Fill in service versions the Kubernetes API does not report
pub fn merge_applied_versions(observed: &mut [ObservedNode], state: &RkeFullState) {
    for (name, versions) in state.applied_versions() {
        let Some(node) = observed.iter_mut().find(|n| n.name == name) else {
            continue;
        };
        for (component, version) in versions {
            node.versions.entry(component).or_insert(version);
        }
    }
}

/// Build observed nodes from raw Kubernetes objects
pub fn observe(nodes: &[KubeNode], pods: &[Pod]) -> Vec<ObservedNode> {
    let mut observed: Vec<ObservedNode> = nodes.iter().filter_map(observe_node).collect();

    for pod in pods {
        let Some((node_name, component, version)) = pod_component(pod) else {
            continue;
        };
        if let Some(node) = observed.iter_mut().find(|n| n.name == node_name) {
            // nodeInfo versions are authoritative for the node agents
            node.versions.entry(component).or_insert(version);
        }
    }

    observed
}

fn observe_node(node: &KubeNode) -> Option<ObservedNode> {
    let name = node.metadata.name.clone()?;
    let labels = node.metadata.labels.clone().unwrap_or_default();
    let status = node.status.as_ref();

    let address = status
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
        .map(|a| a.address.clone());

    let mut versions = BTreeMap::new();
    if let Some(info) = status.and_then(|s| s.node_info.as_ref()) {
        if !info.kubelet_version.is_empty() {
            versions.insert(Component::Kubernetes, info.kubelet_version.clone());
            versions.insert(Component::Kubelet, info.kubelet_version.clone());
        }
        if !info.kube_proxy_version.is_empty() {
            versions.insert(Component::Kubeproxy, info.kube_proxy_version.clone());
        }
    }

    Some(ObservedNode {
        name,
        address,
        roles: roles_from_labels(&labels),
        state: node_state(node),
        versions,
    })
}

/// Roles encoded as `node-role.kubernetes.io/<role>` labels
pub fn roles_from_labels(labels: &BTreeMap<String, String>) -> BTreeSet<NodeRole> {
    labels
        .iter()
        .filter(|(_, value)| value.is_empty() || value.as_str() == "true")
        .filter_map(|(key, _)| key.strip_prefix(ROLE_LABEL_PREFIX))
        .filter_map(|role| role.parse().ok())
        .collect()
}

fn node_state(node: &KubeNode) -> NodeState {
    if node.metadata.deletion_timestamp.is_some() {
        return NodeState::Removed;
    }
    if node.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false) {
        return NodeState::Draining;
    }
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True");
    if ready { NodeState::Ready } else { NodeState::Pending }
}

fn pod_component(pod: &Pod) -> Option<(String, Component, String)> {
    let labels = pod.metadata.labels.as_ref()?;
    let name = labels.get("component").or_else(|| labels.get("k8s-app"))?;
    let spec = pod.spec.as_ref()?;
    let node_name = spec.node_name.clone()?;
    let image = spec.containers.first()?.image.as_deref()?;
    let version = image_tag(image)?;
    Some((node_name, Component::from(name.as_str()), version.to_string()))
}

/// Tag portion of an image reference (`rancher/hyperkube:v1.17.4-rancher1` → `v1.17.4-rancher1`)
pub fn image_tag(image: &str) -> Option<&str> {
    let without_digest = image.split('@').next()?;
    let (repo, tag) = without_digest.rsplit_once(':')?;
    // a colon before the last slash is a registry port, not a tag
    if tag.contains('/') || repo.is_empty() {
        return None;
    }
    Some(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, NodeAddress, NodeCondition, NodeSpec as KubeNodeSpec, NodeStatus, NodeSystemInfo, PodSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn kube_node(name: &str, labels: &[(&str, &str)], ready: bool, kubelet: &str) -> KubeNode {
        KubeNode {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            spec: Some(KubeNodeSpec::default()),
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    address: "10.0.0.5".to_string(),
                    type_: "InternalIP".to_string(),
                }]),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                node_info: Some(NodeSystemInfo {
                    kubelet_version: kubelet.to_string(),
                    kube_proxy_version: kubelet.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    fn system_pod(component: &str, node: &str, image: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                labels: Some(BTreeMap::from([("component".to_string(), component.to_string())])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                containers: vec![Container {
                    name: component.to_string(),
                    image: Some(image.to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn test_roles_from_rke_and_kubeadm_labels() {
        let labels = BTreeMap::from([
            ("node-role.kubernetes.io/controlplane".to_string(), "true".to_string()),
            ("node-role.kubernetes.io/etcd".to_string(), "true".to_string()),
            ("node-role.kubernetes.io/ingress".to_string(), "true".to_string()),
            ("kubernetes.io/hostname".to_string(), "node-0".to_string()),
        ]);
        assert_eq!(roles_from_labels(&labels), BTreeSet::from([NodeRole::ControlPlane, NodeRole::Etcd]));

        let kubeadm = BTreeMap::from([("node-role.kubernetes.io/control-plane".to_string(), String::new())]);
        assert_eq!(roles_from_labels(&kubeadm), BTreeSet::from([NodeRole::ControlPlane]));
    }

    #[test]
    fn test_observe_node_versions_and_state() {
        let nodes = vec![
            kube_node("node-0", &[("node-role.kubernetes.io/etcd", "true")], true, "v1.16.8"),
            kube_node("node-1", &[("node-role.kubernetes.io/worker", "true")], false, "v1.16.8"),
        ];
        let pods = vec![
            system_pod("etcd", "node-0", "rancher/coreos-etcd:v3.3.15-rancher1"),
            system_pod("kube-scheduler", "node-0", "rancher/hyperkube:v1.16.8-rancher1"),
            system_pod("etcd", "node-missing", "rancher/coreos-etcd:v3.3.15-rancher1"),
        ];

        let observed = observe(&nodes, &pods);
        assert_eq!(observed.len(), 2);

        let master = &observed[0];
        assert_eq!(master.state, NodeState::Ready);
        assert_eq!(master.address.as_deref(), Some("10.0.0.5"));
        assert_eq!(master.version(&Component::Kubernetes), Some("v1.16.8"));
        assert_eq!(master.version(&Component::Etcd), Some("v3.3.15-rancher1"));
        assert_eq!(master.version(&Component::Scheduler), Some("v1.16.8-rancher1"));

        let worker = &observed[1];
        assert_eq!(worker.state, NodeState::Pending);
        assert_eq!(worker.version(&Component::Etcd), None);
    }

    #[test]
    fn test_rke_state_fills_control_plane_versions() {
        let state = RkeFullState::from_json(
            r#"{"currentState": {"rkeConfig": {
                "nodes": [{"address": "10.0.0.5", "hostnameOverride": "node-0", "role": ["controlplane", "etcd"]}],
                "services": {"scheduler": {"image": "rancher/hyperkube:v1.17.4-rancher1-3"}},
                "systemImages": {"etcd": "rancher/coreos-etcd:v3.4.3-rancher1", "kubernetes": "rancher/hyperkube:v1.16.8-rancher1-2"}
            }}}"#,
        )
        .unwrap();

        let nodes = vec![kube_node("node-0", &[("node-role.kubernetes.io/etcd", "true")], true, "v1.16.8")];
        let mut observed = observe(&nodes, &[]);
        assert_eq!(observed[0].version(&Component::Scheduler), None);

        merge_applied_versions(&mut observed, &state);
        let master = &observed[0];
        assert_eq!(master.version(&Component::Scheduler), Some("v1.17.4-rancher1-3"));
        assert_eq!(master.version(&Component::Etcd), Some("v3.4.3-rancher1"));
        assert_eq!(master.version(&Component::KubeController), Some("v1.16.8-rancher1-2"));
        // nodeInfo stays authoritative for the node agents
        assert_eq!(master.version(&Component::Kubernetes), Some("v1.16.8"));
    }

    #[tokio::test]
    async fn test_rke_state_read_beside_kubeconfig() {
        let dir = std::env::temp_dir().join("kube-inspector-rkestate-test");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let kubeconfig = dir.join("kube_config_cluster.yml");

        let _ = tokio::fs::remove_file(dir.join(STATE_FILE)).await;
        assert!(read_rke_state(&kubeconfig).await.unwrap().is_none());

        tokio::fs::write(dir.join(STATE_FILE), r#"{"currentState": {}}"#).await.unwrap();
        let state = read_rke_state(&kubeconfig).await.unwrap().unwrap();
        assert!(state.applied_versions().is_empty());
    }

    #[test]
    fn test_unschedulable_node_is_draining() {
        let mut node = kube_node("node-2", &[], true, "v1.17.4");
        node.spec = Some(KubeNodeSpec {
            unschedulable: Some(true),
            ..Default::default()
        });
        assert_eq!(node_state(&node), NodeState::Draining);
    }

    #[test]
    fn test_image_tag() {
        assert_eq!(image_tag("rancher/hyperkube:v1.17.4-rancher1"), Some("v1.17.4-rancher1"));
        assert_eq!(image_tag("registry:5000/rancher/hyperkube:v1.17.4"), Some("v1.17.4"));
        assert_eq!(image_tag("registry:5000/rancher/hyperkube"), None);
        assert_eq!(image_tag("coredns/coredns:1.6.5@sha256:abc"), Some("1.6.5"));
        assert_eq!(image_tag("busybox"), None);
    }
}
