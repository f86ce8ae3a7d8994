//! RKE state file
//!
//! RKE runs etcd and the control-plane services as host containers rather
//! than pods, so the Kubernetes API never reports their images. After every
//! successful `rke up` the tool records the configuration it applied in
//! `cluster.rkestate` next to `cluster.yml`; the `currentState` section of that
//! file is where those versions are read from.

use crate::error::ClientError;
use crate::kube_inspector::image_tag;
use cluster_model::{Component, NodeRole};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// File name RKE derives from `cluster.yml`
pub const STATE_FILE: &str = "cluster.rkestate";

/// The parts of `cluster.rkestate` the inspector reads
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RkeFullState {
    #[serde(default)]
    pub current_state: RkeState,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RkeState {
    /// Absent until the first successful `rke up`
    #[serde(default)]
    pub rke_config: Option<AppliedConfig>,
}

/// Cluster configuration as RKE last applied it
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedConfig {
    #[serde(default)]
    pub nodes: Vec<AppliedNode>,
    #[serde(default)]
    pub services: AppliedServices,
    #[serde(default)]
    pub system_images: AppliedImages,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedNode {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub hostname_override: String,
    #[serde(default)]
    pub role: Vec<String>,
}

impl AppliedNode {
    /// Node name as the cluster reports it
    pub fn name(&self) -> &str {
        if self.hostname_override.is_empty() {
            &self.address
        } else {
            &self.hostname_override
        }
    }
}

/// Per-service image overrides; an empty image means the system image
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedServices {
    #[serde(default)]
    pub etcd: AppliedService,
    #[serde(default)]
    pub kube_api: AppliedService,
    #[serde(default)]
    pub kube_controller: AppliedService,
    #[serde(default)]
    pub scheduler: AppliedService,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AppliedService {
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AppliedImages {
    #[serde(default)]
    pub etcd: String,
    #[serde(default)]
    pub kubernetes: String,
}

impl RkeFullState {
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Etcd and control-plane service versions per node name
    ///
    /// Only components the node's roles run are listed; services whose image
    /// has no tag are skipped.
    pub fn applied_versions(&self) -> BTreeMap<String, BTreeMap<Component, String>> {
        let Some(config) = self.current_state.rke_config.as_ref() else {
            return BTreeMap::new();
        };

        let services = [
            (Component::Etcd, &config.services.etcd, &config.system_images.etcd),
            (Component::KubeApi, &config.services.kube_api, &config.system_images.kubernetes),
            (Component::KubeController, &config.services.kube_controller, &config.system_images.kubernetes),
            (Component::Scheduler, &config.services.scheduler, &config.system_images.kubernetes),
        ];

        let mut applied = BTreeMap::new();
        for node in &config.nodes {
            let roles: BTreeSet<NodeRole> = node.role.iter().filter_map(|r| r.parse().ok()).collect();
            let mut versions = BTreeMap::new();
            for (component, service, system_image) in &services {
                if !component.runs_on(&roles) {
                    continue;
                }
                let image: &str = if service.image.is_empty() { system_image } else { &service.image };
                if let Some(tag) = image_tag(image) {
                    versions.insert(component.clone(), tag.to_string());
                }
            }
            if !versions.is_empty() {
                applied.insert(node.name().to_string(), versions);
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATE: &str = r#"{
        "desiredState": {},
        "currentState": {
            "rkeConfig": {
                "nodes": [
                    {"address": "10.0.0.1", "hostnameOverride": "node-0", "user": "ubuntu", "role": ["controlplane", "etcd"]},
                    {"address": "10.0.0.2", "role": ["worker"]}
                ],
                "services": {
                    "etcd": {"image": ""},
                    "scheduler": {"image": "rancher/hyperkube:v1.17.4-rancher1-3"}
                },
                "systemImages": {
                    "etcd": "rancher/coreos-etcd:v3.4.3-rancher1",
                    "kubernetes": "rancher/hyperkube:v1.16.8-rancher1-2",
                    "coredns": "rancher/coredns-coredns:1.6.5"
                }
            },
            "certificatesBundle": {}
        }
    }"#;

    #[test]
    fn test_control_plane_versions_from_current_state() {
        let state = RkeFullState::from_json(STATE).unwrap();
        let applied = state.applied_versions();

        let master = &applied["node-0"];
        assert_eq!(master.get(&Component::Etcd).map(String::as_str), Some("v3.4.3-rancher1"));
        assert_eq!(master.get(&Component::KubeApi).map(String::as_str), Some("v1.16.8-rancher1-2"));
        assert_eq!(master.get(&Component::Scheduler).map(String::as_str), Some("v1.17.4-rancher1-3"));

        // Workers run none of these services
        assert!(!applied.contains_key("10.0.0.2"));
    }

    #[test]
    fn test_state_before_first_up_is_empty() {
        let state = RkeFullState::from_json(r#"{"desiredState": {"rkeConfig": {"nodes": []}}}"#).unwrap();
        assert!(state.applied_versions().is_empty());
    }

    #[test]
    fn test_malformed_state_is_json_error() {
        let err = RkeFullState::from_json("{not json").unwrap_err();
        assert!(matches!(err, ClientError::Json(_)));
        assert!(!err.is_transient());
    }
}
