//! RKE command-line cluster client
//!
//! Renders an RKE `cluster.yml` for the requested node set and component
//! versions and runs `rke up` against it. Every cluster gets its own working
//! directory under the configured root so the RKE state file and the
//! generated kubeconfig survive between calls.

use crate::collaborators::ClusterClient;
use crate::error::ClientError;
use cluster_model::{ClusterHandle, ClusterSpec, Component, Node, NodeRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const CONFIG_FILE: &str = "cluster.yml";
const KUBECONFIG_FILE: &str = "kube_config_cluster.yml";
const HYPERKUBE_REPO: &str = "rancher/hyperkube";
const ETCD_REPO: &str = "rancher/coreos-etcd";
const STDERR_TAIL: usize = 2000;

/// One node entry in `cluster.yml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RkeNode {
    pub address: String,
    pub hostname_override: String,
    pub user: String,
    pub role: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<String>,
}

/// Per-service image override
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RkeService {
    pub image: String,
}

/// The subset of RKE's `cluster.yml` the orchestrator manages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RkeConfig {
    pub cluster_name: String,
    pub nodes: Vec<RkeNode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub system_images: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, RkeService>,
}

impl RkeConfig {
    /// Render the config for `nodes` running `spec.versions`
    ///
    /// Roles come from the spec when it lists the node, otherwise from the
    /// provider's record.
    pub fn render(nodes: &[Node], spec: &ClusterSpec, default_user: &str) -> Self {
        let nodes = nodes
            .iter()
            .map(|node| {
                let roles = spec.node(&node.name).map_or(&node.roles, |n| &n.roles);
                RkeNode {
                    address: node.address.clone(),
                    hostname_override: node.name.clone(),
                    user: node.user.clone().unwrap_or_else(|| default_user.to_string()),
                    role: roles.iter().map(NodeRole::as_str).map(str::to_string).collect(),
                    ssh_key_path: node.ssh_key_path.clone(),
                }
            })
            .collect();

        let mut system_images = BTreeMap::new();
        let mut services = BTreeMap::new();
        for (component, version) in &spec.versions {
            match component {
                Component::Kubernetes => {
                    system_images.insert("kubernetes".to_string(), format!("{}:{}", HYPERKUBE_REPO, version));
                }
                Component::Etcd => {
                    system_images.insert("etcd".to_string(), format!("{}:{}", ETCD_REPO, version));
                }
                Component::KubeApi
                | Component::KubeController
                | Component::Scheduler
                | Component::Kubelet
                | Component::Kubeproxy => {
                    services.insert(
                        component.name().to_string(),
                        RkeService {
                            image: format!("{}:{}", HYPERKUBE_REPO, version),
                        },
                    );
                }
                Component::Addon(name) => {
                    system_images.insert(name.clone(), format!("rancher/{}:{}", name, version));
                }
            }
        }

        Self {
            cluster_name: spec.name.clone(),
            nodes,
            system_images,
            services,
        }
    }
}

/// Cluster client that shells out to the `rke` binary
#[derive(Debug, Clone)]
pub struct RkeCliClient {
    binary: PathBuf,
    workdir: PathBuf,
    command_timeout: Duration,
    default_user: String,
}

impl RkeCliClient {
    pub fn new(binary: impl Into<PathBuf>, workdir: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            workdir: workdir.into(),
            command_timeout,
            default_user: "ubuntu".to_string(),
        }
    }

    pub fn with_default_user(mut self, user: impl Into<String>) -> Self {
        self.default_user = user.into();
        self
    }

    /// Directory holding `cluster.yml` and the RKE state for a cluster
    pub fn cluster_dir(&self, cluster_id: &str) -> PathBuf {
        self.workdir.join(cluster_id)
    }

    /// Handle for a cluster managed by this client, whether or not it exists yet
    pub fn handle(&self, cluster_id: &str) -> ClusterHandle {
        ClusterHandle {
            cluster_id: cluster_id.to_string(),
            kubeconfig: Some(self.cluster_dir(cluster_id).join(KUBECONFIG_FILE).display().to_string()),
        }
    }
}

#[async_trait::async_trait]
impl ClusterClient for RkeCliClient {
    async fn create_or_update_cluster(&self, nodes: &[Node], spec: &ClusterSpec) -> Result<ClusterHandle, ClientError> {
        let dir = self.cluster_dir(&spec.name);
        tokio::fs::create_dir_all(&dir).await?;

        let config = RkeConfig::render(nodes, spec, &self.default_user);
        let yaml = serde_yaml::to_string(&config)?;
        tokio::fs::write(dir.join(CONFIG_FILE), yaml).await?;
        debug!("Wrote {} for cluster {} ({} nodes)", CONFIG_FILE, spec.name, nodes.len());

        let command = format!("{} up --config {}", self.binary.display(), CONFIG_FILE);
        info!("Running `{}` in {}", command, dir.display());

        let child = Command::new(&self.binary)
            .arg("up")
            .arg("--config")
            .arg(CONFIG_FILE)
            .current_dir(&dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| ClientError::Timeout(format!("`{}` exceeded {:?}", command, self.command_timeout)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr.get(start..).unwrap_or(&stderr).to_string();
            return Err(ClientError::CommandFailed {
                command,
                status: output.status.code(),
                stderr: tail,
            });
        }

        info!("Cluster {} is up", spec.name);
        Ok(self.handle(&spec.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_model::{NodeSpec, NodeState};
    use std::collections::BTreeSet;

    fn node(name: &str, address: &str) -> Node {
        Node {
            name: name.to_string(),
            address: address.to_string(),
            roles: BTreeSet::from([NodeRole::Worker]),
            state: NodeState::Ready,
            user: None,
            ssh_key_path: Some("~/.ssh/id_rsa".to_string()),
        }
    }

    #[test]
    fn test_render_roles_and_images() {
        let spec = ClusterSpec::new("upgrade-4")
            .with_node(NodeSpec::new("node-0", [NodeRole::ControlPlane, NodeRole::Etcd]))
            .with_node(NodeSpec::new("node-1", [NodeRole::Worker]))
            .with_version(Component::Kubernetes, "v1.16.8-rancher1-3")
            .with_version(Component::Scheduler, "v1.17.4-rancher1-3");

        let config = RkeConfig::render(&[node("node-0", "10.0.0.1"), node("node-1", "10.0.0.2")], &spec, "ubuntu");

        assert_eq!(config.cluster_name, "upgrade-4");
        assert_eq!(config.nodes[0].role, vec!["controlplane", "etcd"]);
        assert_eq!(config.nodes[0].hostname_override, "node-0");
        assert_eq!(config.nodes[1].user, "ubuntu");
        assert_eq!(
            config.system_images.get("kubernetes").map(String::as_str),
            Some("rancher/hyperkube:v1.16.8-rancher1-3")
        );
        assert_eq!(
            config.services.get("scheduler").map(|s| s.image.as_str()),
            Some("rancher/hyperkube:v1.17.4-rancher1-3")
        );
    }

    #[test]
    fn test_render_falls_back_to_provider_roles() {
        let spec = ClusterSpec::new("c1");
        let config = RkeConfig::render(&[node("node-9", "10.0.0.9")], &spec, "rancher");
        assert_eq!(config.nodes[0].role, vec!["worker"]);
        assert!(config.system_images.is_empty());
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("services"));
    }

    #[test]
    fn test_handle_points_at_cluster_kubeconfig() {
        let client = RkeCliClient::new("rke", "/var/lib/upgrades", Duration::from_secs(60));
        let handle = client.handle("upgrade-1");
        assert_eq!(handle.kubeconfig.as_deref(), Some("/var/lib/upgrades/upgrade-1/kube_config_cluster.yml"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let dir = std::env::temp_dir().join("rke-cli-client-test");
        let client = RkeCliClient::new("/nonexistent/rke", &dir, Duration::from_secs(5));
        let spec = ClusterSpec::new("missing-binary");
        let err = client.create_or_update_cluster(&[], &spec).await.unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
        assert!(!err.is_transient());
    }
}
