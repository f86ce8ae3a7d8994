//! Fixed-inventory cloud provider
//!
//! Bare-metal and lab environments have no API that creates machines; they
//! have a list of hosts. `InventoryProvider` treats that list as the cloud:
//! "creating" a node assigns a free host to it, "deleting" releases it.
//!
//! Inventory file format:
//!
//! ```yaml
//! - name: node-0
//!   address: 10.0.0.10
//!   user: ubuntu
//!   ssh_key_path: /home/ci/.ssh/id_rsa
//! - name: spare-1
//!   address: 10.0.0.11
//! ```

use crate::collaborators::CloudProvider;
use crate::error::ClientError;
use cluster_model::{Node, NodeRequest, NodeState};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Clone)]
struct Machine {
    node: Node,
    assigned: bool,
}

/// Cloud provider over a fixed list of hosts
#[derive(Debug)]
pub struct InventoryProvider {
    machines: Mutex<Vec<Machine>>,
}

impl InventoryProvider {
    pub fn new(hosts: Vec<Node>) -> Self {
        let machines = hosts
            .into_iter()
            .map(|mut node| {
                node.state = NodeState::Pending;
                Machine { node, assigned: false }
            })
            .collect();
        Self {
            machines: Mutex::new(machines),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ClientError> {
        let hosts: Vec<Node> = serde_yaml::from_str(yaml)?;
        Ok(Self::new(hosts))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    fn machines(&self) -> Result<MutexGuard<'_, Vec<Machine>>, ClientError> {
        self.machines
            .lock()
            .map_err(|_| ClientError::Provider("inventory lock poisoned".to_string()))
    }

    /// Number of hosts not assigned to any node
    pub fn free_hosts(&self) -> Result<usize, ClientError> {
        Ok(self.machines()?.iter().filter(|m| !m.assigned).count())
    }

    /// Mark hosts that already run as cluster members as assigned and ready
    ///
    /// Returns how many of `names` matched an inventory host.
    pub fn adopt<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<usize, ClientError> {
        let mut machines = self.machines()?;
        let mut adopted = 0;
        for name in names {
            if let Some(machine) = machines.iter_mut().find(|m| m.node.name == name) {
                machine.assigned = true;
                machine.node.state = NodeState::Ready;
                adopted += 1;
            }
        }
        Ok(adopted)
    }
}

#[async_trait::async_trait]
impl CloudProvider for InventoryProvider {
    async fn create_nodes(&self, requests: &[NodeRequest]) -> Result<Vec<Node>, ClientError> {
        let mut machines = self.machines()?;
        let mut created = Vec::with_capacity(requests.len());

        for request in requests {
            // Prefer the host listed under the requested name, else any free host
            let index = machines
                .iter()
                .position(|m| !m.assigned && m.node.name == request.name)
                .or_else(|| {
                    machines
                        .iter()
                        .position(|m| !m.assigned && !requests.iter().any(|r| r.name == m.node.name))
                })
                .ok_or_else(|| ClientError::Provider(format!("No free inventory host for node {}", request.name)))?;

            let machine = &mut machines[index];
            machine.assigned = true;
            machine.node.name = request.name.clone();
            machine.node.roles = request.roles.clone();
            machine.node.state = NodeState::Ready;
            info!("Assigned inventory host {} to node {}", machine.node.address, request.name);
            created.push(machine.node.clone());
        }

        Ok(created)
    }

    async fn delete_nodes(&self, nodes: &[Node]) -> Result<(), ClientError> {
        let mut machines = self.machines()?;
        for node in nodes {
            if let Some(machine) = machines.iter_mut().find(|m| m.assigned && m.node.name == node.name) {
                machine.assigned = false;
                machine.node.state = NodeState::Removed;
                info!("Released inventory host {} from node {}", machine.node.address, node.name);
            }
        }
        Ok(())
    }

    async fn find_node(&self, name: &str) -> Result<Option<Node>, ClientError> {
        Ok(self
            .machines()?
            .iter()
            .find(|m| m.assigned && m.node.name == name)
            .map(|m| m.node.clone()))
    }

    async fn node_state(&self, name: &str) -> Result<NodeState, ClientError> {
        self.find_node(name)
            .await?
            .map(|n| n.state)
            .ok_or_else(|| ClientError::NotFound(format!("Node {} not in inventory", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_model::NodeRole;

    const INVENTORY: &str = r#"
- name: node-0
  address: 10.0.0.10
  user: ubuntu
- name: spare-1
  address: 10.0.0.11
"#;

    #[tokio::test]
    async fn test_assigns_named_host_first() {
        let provider = InventoryProvider::from_yaml(INVENTORY).unwrap();
        let nodes = provider
            .create_nodes(&[NodeRequest::new("node-0", [NodeRole::Etcd])])
            .await
            .unwrap();
        assert_eq!(nodes[0].address, "10.0.0.10");
        assert_eq!(nodes[0].state, NodeState::Ready);
        assert_eq!(provider.free_hosts().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_assigns_spare_host_and_renames() {
        let provider = InventoryProvider::from_yaml(INVENTORY).unwrap();
        provider
            .create_nodes(&[NodeRequest::new("node-0", [NodeRole::Etcd])])
            .await
            .unwrap();
        let nodes = provider
            .create_nodes(&[NodeRequest::new("node-3", [NodeRole::Worker])])
            .await
            .unwrap();
        assert_eq!(nodes[0].name, "node-3");
        assert_eq!(nodes[0].address, "10.0.0.11");
        assert_eq!(provider.node_state("node-3").await.unwrap(), NodeState::Ready);
    }

    #[tokio::test]
    async fn test_exhausted_inventory_is_permanent_error() {
        let provider = InventoryProvider::from_yaml(INVENTORY).unwrap();
        let err = provider
            .create_nodes(&[
                NodeRequest::new("a", [NodeRole::Worker]),
                NodeRequest::new("b", [NodeRole::Worker]),
                NodeRequest::new("c", [NodeRole::Worker]),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Provider(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_adopt_existing_members() {
        let provider = InventoryProvider::from_yaml(INVENTORY).unwrap();
        assert_eq!(provider.adopt(["node-0", "unknown"]).unwrap(), 1);

        let node = provider.find_node("node-0").await.unwrap().unwrap();
        assert_eq!(node.state, NodeState::Ready);
        assert_eq!(provider.free_hosts().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_releases_host() {
        let provider = InventoryProvider::from_yaml(INVENTORY).unwrap();
        let nodes = provider
            .create_nodes(&[NodeRequest::new("node-0", [NodeRole::Worker])])
            .await
            .unwrap();
        provider.delete_nodes(&nodes).await.unwrap();
        assert_eq!(provider.free_hosts().unwrap(), 2);
        assert!(provider.find_node("node-0").await.unwrap().is_none());
        assert!(matches!(provider.node_state("node-0").await, Err(ClientError::NotFound(_))));
    }
}
