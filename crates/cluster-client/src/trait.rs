//! Collaborator traits for mocking
//!
//! The orchestrator only ever sees these traits. Concrete adapters implement
//! them for real infrastructure, and tests use `MockCluster`.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::error::ClientError;
use cluster_model::{ClusterHandle, ClusterSpec, NetworkHealth, Node, NodeRequest, NodeState, ObservedNode};

/// Provisions and removes machines
#[async_trait::async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create one node per request. Readiness is reported later through
    /// `node_state`; returned nodes may still be `Pending`.
    async fn create_nodes(&self, requests: &[NodeRequest]) -> Result<Vec<Node>, ClientError>;

    /// Delete nodes. Deleting a node that is already gone is not an error.
    async fn delete_nodes(&self, nodes: &[Node]) -> Result<(), ClientError>;

    /// Look up a node by name
    async fn find_node(&self, name: &str) -> Result<Option<Node>, ClientError>;

    /// Current provisioning state of a node
    async fn node_state(&self, name: &str) -> Result<NodeState, ClientError>;
}

/// Applies a node set and component versions to a cluster
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Bring the cluster to exactly `nodes` running `spec.versions`.
    /// Nodes not in `nodes` are removed from the cluster.
    async fn create_or_update_cluster(&self, nodes: &[Node], spec: &ClusterSpec) -> Result<ClusterHandle, ClientError>;
}

/// Read-only view of a live cluster
#[async_trait::async_trait]
pub trait ClusterInspector: Send + Sync {
    /// Nodes as the cluster reports them. A cluster that does not exist yet
    /// reports no nodes.
    async fn observe_nodes(&self, handle: &ClusterHandle) -> Result<Vec<ObservedNode>, ClientError>;
}

/// Cross-node connectivity and DNS checks
#[async_trait::async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn probe(&self, nodes: &[ObservedNode]) -> Result<NetworkHealth, ClientError>;
}
