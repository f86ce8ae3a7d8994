//! Cluster Model
//!
//! Typed representation of a cluster topology for upgrade orchestration:
//! the desired spec a caller submits, the state observed on the live cluster,
//! and the node records owned by the cloud provider.
//!
//! # Example
//!
//! ```
//! use cluster_model::{ClusterSpec, Component, NodeRole, NodeSpec};
//!
//! let spec = ClusterSpec::new("upgrade-1")
//!     .with_node(NodeSpec::new("node-0", [NodeRole::ControlPlane, NodeRole::Etcd]))
//!     .with_node(NodeSpec::new("node-1", [NodeRole::Worker]))
//!     .with_version(Component::Kubernetes, "v1.17.4-rancher1-3");
//!
//! assert_eq!(spec.nodes_with_role(NodeRole::Etcd).count(), 1);
//! ```

pub mod component;
pub mod error;
pub mod node;
pub mod role;
pub mod spec;
pub mod state;
pub mod version;

pub use component::Component;
pub use error::ModelError;
pub use node::{Node, NodeRequest};
pub use role::{NodeRole, NodeState};
pub use spec::{ClusterSpec, NodeSpec};
pub use state::{ClusterHandle, ClusterState, NetworkHealth, ObservedNode};
pub use version::versions_match;
