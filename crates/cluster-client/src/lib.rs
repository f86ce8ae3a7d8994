//! Cluster Collaborator Clients
//!
//! Contracts for everything the upgrade orchestrator talks to, plus concrete
//! adapters for each of them:
//!
//! - **Cloud provider** (`CloudProvider`): creates, finds and deletes nodes.
//!   [`InventoryProvider`] hands out machines from a fixed inventory.
//! - **Cluster client** (`ClusterClient`): pushes a node set and component
//!   versions to the cluster. [`RkeCliClient`] drives `rke up`.
//! - **Cluster inspector** (`ClusterInspector`): read-only view of node roles,
//!   readiness and running versions. [`KubeInspector`] reads the Kubernetes API
//!   and the RKE state file.
//! - **Network probe** (`NetworkProbe`): connectivity and DNS health.
//!   [`HttpNetworkProbe`] checks node health endpoints and name resolution.
//!
//! With the `test-util` feature, [`MockCluster`] implements all four traits
//! over one in-memory simulated cluster.

pub mod error;
pub mod inventory;
pub mod kube_inspector;
pub mod probe;
pub mod rke;
pub mod rkestate;
#[path = "trait.rs"]
pub mod collaborators;
#[cfg(feature = "test-util")]
pub mod mock;

pub use collaborators::{CloudProvider, ClusterClient, ClusterInspector, NetworkProbe};
pub use error::ClientError;
pub use inventory::InventoryProvider;
pub use kube_inspector::KubeInspector;
pub use probe::HttpNetworkProbe;
pub use rke::{RkeCliClient, RkeConfig};
#[cfg(feature = "test-util")]
pub use mock::{FailPoint, MockCluster, MockEvent};
