//! Mock collaborators for unit testing
//!
//! `MockCluster` simulates one cloud account plus the cluster running on it,
//! and implements every collaborator trait over that shared state so tests
//! can drive the orchestrator end to end without infrastructure.
//!
//! The mock is organized into domain-specific modules:
//! - `cloud.rs` - machine creation, readiness and deletion
//! - `cluster.rs` - cluster membership and version rollouts
//! - `inspector.rs` - observation and network probing
//!
//! Behaviour knobs:
//! - `with_ready_after(n)`: new machines report `Pending` for `n` state polls
//! - `with_rollout_lag(n)`: pushed versions appear after `n` observations
//! - `fail_next(point, times, transient)`: inject collaborator failures
//!
//! Every mutation is appended to an event log so tests can assert ordering.

mod cloud;
mod cluster;
mod inspector;

use crate::collaborators::{CloudProvider, ClusterClient, ClusterInspector, NetworkProbe};
use crate::error::ClientError;
use cluster_model::{
    ClusterHandle, ClusterSpec, Component, NetworkHealth, Node, NodeRequest, NodeRole, NodeState, ObservedNode,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Collaborator call that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailPoint {
    CreateNodes,
    DeleteNodes,
    NodeState,
    UpdateCluster,
    Observe,
    Probe,
}

/// A mutation recorded by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    NodeCreated(String),
    NodeReady(String),
    ClusterUpdated {
        nodes: Vec<String>,
        versions: BTreeMap<Component, String>,
    },
    NodeDeleted(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Machine {
    pub(crate) node: Node,
    pub(crate) polls_until_ready: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub(crate) roles: BTreeSet<NodeRole>,
    pub(crate) versions: BTreeMap<Component, String>,
    /// Versions pushed but not yet rolled out, with observations remaining
    pub(crate) pending: Option<(BTreeMap<Component, String>, u32)>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Failure {
    pub(crate) remaining: u32,
    pub(crate) transient: bool,
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) machines: BTreeMap<String, Machine>,
    pub(crate) cluster_id: Option<String>,
    pub(crate) members: BTreeMap<String, Member>,
    pub(crate) network: NetworkHealth,
    pub(crate) failures: BTreeMap<FailPoint, Failure>,
    pub(crate) events: Vec<MockEvent>,
    pub(crate) calls: BTreeMap<FailPoint, u32>,
    pub(crate) ready_after: u32,
    pub(crate) rollout_lag: u32,
    pub(crate) next_address: u32,
}

impl State {
    /// Count the call and consume an injected failure, if any
    pub(crate) fn enter(&mut self, point: FailPoint) -> Result<(), ClientError> {
        *self.calls.entry(point).or_default() += 1;
        let Some(failure) = self.failures.get_mut(&point) else {
            return Ok(());
        };
        if failure.remaining == 0 {
            return Ok(());
        }
        failure.remaining -= 1;
        let message = format!("injected {:?} failure", point);
        if failure.transient {
            Err(ClientError::Transient(message))
        } else {
            Err(ClientError::Provider(message))
        }
    }
}

/// In-memory cloud + cluster for tests
#[derive(Clone, Debug, Default)]
pub struct MockCluster {
    pub(crate) state: Arc<Mutex<State>>,
}

impl MockCluster {
    /// Create an empty mock: no machines, no cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// New machines stay `Pending` for `polls` calls to `node_state`
    pub fn with_ready_after(self, polls: u32) -> Self {
        self.lock().ready_after = polls;
        self
    }

    /// Pushed versions only show up after `observations` calls to `observe_nodes`
    pub fn with_rollout_lag(self, observations: u32) -> Self {
        self.set_rollout_lag(observations);
        self
    }

    /// Change the rollout lag for versions pushed from now on
    pub fn set_rollout_lag(&self, observations: u32) {
        self.lock().rollout_lag = observations;
    }

    /// Make the next `times` calls at `point` fail
    pub fn fail_next(&self, point: FailPoint, times: u32, transient: bool) {
        self.lock().failures.insert(
            point,
            Failure {
                remaining: times,
                transient,
            },
        );
    }

    /// Replace the network health the probe reports
    pub fn set_network(&self, network: NetworkHealth) {
        self.lock().network = network;
    }

    /// Overwrite the running version of a component on one node
    pub fn set_running_version(&self, node: &str, component: impl Into<Component>, version: impl Into<String>) {
        if let Some(member) = self.lock().members.get_mut(node) {
            member.versions.insert(component.into(), version.into());
        }
    }

    /// Mutations recorded so far
    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    /// Index of the first event matching `predicate`
    pub fn position(&self, predicate: impl Fn(&MockEvent) -> bool) -> Option<usize> {
        self.lock().events.iter().position(predicate)
    }

    /// Number of calls made at `point`, including failed ones
    pub fn calls(&self, point: FailPoint) -> u32 {
        self.lock().calls.get(&point).copied().unwrap_or_default()
    }

    /// Names of machines currently provisioned
    pub fn machine_names(&self) -> Vec<String> {
        self.lock().machines.keys().cloned().collect()
    }

    /// Names of nodes currently in the cluster
    pub fn member_names(&self) -> Vec<String> {
        self.lock().members.keys().cloned().collect()
    }

    /// Handle for the simulated cluster named `cluster_id`
    pub fn handle(&self, cluster_id: &str) -> ClusterHandle {
        ClusterHandle::new(cluster_id)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl CloudProvider for MockCluster {
    async fn create_nodes(&self, requests: &[NodeRequest]) -> Result<Vec<Node>, ClientError> {
        cloud::create_nodes(self, requests)
    }

    async fn delete_nodes(&self, nodes: &[Node]) -> Result<(), ClientError> {
        cloud::delete_nodes(self, nodes)
    }

    async fn find_node(&self, name: &str) -> Result<Option<Node>, ClientError> {
        Ok(cloud::find_node(self, name))
    }

    async fn node_state(&self, name: &str) -> Result<NodeState, ClientError> {
        cloud::node_state(self, name)
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockCluster {
    async fn create_or_update_cluster(&self, nodes: &[Node], spec: &ClusterSpec) -> Result<ClusterHandle, ClientError> {
        cluster::create_or_update_cluster(self, nodes, spec)
    }
}

#[async_trait::async_trait]
impl ClusterInspector for MockCluster {
    async fn observe_nodes(&self, handle: &ClusterHandle) -> Result<Vec<ObservedNode>, ClientError> {
        inspector::observe_nodes(self, handle)
    }
}

#[async_trait::async_trait]
impl NetworkProbe for MockCluster {
    async fn probe(&self, nodes: &[ObservedNode]) -> Result<NetworkHealth, ClientError> {
        inspector::probe(self, nodes)
    }
}
