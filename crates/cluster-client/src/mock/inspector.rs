//! Observation operations for MockCluster
//!
//! Handles node observation (advancing pending rollouts) and network probing

use super::{FailPoint, MockCluster};
use crate::error::ClientError;
use cluster_model::{ClusterHandle, NetworkHealth, NodeState, ObservedNode};

pub fn observe_nodes(client: &MockCluster, handle: &ClusterHandle) -> Result<Vec<ObservedNode>, ClientError> {
    let mut guard = client.lock();
    let state = &mut *guard;
    state.enter(FailPoint::Observe)?;

    if state.cluster_id.as_deref() != Some(handle.cluster_id.as_str()) {
        return Ok(Vec::new());
    }

    let mut observed = Vec::with_capacity(state.members.len());
    for (name, member) in state.members.iter_mut() {
        if let Some((targets, remaining)) = member.pending.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                let targets = std::mem::take(targets);
                member.versions.extend(targets);
                member.pending = None;
            }
        }

        let machine = state.machines.get(name);
        observed.push(ObservedNode {
            name: name.clone(),
            address: machine.map(|m| m.node.address.clone()),
            roles: member.roles.clone(),
            state: machine.map_or(NodeState::Removed, |m| m.node.state),
            versions: member.versions.clone(),
        });
    }
    Ok(observed)
}

pub fn probe(client: &MockCluster, _nodes: &[ObservedNode]) -> Result<NetworkHealth, ClientError> {
    let mut state = client.lock();
    state.enter(FailPoint::Probe)?;
    Ok(state.network.clone())
}
