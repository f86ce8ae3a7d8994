//! Cluster operations for MockCluster
//!
//! Handles membership changes and version pushes

use super::{FailPoint, Member, MockCluster, MockEvent};
use crate::error::ClientError;
use cluster_model::{ClusterHandle, ClusterSpec, Component, Node, NodeState};
use std::collections::BTreeMap;

pub fn create_or_update_cluster(client: &MockCluster, nodes: &[Node], spec: &ClusterSpec) -> Result<ClusterHandle, ClientError> {
    let mut guard = client.lock();
    let state = &mut *guard;
    state.enter(FailPoint::UpdateCluster)?;

    if let Some(existing) = state.cluster_id.as_deref() {
        if existing != spec.name {
            return Err(ClientError::Provider(format!(
                "Mock hosts cluster {}, cannot update {}",
                existing, spec.name
            )));
        }
    }

    for node in nodes {
        let ready = state
            .machines
            .get(&node.name)
            .is_some_and(|m| m.node.state == NodeState::Ready);
        if !ready {
            return Err(ClientError::Provider(format!("Node {} is not a ready machine", node.name)));
        }
    }

    let lag = state.rollout_lag;
    let mut members = BTreeMap::new();
    for node in nodes {
        let roles = spec.node(&node.name).map_or_else(|| node.roles.clone(), |n| n.roles.clone());
        let mut member = state.members.remove(&node.name).unwrap_or(Member {
            roles: roles.clone(),
            versions: BTreeMap::new(),
            pending: None,
        });
        member.roles = roles;

        // Components the pushed config omits fall back to the tool's defaults,
        // which the mock reports as unknown
        member.versions.retain(|component, _| spec.versions.contains_key(component));
        if let Some((pending, _)) = member.pending.as_mut() {
            pending.retain(|component, _| spec.versions.contains_key(component));
        }

        let targets: BTreeMap<Component, String> = spec
            .versions
            .iter()
            .filter(|(component, _)| component.runs_on(&member.roles))
            .filter(|(component, version)| member.versions.get(*component) != Some(*version))
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect();

        if !targets.is_empty() {
            if lag == 0 {
                member.versions.extend(targets);
                member.pending = None;
            } else {
                member.pending = Some((targets, lag));
            }
        }
        members.insert(node.name.clone(), member);
    }

    state.members = members;
    state.cluster_id = Some(spec.name.clone());
    state.events.push(MockEvent::ClusterUpdated {
        nodes: nodes.iter().map(|n| n.name.clone()).collect(),
        versions: spec.versions.clone(),
    });

    Ok(ClusterHandle::new(spec.name.clone()))
}
