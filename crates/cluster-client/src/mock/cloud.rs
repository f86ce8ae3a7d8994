//! Cloud operations for MockCluster
//!
//! Handles machine creation, readiness polling and deletion

use super::{FailPoint, Machine, MockCluster, MockEvent};
use crate::error::ClientError;
use cluster_model::{Node, NodeRequest, NodeState};

pub fn create_nodes(client: &MockCluster, requests: &[NodeRequest]) -> Result<Vec<Node>, ClientError> {
    let mut state = client.lock();
    state.enter(FailPoint::CreateNodes)?;

    if let Some(existing) = requests.iter().find(|r| state.machines.contains_key(&r.name)) {
        return Err(ClientError::Provider(format!("Node {} already exists", existing.name)));
    }

    let mut created = Vec::with_capacity(requests.len());
    for request in requests {
        state.next_address += 1;
        let ready_after = state.ready_after;
        let node = Node {
            name: request.name.clone(),
            address: format!("10.0.0.{}", state.next_address),
            roles: request.roles.clone(),
            state: if ready_after == 0 { NodeState::Ready } else { NodeState::Pending },
            user: Some("ubuntu".to_string()),
            ssh_key_path: None,
        };
        state.machines.insert(
            request.name.clone(),
            Machine {
                node: node.clone(),
                polls_until_ready: ready_after,
            },
        );
        state.events.push(MockEvent::NodeCreated(request.name.clone()));
        if ready_after == 0 {
            state.events.push(MockEvent::NodeReady(request.name.clone()));
        }
        created.push(node);
    }
    Ok(created)
}

pub fn delete_nodes(client: &MockCluster, nodes: &[Node]) -> Result<(), ClientError> {
    let mut state = client.lock();
    state.enter(FailPoint::DeleteNodes)?;
    for node in nodes {
        if state.machines.remove(&node.name).is_some() {
            state.members.remove(&node.name);
            state.events.push(MockEvent::NodeDeleted(node.name.clone()));
        }
    }
    Ok(())
}

pub fn find_node(client: &MockCluster, name: &str) -> Option<Node> {
    client.lock().machines.get(name).map(|m| m.node.clone())
}

pub fn node_state(client: &MockCluster, name: &str) -> Result<NodeState, ClientError> {
    let mut guard = client.lock();
    let state = &mut *guard;
    state.enter(FailPoint::NodeState)?;

    let machine = state
        .machines
        .get_mut(name)
        .ok_or_else(|| ClientError::NotFound(format!("Node {} not found", name)))?;

    if machine.node.state == NodeState::Pending {
        machine.polls_until_ready = machine.polls_until_ready.saturating_sub(1);
        if machine.polls_until_ready == 0 {
            machine.node.state = NodeState::Ready;
            state.events.push(MockEvent::NodeReady(name.to_string()));
            return Ok(NodeState::Ready);
        }
    }
    Ok(machine.node.state)
}
