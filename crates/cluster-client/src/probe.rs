//! HTTP/DNS network probe

use crate::collaborators::NetworkProbe;
use crate::error::ClientError;
use cluster_model::{NetworkHealth, ObservedNode};
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, warn};

/// Checks that every node answers on its health port and that its name resolves
///
/// Any HTTP response (including 401/403 from an authenticated kubelet)
/// counts as reachable; only transport failures mark a node unreachable.
#[derive(Debug, Clone)]
pub struct HttpNetworkProbe {
    client: reqwest::Client,
    port: u16,
    path: String,
}

impl HttpNetworkProbe {
    pub fn new(port: u16, path: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            // kubelets serve self-signed certificates
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            client,
            port,
            path: path.into(),
        })
    }

    fn health_url(&self, host: &str) -> String {
        format!("https://{}:{}{}", host, self.port, self.path)
    }

    async fn reachable(&self, node: &ObservedNode) -> bool {
        let host = node.address.as_deref().unwrap_or(&node.name);
        let url = self.health_url(host);
        match self.client.get(&url).send().await {
            Ok(response) => {
                debug!("{} answered {} on {}", node.name, response.status(), url);
                true
            }
            Err(e) => {
                warn!("{} unreachable at {}: {}", node.name, url, e);
                false
            }
        }
    }

    async fn resolves(name: &str) -> bool {
        match tokio::net::lookup_host((name, 0)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                warn!("DNS lookup for {} failed: {}", name, e);
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl NetworkProbe for HttpNetworkProbe {
    async fn probe(&self, nodes: &[ObservedNode]) -> Result<NetworkHealth, ClientError> {
        let checks = nodes.iter().map(|node| async move {
            let reachable = self.reachable(node).await;
            let resolves = Self::resolves(&node.name).await;
            (node.name.clone(), reachable, resolves)
        });

        let mut health = NetworkHealth::default();
        for (name, reachable, resolves) in join_all(checks).await {
            if !reachable {
                health.unreachable.insert(name.clone());
            }
            if !resolves {
                health.dns_failures.insert(name);
            }
        }
        Ok(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_model::{NodeRole, NodeState};

    #[test]
    fn test_health_url() {
        let probe = HttpNetworkProbe::new(10250, "/healthz", Duration::from_secs(2)).unwrap();
        assert_eq!(probe.health_url("10.0.0.4"), "https://10.0.0.4:10250/healthz");
    }

    #[tokio::test]
    async fn test_localhost_resolves() {
        assert!(HttpNetworkProbe::resolves("localhost").await);
    }

    #[tokio::test]
    async fn test_empty_node_set_is_healthy() {
        let probe = HttpNetworkProbe::new(10250, "/healthz", Duration::from_millis(100)).unwrap();
        let health = probe.probe(&[]).await.unwrap();
        assert!(health.is_healthy());
    }

    #[tokio::test]
    #[ignore] // Requires a closed local port and real networking
    async fn test_closed_port_is_unreachable() {
        let probe = HttpNetworkProbe::new(1, "/healthz", Duration::from_millis(200)).unwrap();
        let mut node = ObservedNode::new("localhost", [NodeRole::Worker], NodeState::Ready);
        node.address = Some("127.0.0.1".to_string());
        let health = probe.probe(&[node]).await.unwrap();
        assert!(health.unreachable.contains("localhost"));
        assert!(health.dns_failures.is_empty());
    }
}
