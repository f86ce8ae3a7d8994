//! Integration tests for the cluster collaborators
//!
//! These tests require a running cluster.
//! Set KUBECONFIG (and RKE_BINARY / RKE_WORKDIR for the RKE test) to run.

use cluster_client::{ClusterInspector, HttpNetworkProbe, KubeInspector, NetworkProbe};
use cluster_model::ClusterHandle;
use std::time::Duration;

fn handle() -> ClusterHandle {
    let mut handle = ClusterHandle::new(std::env::var("CLUSTER_ID").unwrap_or_else(|_| "integration".to_string()));
    handle.kubeconfig = std::env::var("KUBECONFIG").ok();
    handle
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_observe_nodes() {
    let inspector = KubeInspector::new(None);

    let nodes = inspector.observe_nodes(&handle()).await
        .expect("Failed to observe nodes");

    assert!(!nodes.is_empty(), "Cluster reported no nodes");
    for node in &nodes {
        println!("{} roles={:?} state={} versions={:?}", node.name, node.roles, node.state, node.versions);
    }
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_probe_cluster_nodes() {
    let inspector = KubeInspector::new(None);
    let probe = HttpNetworkProbe::new(10250, "/healthz", Duration::from_secs(5))
        .expect("Failed to build probe");

    let nodes = inspector.observe_nodes(&handle()).await
        .expect("Failed to observe nodes");
    let health = probe.probe(&nodes).await
        .expect("Failed to probe nodes");

    println!("unreachable={:?} dns_failures={:?}", health.unreachable, health.dns_failures);
}

#[tokio::test]
async fn test_missing_kubeconfig_reports_no_nodes() {
    let inspector = KubeInspector::new(None);
    let mut handle = handle();
    handle.kubeconfig = Some("/nonexistent/kube_config_cluster.yml".to_string());

    let nodes = inspector.observe_nodes(&handle).await
        .expect("Missing kubeconfig should not be an error");

    assert!(nodes.is_empty());
}
