//! Injected collaborator set

use cluster_client::{CloudProvider, ClusterClient, ClusterInspector, NetworkProbe};
use std::sync::Arc;

/// The four collaborators an orchestrator works through
#[derive(Clone)]
pub struct Collaborators {
    pub cloud: Arc<dyn CloudProvider>,
    pub cluster: Arc<dyn ClusterClient>,
    pub inspector: Arc<dyn ClusterInspector>,
    pub probe: Arc<dyn NetworkProbe>,
}

impl Collaborators {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        cluster: Arc<dyn ClusterClient>,
        inspector: Arc<dyn ClusterInspector>,
        probe: Arc<dyn NetworkProbe>,
    ) -> Self {
        Self {
            cloud,
            cluster,
            inspector,
            probe,
        }
    }

    /// Use one value that implements every collaborator trait
    pub fn shared<T>(all: Arc<T>) -> Self
    where
        T: CloudProvider + ClusterClient + ClusterInspector + NetworkProbe + 'static,
    {
        Self {
            cloud: Arc::clone(&all) as _,
            cluster: Arc::clone(&all) as _,
            inspector: Arc::clone(&all) as _,
            probe: all,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
