//! Upgrade Controller
//!
//! Runs one in-place upgrade of an RKE cluster:
//! - Loads the desired cluster spec and the host inventory
//! - Plans the upgrade against the live cluster
//! - Executes it (`rke up` per stage), waits for convergence
//! - Validates versions and connectivity, prints the report and fails on
//!   nodes that were healthy before the upgrade and are not anymore
//!
//! Ctrl-C cancels the run between steps or inside any wait. Nothing is rolled
//! back; the partial result is logged.

mod config;

use anyhow::{Context, Result};
use cluster_client::{HttpNetworkProbe, InventoryProvider, KubeInspector, RkeCliClient};
use cluster_model::ClusterSpec;
use config::ControllerConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use upgrade_orchestrator::{Collaborators, OrchestratorConfig, OrchestratorError, UpgradeOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and reqwest both pull in rustls; pin one provider for the process
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Upgrade Controller");

    let config = ControllerConfig::from_env().context("invalid controller configuration")?;
    let orchestrator_config = OrchestratorConfig::from_env().context("invalid orchestrator configuration")?;

    info!("Configuration:");
    info!("  Cluster spec: {}", config.spec_path.display());
    info!("  Inventory: {}", config.inventory_path.display());
    info!("  RKE: {} (workdir {})", config.rke_binary.display(), config.rke_workdir.display());
    info!("  Converge timeout: {:?}", config.converge_timeout);
    info!("  Dry run: {}", config.dry_run);

    let desired = ClusterSpec::from_file(&config.spec_path)
        .with_context(|| format!("failed to load cluster spec {}", config.spec_path.display()))?;
    let inventory = Arc::new(
        InventoryProvider::from_file(&config.inventory_path)
            .with_context(|| format!("failed to load inventory {}", config.inventory_path.display()))?,
    );

    let rke = RkeCliClient::new(&config.rke_binary, &config.rke_workdir, config.rke_command_timeout);
    let handle = rke.handle(&desired.name);
    let probe = HttpNetworkProbe::new(config.probe_port, "/healthz", Duration::from_secs(5))
        .context("failed to build network probe")?;

    let collaborators = Collaborators::new(
        Arc::clone(&inventory) as _,
        Arc::new(rke),
        Arc::new(KubeInspector::new(None)),
        Arc::new(probe),
    );
    let orchestrator = UpgradeOrchestrator::new(handle, collaborators, orchestrator_config);

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling upgrade");
            token.cancel();
        }
    });

    // Hosts already serving the cluster count as provisioned
    let current = orchestrator.observe().await.context("failed to observe cluster")?;
    let adopted = inventory.adopt(current.node_names())?;
    info!("Adopted {} existing cluster node(s) from the inventory", adopted);

    let plan = orchestrator.plan_upgrade(&desired).await.context("failed to plan upgrade")?;
    if config.dry_run {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let current_nodes: Vec<String> = current.node_names().map(str::to_string).collect();
    let before = orchestrator
        .validate(&current_nodes, &BTreeMap::new())
        .await
        .context("pre-upgrade validation query failed")?;

    if plan.is_empty() {
        info!("Cluster {} already matches the desired spec", desired.name);
    } else {
        match orchestrator.execute(&plan).await {
            Ok(result) => {
                info!("Executed {} step(s), {} mutating", result.steps.len(), result.mutations());
                println!("{}", result.to_json()?);
            }
            Err(e) => {
                report_partial(&e);
                return Err(e).context("upgrade failed");
            }
        }
    }

    orchestrator
        .wait_until_converged(&desired, config.converge_timeout)
        .await
        .context("cluster did not converge")?;

    let nodes: Vec<String> = desired.node_names().map(str::to_string).collect();
    let report = orchestrator
        .validate(&nodes, &desired.versions)
        .await
        .context("validation query failed")?;
    println!("{}", report.to_json()?);

    let regressions = report.regressions(&before);
    for regression in &regressions {
        warn!("Regression: {}", regression);
    }
    if !regressions.is_empty() {
        anyhow::bail!("{} node(s) healthy before the upgrade regressed", regressions.len());
    }
    report.into_result().context("post-upgrade validation failed")?;

    info!("Upgrade of cluster {} complete", desired.name);
    Ok(())
}

fn report_partial(e: &OrchestratorError) {
    error!("Upgrade aborted: {}", e);
    if let Some(partial) = e.partial_result() {
        for record in &partial.steps {
            error!("  {}: {:?}", record.step, record.status);
        }
    }
}
