//! Boot orchestration operator daemon.
//!
//! Runs every reconciliation loop as an independent task in one process.
//! Configuration comes from the environment:
//!
//! - `DATA_DIR` — RocksDB path (default `/var/lib/bos/db`)
//! - `PCS_URL`, `HSM_URL`, `BSS_URL`, `IMS_URL`, `S3_URL`, `CFS_URL`,
//!   `TAPMS_URL` — external service endpoints; any left unset falls
//!   back to an in-memory mock, which only makes sense for local
//!   development
//! - `LIVENESS_PATH` — timestamp file touched each iteration

use std::sync::Arc;

use tokio::sync::watch;

use bos_clients::bss::{HttpBootScript, MockBootScript};
use bos_clients::cfs::{HttpConfigFramework, MockConfigFramework};
use bos_clients::hsm::{HttpHardwareState, MockHardwareState};
use bos_clients::ims::{HttpImageService, MockImageService};
use bos_clients::pcs::{HttpPowerControl, MockPowerControl};
use bos_clients::s3::{HttpObjectStore, MockObjectStore};
use bos_clients::tapms::{HttpTenantInfo, MockTenantInfo};
use bos_operators::actual_state_cleanup::ActualStateCleanupOperator;
use bos_operators::configuration::ConfigurationOperator;
use bos_operators::discovery::DiscoveryOperator;
use bos_operators::liveness::Liveness;
use bos_operators::power_off_forceful::ForcefulPowerOffOperator;
use bos_operators::power_off_graceful::GracefulPowerOffOperator;
use bos_operators::power_on::PowerOnOperator;
use bos_operators::session_cleanup::SessionCleanupOperator;
use bos_operators::session_completion::SessionCompletionOperator;
use bos_operators::session_setup::SessionSetupOperator;
use bos_operators::status::StatusOperator;
use bos_operators::{logging, run_operator, Clients, Env, Operator};
use bos_store::RocksStore;

fn endpoint(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(url) => {
            tracing::info!(endpoint = var, url = %url, "external service configured");
            Some(url)
        }
        Err(_) => {
            tracing::warn!(endpoint = var, "not set, using an in-memory mock");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let level = Arc::new(logging::init("info,bos=debug"));
    tracing::info!("starting boot orchestration operators");

    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/var/lib/bos/db".into());
    tracing::info!(path = %data_dir, "opening store");
    let store = Arc::new(RocksStore::open(&data_dir)?);

    let http = bos_clients::http_client();
    let clients = Clients {
        pcs: match endpoint("PCS_URL") {
            Some(url) => Arc::new(HttpPowerControl::new(http.clone(), url)),
            None => Arc::new(MockPowerControl::new()),
        },
        hsm: match endpoint("HSM_URL") {
            Some(url) => Arc::new(HttpHardwareState::new(http.clone(), url)),
            None => Arc::new(MockHardwareState::new()),
        },
        bss: match endpoint("BSS_URL") {
            Some(url) => Arc::new(HttpBootScript::new(http.clone(), url)),
            None => Arc::new(MockBootScript::new()),
        },
        ims: match endpoint("IMS_URL") {
            Some(url) => Arc::new(HttpImageService::new(http.clone(), url)),
            None => Arc::new(MockImageService::new()),
        },
        objects: match endpoint("S3_URL") {
            Some(url) => Arc::new(HttpObjectStore::new(http.clone(), url)),
            None => Arc::new(MockObjectStore::new()),
        },
        cfs: match endpoint("CFS_URL") {
            Some(url) => Arc::new(HttpConfigFramework::new(http.clone(), url)),
            None => Arc::new(MockConfigFramework::new()),
        },
        tenants: match endpoint("TAPMS_URL") {
            Some(url) => Arc::new(HttpTenantInfo::new(http.clone(), url)),
            None => Arc::new(MockTenantInfo::new()),
        },
    };

    let liveness = std::env::var("LIVENESS_PATH")
        .map(Liveness::new)
        .unwrap_or_else(|_| Liveness::disabled());
    let env = Env::new(store, clients, liveness);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let operators: Vec<Arc<dyn Operator<RocksStore>>> = vec![
        Arc::new(DiscoveryOperator::new()),
        Arc::new(SessionSetupOperator::new()),
        Arc::new(ConfigurationOperator::new()),
        Arc::new(PowerOnOperator::new()),
        Arc::new(GracefulPowerOffOperator::new()),
        Arc::new(ForcefulPowerOffOperator::new()),
        Arc::new(StatusOperator::new()),
        Arc::new(SessionCompletionOperator::new()),
        Arc::new(SessionCleanupOperator::new()),
        Arc::new(ActualStateCleanupOperator::new()),
    ];

    let mut tasks = Vec::with_capacity(operators.len());
    for operator in operators {
        let name = operator.name();
        tracing::info!(operator = name, "starting operator");
        tasks.push(tokio::spawn(run_operator(
            operator,
            env.clone(),
            Some(Arc::clone(&level)),
            shutdown_rx.clone(),
        )));
    }

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");
    shutdown_tx.send(true)?;
    for task in tasks {
        task.await?;
    }
    tracing::info!("all operators stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
