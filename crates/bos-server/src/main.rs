//! Boot orchestration API server.
//!
//! Configuration comes from the environment:
//!
//! - `LISTEN_ADDR` — bind address (default `0.0.0.0:8080`)
//! - `DATA_DIR` — RocksDB path shared with the operator daemon
//!   (default `/var/lib/bos/db`)
//! - `TAPMS_URL`, `IMS_URL`, `S3_URL` — services consulted during
//!   validation; unset falls back to in-memory mocks for local use

use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use bos_clients::ims::{HttpImageService, MockImageService};
use bos_clients::s3::{HttpObjectStore, MockObjectStore};
use bos_clients::tapms::{HttpTenantInfo, MockTenantInfo};
use bos_server::{create_router, migration, AppState};
use bos_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bos=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting boot orchestration API server");

    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/var/lib/bos/db".into());

    tracing::info!(path = %data_dir, "opening store");
    let store = Arc::new(RocksStore::open(&data_dir)?);

    // The store must be readable by this build before anything serves.
    let summary = migration::run(store.as_ref())?;
    tracing::info!(
        repaired = summary.repaired,
        deleted = summary.deleted,
        "store migration complete"
    );

    let http = bos_clients::http_client();
    let tenants: Arc<dyn bos_clients::tapms::TenantInfo> = match std::env::var("TAPMS_URL") {
        Ok(url) => Arc::new(HttpTenantInfo::new(http.clone(), url)),
        Err(_) => {
            tracing::warn!("TAPMS_URL not set, using an in-memory tenant mock");
            Arc::new(MockTenantInfo::new())
        }
    };
    let ims: Arc<dyn bos_clients::ims::ImageService> = match std::env::var("IMS_URL") {
        Ok(url) => Arc::new(HttpImageService::new(http.clone(), url)),
        Err(_) => {
            tracing::warn!("IMS_URL not set, using an in-memory image-service mock");
            Arc::new(MockImageService::new())
        }
    };
    let objects: Arc<dyn bos_clients::s3::ObjectStore> = match std::env::var("S3_URL") {
        Ok(url) => Arc::new(HttpObjectStore::new(http.clone(), url)),
        Err(_) => {
            tracing::warn!("S3_URL not set, using an in-memory object-store mock");
            Arc::new(MockObjectStore::new())
        }
    };

    let state = AppState::new(store, tenants, ims, objects);
    let app = create_router(state);

    tracing::info!(listen_addr = %listen_addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    tracing::info!("shutdown signal received");
}
