// SPDX-License-Identifier: Apache-2.0
//
// Standalone worker process for deployments that run screening workers
// separately from the API (systemd or container units). Shares the store
// with the server; one or two instances keep concurrency low.

#![forbid(unsafe_code)]

use opscreen_server::{validate_startup_config_contract, AppState, ServiceConfig};
use opscreen_store::Store;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = ServiceConfig::from_env();
    validate_startup_config_contract(&cfg)?;
    let Some(url) = cfg.storage_url.clone() else {
        return Err("OPSCREEN_STORAGE_URL is required for the worker".to_string());
    };
    let store = Store::open(&url).map_err(|e| format!("storage open failed: {e}"))?;

    let state = AppState::with_config(cfg, Some(Arc::new(store)));
    info!("opscreen-worker starting");
    opscreen_server::worker::run_worker_loop(state, 0).await;
    Ok(())
}
