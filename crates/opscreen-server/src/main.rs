// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use clap::Parser;
use opscreen_server::{
    build_router, effective_config_payload, validate_startup_config_contract, AppState,
    ServiceConfig,
};
use opscreen_store::Store;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "opscreen-server", version, about = "Sanctions/PEP screening service")]
struct ServerCliArgs {
    #[arg(long)]
    bind: Option<String>,
    #[arg(long, default_value_t = false)]
    print_effective_config: bool,
    #[arg(long, default_value_t = false)]
    validate_config: bool,
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("OPSCREEN_LOG_JSON", true) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn wait_for_shutdown_signal() -> Result<(), String> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| format!("failed to register SIGTERM handler: {e}"))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| format!("failed to register SIGINT handler: {e}"))?;
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("failed to register ctrl-c handler: {e}"))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = ServerCliArgs::parse();
    init_tracing();

    let mut cfg = ServiceConfig::from_env();
    if let Some(bind) = cli.bind {
        cfg.bind_addr = bind;
    }
    validate_startup_config_contract(&cfg)?;

    if cli.validate_config {
        info!("configuration validated");
        return Ok(());
    }
    if cli.print_effective_config {
        println!(
            "{}",
            serde_json::to_string_pretty(&effective_config_payload(&cfg))
                .map_err(|e| format!("render effective config: {e}"))?
        );
        return Ok(());
    }

    let store = match &cfg.storage_url {
        Some(url) => {
            let store = Store::open(url).map_err(|e| format!("storage open failed: {e}"))?;
            info!("storage ready; cache, queue, and audit persistence enabled");
            Some(Arc::new(store))
        }
        None => {
            warn!("OPSCREEN_STORAGE_URL unset; running inline-only (no cache, no queue)");
            None
        }
    };

    let bind_addr = cfg.bind_addr.clone();
    let state = AppState::with_config(cfg, store);
    let workers = opscreen_server::worker::spawn_workers(&state);
    if !workers.is_empty() {
        info!(count = workers.len(), "background workers spawned");
    }
    let app = build_router(state);

    let addr: std::net::SocketAddr = bind_addr
        .parse()
        .map_err(|e| format!("invalid bind addr {bind_addr}: {e}"))?;
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4().map_err(|e| format!("socket v4 failed: {e}"))?
    } else {
        tokio::net::TcpSocket::new_v6().map_err(|e| format!("socket v6 failed: {e}"))?
    };
    socket
        .set_reuseaddr(true)
        .map_err(|e| format!("set_reuseaddr failed: {e}"))?;
    socket.bind(addr).map_err(|e| format!("bind failed: {e}"))?;
    let listener = socket
        .listen(1024)
        .map_err(|e| format!("listen failed: {e}"))?;
    info!("opscreen-server listening on {bind_addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(err) = wait_for_shutdown_signal().await {
            warn!("shutdown signal handler failed: {err}");
        }
        for handle in &workers {
            handle.abort();
        }
    })
    .await
    .map_err(|e| format!("server failed: {e}"))
}
