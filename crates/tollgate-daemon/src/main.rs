// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tollgate_core::{GatewayConfig, SystemClock};
use tollgate_daemon::{build_app, AppState};
use tollgate_payment::{Facilitator, HttpFacilitator};
use tollgate_policy::{ReputationOracle, RpcReputationOracle};
use tollgate_routes::{load_routes, RouteTable};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tollgate-daemon", version, about = "Pay-per-request API gateway")]
struct Args {
    /// Bind address; overrides the PORT environment variable.
    #[arg(long)]
    bind: Option<String>,

    /// Routes file; overrides the ROUTES_FILE environment variable.
    #[arg(long)]
    routes_file: Option<PathBuf>,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("tollgate=debug,tollgate_daemon=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tollgate=info,tollgate_daemon=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = GatewayConfig::from_env().context("gateway configuration")?;
    if let Some(routes_file) = args.routes_file {
        config.routes_file = Some(routes_file);
    }

    let rules = match &config.routes_file {
        Some(path) => load_routes(path)
            .with_context(|| format!("load routes file {}", path.display()))?,
        None => Vec::new(),
    };
    let table = RouteTable::compile(rules).context("compile route table")?;

    let timeout = Duration::from_secs(config.request_timeout_secs);
    let facilitator: Option<Arc<dyn Facilitator>> = match &config.facilitator_url {
        Some(url) => {
            let client = HttpFacilitator::new(url.clone(), timeout)
                .context("build facilitator client")?;
            if client.probe().await {
                info!(facilitator = %url, "facilitator reachable");
                Some(Arc::new(client))
            } else {
                warn!(
                    facilitator = %url,
                    "facilitator unreachable at startup; paid routes degrade to pass-through"
                );
                None
            }
        }
        None => None,
    };

    let oracle: Option<Arc<dyn ReputationOracle>> = match &config.reputation {
        Some(rep) => Some(Arc::new(
            RpcReputationOracle::new(rep.rpc_url.clone(), rep.contract.clone(), timeout)
                .context("build reputation oracle client")?,
        )),
        None => None,
    };

    let bind = args
        .bind
        .unwrap_or_else(|| format!("0.0.0.0:{}", config.port));

    let state = AppState::build(config, Arc::new(SystemClock), table, facilitator, oracle)
        .context("assemble gateway state")?;
    let app = build_app(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(
        bind = %bind,
        routes = state.routes_snapshot().await.len(),
        admin = state.config.admin_key.is_some(),
        network = state.config.network.caip2(),
        "tollgate listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serve")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install ctrl-c handler");
    }
    info!("shutting down");
}
