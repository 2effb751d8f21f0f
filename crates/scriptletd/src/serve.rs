//! Serve mode — answers resource and state lookups from other members.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use scriptlet_cluster::{HostProbe, member_router};
use scriptlet_core::ScriptletConfig;

/// Run the member endpoint until Ctrl-C.
pub async fn run(config: &ScriptletConfig, listen: SocketAddr) -> anyhow::Result<()> {
    let server_name = config.server_name().to_string();
    let pools = config.storage_pools();
    info!(member = %server_name, pools = pools.len(), "scriptlet member endpoint starting");

    let probe = HostProbe::new(server_name.clone()).with_pools(pools);
    let router = member_router(Arc::new(probe), config.remote_token().map(str::to_string));
    if config.remote_token().is_none() {
        warn!("no remote token configured, member endpoint is unauthenticated");
    }

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "member endpoint listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(member = %server_name, "member endpoint stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}
