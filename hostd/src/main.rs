mod auth;
mod config;
mod daemon;
mod dispatch;
mod errors;
mod local_api;
mod patch;
mod projects;
mod rpc;
mod sandbox;
mod snapshot;
mod state;
mod tools;

use std::sync::Arc;

use tokio::sync::watch;

use crate::auth::FileTokenProvider;
use crate::config::Config;
use crate::daemon::Daemon;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = Config::from_env();
    std::fs::create_dir_all(&cfg.data_root)?;
    tracing::info!(
        host_id=%cfg.host_id,
        server=%cfg.server_url,
        sock=%cfg.local_socket.display(),
        "tetherd starting"
    );

    let redactor = Arc::new(tether_protocol::redaction::Redactor::new(
        &cfg.redaction_extra_regex,
    )?);
    let state = Arc::new(AppState::new(cfg.clone(), redactor));

    // Local unix control API.
    let app = local_api::router(state.clone());
    let sock_path = cfg.local_socket.clone();
    tokio::spawn(async move {
        if let Err(err) = local_api::serve_unix(sock_path, app).await {
            tracing::error!(error=%err, "local unix api stopped");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let tokens = Arc::new(FileTokenProvider::new(cfg.token_path.clone()));
    Daemon::new(cfg, tokens, state, shutdown_rx).run().await
}
