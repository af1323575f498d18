mod activation;
mod config;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use sshcert_agent::{AgentClient, CertAgent, CertIndex, Dispatcher, keyfile};
use tokio::net::UnixStream;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Invocation, USAGE};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env()? {
        Invocation::Run(config) => config,
        Invocation::Help => {
            eprintln!("{USAGE}");
            return Ok(());
        }
    };

    // Everything up to serving is fatal on error: no partial startup.
    let records = keyfile::load_files(&config.key_files).context("failed to load key files")?;
    let index = Arc::new(CertIndex::from_records(&records));
    tracing::info!(
        files = config.key_files.len(),
        keys = records.len(),
        certificates = index.len(),
        signed_keys = index.fingerprint_count(),
        "certificate index built"
    );

    let upstream = UnixStream::connect(&config.upstream_socket)
        .await
        .with_context(|| format!("connect to upstream agent {}", config.upstream_socket.display()))?;
    tracing::info!(upstream = %config.upstream_socket.display(), "connected to upstream agent");

    let listeners = activation::listeners().context("failed to take activated sockets")?;

    let dispatcher = Dispatcher::new(CertAgent::new(AgentClient::new(upstream), index));
    let _accept_loops = dispatcher.serve_all(listeners);

    tracing::info!("sshcertd ready");

    // Wait for SIGTERM or SIGINT; there is no other way out once serving.
    shutdown_signal().await;
    tracing::info!("received shutdown signal, exiting");
    Ok(())
}

/// Wait for ctrl-c (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("failed to register SIGTERM handler: {e}, falling back to SIGINT only");
            ctrl_c.await.ok();
        }
    }
}
