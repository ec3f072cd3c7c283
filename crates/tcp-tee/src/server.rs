//! Listener manager: one accept loop per routing rule, graceful shutdown.

use std::io;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::mapping::RoutingRule;
use crate::proxy::session;

/// Serve every rule until one listener fails or Ctrl+C arrives.
///
/// A listener that cannot bind is a deployment error, so its failure ends
/// the whole run instead of leaving the other listeners up.
pub async fn run(rules: Vec<RoutingRule>) -> anyhow::Result<()> {
    let mut listeners = JoinSet::new();
    for rule in rules {
        listeners.spawn(serve(Arc::new(rule)));
    }

    tokio::select! {
        Some(joined) = listeners.join_next() => {
            joined.context("listener task panicked")??;
            // serve() only returns on error.
            Ok(())
        }
        _ = shutdown_signal() => {
            tracing::info!("tcp-tee shut down");
            Ok(())
        }
    }
}

/// Bind the rule's listen address and accept forever.
pub async fn serve(rule: Arc<RoutingRule>) -> anyhow::Result<()> {
    let listener = bind(&rule.listen)
        .await
        .with_context(|| format!("listener {}", rule.listen))?;

    tracing::info!(
        listen = %rule.listen,
        routing = %rule.describe(),
        "Listening"
    );

    accept_loop(listener, rule).await;
    Ok(())
}

/// Accept connections and hand each to its own session task.
///
/// Accept errors (e.g. file descriptor exhaustion) are logged and the loop
/// keeps going.
pub async fn accept_loop(listener: TcpListener, rule: Arc<RoutingRule>) {
    let span = tee_tracing::listener_span!(rule.listen);

    async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(session::handle_connection(stream, peer, rule.clone()));
                }
                Err(e) => {
                    // No pause: a persistent error (EMFILE) spins here and
                    // logs once per attempt until descriptors free up.
                    tracing::warn!(listen = %rule.listen, error = %e, "Accept failed");
                }
            }
        }
    }
    .instrument(span)
    .await
}

/// Bind a listen address. An empty host (`:9001`) means every interface:
/// the IPv6 wildcard first (dual-stack where the OS allows it), then the
/// IPv4 wildcard for hosts without IPv6.
async fn bind(listen: &str) -> io::Result<TcpListener> {
    let mut last_err = None;
    for address in bind_candidates(listen) {
        match TcpListener::bind(address.as_str()).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::debug!(address = %address, error = %e, "Bind attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::ErrorKind::AddrNotAvailable.into()))
}

fn bind_candidates(listen: &str) -> Vec<String> {
    if listen.starts_with(':') {
        vec![format!("[::]{listen}"), format!("0.0.0.0{listen}")]
    } else {
        vec![listen.to_string()]
    }
}

/// Wait for SIGINT (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping listeners...");
}
