//! Duplication engine: drives one accepted client connection from dial to
//! teardown.
//!
//! 1. Dial mandatory destinations one by one, then best-effort ones.
//! 2. Spawn a relay (authoritative destination to client) and a drain for
//!    every other mandatory destination.
//! 3. Spawn the fan-out: tee the client stream into every dialed destination,
//!    then half-close each of them.
//! 4. Wait for every task. Connections are released as their owning halves
//!    drop, so every exit path closes each connection exactly once.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::correlation;
use super::tee::{tee_copy, TeeOutcome, TeeSink};
use crate::mapping::{Destination, Role, RoutingRule};

/// A destination could not be reached.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("{role} dial to {address} failed: {source}")]
    Connect {
        role: Role,
        address: String,
        source: io::Error,
    },

    #[error("{role} dial to {address} timed out after {timeout:?}")]
    Timeout {
        role: Role,
        address: String,
        timeout: Duration,
    },
}

impl DialError {
    pub fn role(&self) -> Role {
        match self {
            DialError::Connect { role, .. } | DialError::Timeout { role, .. } => *role,
        }
    }
}

/// Byte counts of a completed session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Bytes read from the client and fanned out.
    pub to_destinations: u64,
    /// Bytes relayed from the authoritative destination to the client.
    pub to_client: u64,
    /// Bytes read and dropped from non-authoritative mandatory destinations.
    pub discarded: u64,
}

/// Result of one session task.
enum Leg {
    FanOut(u64),
    FanIn(u64),
    Discard(u64),
}

/// Run a session for an accepted connection, logging its outcome.
pub async fn handle_connection<S>(client: S, peer: SocketAddr, rule: Arc<RoutingRule>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let session_id = correlation::generate_id();
    let span = tee_tracing::session_span!(session_id, rule.listen, peer);

    async move {
        match run_session(client, &rule).await {
            Ok(summary) => {
                let span = tracing::Span::current();
                span.record("to_destinations", summary.to_destinations);
                span.record("to_client", summary.to_client);
                tracing::debug!(discarded = summary.discarded, "Session complete");
            }
            Err(e) => {
                tracing::warn!(
                    listen = %rule.listen,
                    role = %e.role(),
                    error = %e,
                    "Mandatory destination dial failed, dropping client"
                );
            }
        }
    }
    .instrument(span)
    .await
}

/// Duplicate `client` across the rule's destinations until every direction
/// has finished.
///
/// Returns early with the dial error if a mandatory destination cannot be
/// reached; the client and any connections already dialed are closed by then.
pub async fn run_session<S>(client: S, rule: &RoutingRule) -> Result<SessionSummary, DialError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let links = dial_all(rule).await?;

    let (mut client_read, client_write) = tokio::io::split(client);
    let mut client_write = Some(client_write);
    let mut sinks = Vec::with_capacity(links.len());
    let mut tasks = JoinSet::new();

    for (dest, stream) in links {
        let (read_half, write_half) = stream.into_split();
        if dest.role.is_authoritative() {
            if let Some(to_client) = client_write.take() {
                tasks.spawn(relay(read_half, to_client, dest.role).in_current_span());
            }
        } else if dest.policy.is_mandatory() {
            tasks.spawn(drain(read_half, dest.role).in_current_span());
        }
        // Best-effort responses are never read; the read half just drops.
        sinks.push(TeeSink::new(dest.role, dest.policy, write_half));
    }

    let listen = rule.listen.clone();
    tasks.spawn(
        async move {
            let report = tee_copy(&mut client_read, &mut sinks).await;
            match &report.outcome {
                TeeOutcome::SourceClosed => {
                    tracing::debug!(bytes = report.bytes_read, "Client finished sending");
                }
                TeeOutcome::SourceFailed(e) => {
                    tracing::debug!(bytes = report.bytes_read, error = %e, "Client read failed");
                }
                TeeOutcome::SinkFailed { role, error } => {
                    tracing::warn!(
                        listen = %listen,
                        role = %role,
                        error = %error,
                        "Mandatory destination write failed, stopping fan-out"
                    );
                }
            }
            for sink in sinks.iter_mut() {
                sink.half_close().await;
            }
            Leg::FanOut(report.bytes_read)
        }
        .in_current_span(),
    );

    let mut summary = SessionSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Leg::FanOut(n)) => summary.to_destinations = n,
            Ok(Leg::FanIn(n)) => summary.to_client = n,
            Ok(Leg::Discard(n)) => summary.discarded += n,
            Err(e) => tracing::warn!(error = %e, "Session task failed"),
        }
    }
    Ok(summary)
}

/// Connect to `dest` within its dial timeout.
pub async fn dial(dest: &Destination) -> Result<TcpStream, DialError> {
    let connect = TcpStream::connect(dest.address.as_str());
    match tokio::time::timeout(dest.dial_timeout, connect).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(source)) => Err(DialError::Connect {
            role: dest.role,
            address: dest.address.clone(),
            source,
        }),
        Err(_) => Err(DialError::Timeout {
            role: dest.role,
            address: dest.address.clone(),
            timeout: dest.dial_timeout,
        }),
    }
}

/// Dial mandatory destinations first, in rule order, then best-effort ones.
/// A failed best-effort destination is left out of the returned set.
async fn dial_all(rule: &RoutingRule) -> Result<Vec<(&Destination, TcpStream)>, DialError> {
    let (mandatory, best_effort): (Vec<&Destination>, Vec<&Destination>) = rule
        .destinations
        .iter()
        .partition(|d| d.policy.is_mandatory());

    let mut links = Vec::with_capacity(rule.destinations.len());
    for dest in mandatory {
        let stream = dial(dest).await?;
        links.push((dest, stream));
    }
    for dest in best_effort {
        match dial(dest).await {
            Ok(stream) => links.push((dest, stream)),
            Err(e) => {
                tracing::info!(
                    role = %dest.role,
                    error = %e,
                    "Best-effort destination unavailable, continuing without it"
                );
            }
        }
    }
    Ok(links)
}

/// Copy a destination's response to the client, then half-close the client.
async fn relay<R, W>(mut from: R, mut to: W, role: Role) -> Leg
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = match tokio::io::copy(&mut from, &mut to).await {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(role = %role, error = %e, "Relay to client ended with error");
            0
        }
    };
    let _ = to.shutdown().await;
    Leg::FanIn(copied)
}

/// Read and drop a destination's response so its send buffer never fills.
async fn drain<R>(mut from: R, role: Role) -> Leg
where
    R: AsyncRead + Unpin,
{
    match tokio::io::copy(&mut from, &mut tokio::io::sink()).await {
        Ok(n) => Leg::Discard(n),
        Err(e) => {
            tracing::debug!(role = %role, error = %e, "Drain ended with error");
            Leg::Discard(0)
        }
    }
}
