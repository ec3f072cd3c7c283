//! Tee stream copier.
//!
//! Reads one source stream chunk by chunk and writes every chunk to each sink
//! in turn, under that sink's [`SinkPolicy`]. A mandatory sink that fails
//! stops the copy; a best-effort sink gets at most its write timeout per chunk
//! and its failures are swallowed. All sink writes for a chunk complete (or
//! time out) before the next read, so chunk order is preserved on every sink.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::mapping::{Role, SinkPolicy};

/// Read buffer size.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// A write target of the tee, tagged with its role and failure policy.
pub struct TeeSink<W> {
    role: Role,
    policy: SinkPolicy,
    writer: W,
}

/// Why the copy loop stopped.
#[derive(Debug)]
pub enum TeeOutcome {
    /// The source reached end of stream.
    SourceClosed,
    /// Reading the source failed.
    SourceFailed(io::Error),
    /// A mandatory sink rejected a chunk.
    SinkFailed { role: Role, error: io::Error },
}

#[derive(Debug)]
pub struct TeeReport {
    pub bytes_read: u64,
    pub outcome: TeeOutcome,
}

impl<W> TeeSink<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(role: Role, policy: SinkPolicy, writer: W) -> Self {
        Self {
            role,
            policy,
            writer,
        }
    }

    /// Write one chunk. Only a mandatory sink ever returns an error.
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self.policy {
            SinkPolicy::Mandatory => self.writer.write_all(chunk).await,
            SinkPolicy::BestEffort { write_timeout } => {
                match tokio::time::timeout(write_timeout, self.writer.write_all(chunk)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::trace!(role = %self.role, error = %e, "best-effort write failed");
                    }
                    Err(_) => {
                        tracing::trace!(
                            role = %self.role,
                            timeout_ms = write_timeout.as_millis() as u64,
                            "best-effort write timed out"
                        );
                    }
                }
                Ok(())
            }
        }
    }

    /// Shut down the sink's write direction so the peer sees end of request.
    ///
    /// Writers that cannot half-close report an error here, which is ignored.
    /// A best-effort sink's shutdown is bounded by its write timeout.
    pub async fn half_close(&mut self) {
        let result = match self.policy {
            SinkPolicy::Mandatory => self.writer.shutdown().await,
            SinkPolicy::BestEffort { write_timeout } => {
                tokio::time::timeout(write_timeout, self.writer.shutdown())
                    .await
                    .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into()))
            }
        };
        if let Err(e) = result {
            tracing::trace!(role = %self.role, error = %e, "half-close skipped");
        }
    }
}

/// Copy `source` into every sink until the source ends or a mandatory sink
/// fails.
pub async fn tee_copy<R, W>(source: &mut R, sinks: &mut [TeeSink<W>]) -> TeeReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes_read = 0u64;

    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => {
                return TeeReport {
                    bytes_read,
                    outcome: TeeOutcome::SourceClosed,
                }
            }
            Ok(n) => n,
            Err(e) => {
                return TeeReport {
                    bytes_read,
                    outcome: TeeOutcome::SourceFailed(e),
                }
            }
        };
        bytes_read += n as u64;

        for sink in sinks.iter_mut() {
            if let Err(error) = sink.write_chunk(&buf[..n]).await {
                return TeeReport {
                    bytes_read,
                    outcome: TeeOutcome::SinkFailed {
                        role: sink.role,
                        error,
                    },
                };
            }
        }
    }
}
