use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

type Result<T> = crate::SshResult<T>;

const COPY_BUFFER: usize = 16 * 1024;

/// Live per-direction byte counters for one forwarded connection.
///
/// Cloning shares the underlying counters, so a metrics task can read partial
/// progress while the pipeline is still running.
#[derive(Debug, Clone, Default)]
pub struct ByteCounters {
    a_to_b: Arc<AtomicU64>,
    b_to_a: Arc<AtomicU64>,
}

impl ByteCounters {
    /// Bytes read from A and written to B.
    pub fn a_to_b(&self) -> u64 {
        self.a_to_b.load(Ordering::Relaxed)
    }

    /// Bytes read from B and written to A.
    pub fn b_to_a(&self) -> u64 {
        self.b_to_a.load(Ordering::Relaxed)
    }
}

/// Full-duplex copier between two streams with byte accounting.
#[derive(Debug, Default)]
pub struct ForwardingSession {
    counters: ByteCounters,
}

impl ForwardingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> ByteCounters {
        self.counters.clone()
    }

    /// Copy in both directions until either one finishes.
    ///
    /// The other direction is dropped as soon as the first ends; both streams are
    /// closed when this returns. Half-close races (broken pipe, reset, not
    /// connected) are reported as a clean finish.
    pub async fn run<A, B>(&self, a: A, b: B) -> Result<()>
    where
        A: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut a_read, mut a_write) = tokio::io::split(a);
        let (mut b_read, mut b_write) = tokio::io::split(b);

        let result = tokio::select! {
            res = copy_counted(&mut a_read, &mut b_write, &self.counters.a_to_b) => {
                trace!(direction = "a->b", ?res, "forwarding direction finished");
                res
            }
            res = copy_counted(&mut b_read, &mut a_write, &self.counters.b_to_a) => {
                trace!(direction = "b->a", ?res, "forwarding direction finished");
                res
            }
        };

        let _ = a_write.shutdown().await;
        let _ = b_write.shutdown().await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_graceful_close(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Errors that only mean the peer went away first.
pub fn is_graceful_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, counter: &AtomicU64) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.flush().await?;
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
        total += n as u64;
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
