//! Opaque bidirectional relay.
//!
//! # Responsibilities
//! - Pump bytes both ways between the client and upstream sockets once a
//!   tunnel is established, without interpreting them
//! - Bound memory per direction with the relay buffer
//! - Evict the connection on idle or hard-lifetime expiry even when no I/O
//!   event ever fires
//!
//! # Design Decisions
//! - One copy loop per direction; each drains its buffer completely before
//!   reading again, so a slow consumer pauses the producer instead of
//!   growing memory
//! - A watchdog sleeps until the nearest deadline and re-arms when activity
//!   moved it; expiry cancels both loops

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::http::buffer::Buffer;
use crate::net::connection::Deadlines;
use crate::relay::RelayError;

/// Bytes moved in each direction by a finished tunnel.
#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelOutcome {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Last-activity clock shared by both copy directions and the watchdog.
#[derive(Debug)]
pub struct Activity {
    start: Instant,
    elapsed_ms: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.elapsed_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn last(&self) -> Instant {
        self.start + Duration::from_millis(self.elapsed_ms.load(Ordering::Relaxed))
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay opaquely in both directions until both sides close, an error occurs
/// or a deadline expires.
///
/// `c2u` may arrive non-empty (bytes the client pipelined behind its
/// handshake); `u2c` likewise for bytes a parent proxy sent early. Both are
/// flushed before their side reads again.
pub async fn pump(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    mut c2u: Buffer,
    mut u2c: Buffer,
    deadlines: Deadlines,
) -> Result<TunnelOutcome, RelayError> {
    let activity = Activity::new();
    let (mut client_read, mut client_write) = client.split();
    let (mut upstream_read, mut upstream_write) = upstream.split();

    let forward = copy_half(&mut client_read, &mut upstream_write, &mut c2u, &activity);
    let backward = copy_half(&mut upstream_read, &mut client_write, &mut u2c, &activity);

    tokio::select! {
        result = async { tokio::try_join!(forward, backward) } => {
            let (client_to_upstream, upstream_to_client) = result?;
            Ok(TunnelOutcome {
                client_to_upstream,
                upstream_to_client,
            })
        }
        _ = expiry(&activity, deadlines) => Err(RelayError::DeadlineExpired),
    }
}

/// Copy one direction until the reader reports EOF, then propagate the
/// half-close to the writer.
async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut Buffer,
    activity: &Activity,
) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut scratch = vec![0u8; buf.capacity().min(16 * 1024)];
    let mut total = 0u64;
    loop {
        while !buf.is_empty() {
            let n = writer.write(buf.as_slice()).await?;
            buf.consume(n);
            total += n as u64;
            activity.touch();
        }
        let want = buf.spare().min(scratch.len());
        let n = reader.read(&mut scratch[..want]).await?;
        if n == 0 {
            break;
        }
        // The buffer was drained above and the read was capped to its spare
        // room, so this cannot overflow.
        buf.push(&scratch[..n])
            .map_err(|_| std::io::Error::other("relay buffer overflow"))?;
        activity.touch();
    }
    writer.shutdown().await?;
    Ok(total)
}

/// Resolves only when the idle or hard deadline has truly expired.
async fn expiry(activity: &Activity, deadlines: Deadlines) {
    let idle_timeout = deadlines.idle_timeout();
    loop {
        let idle_at = activity.last() + idle_timeout;
        let wake_at = match deadlines.hard_at() {
            Some(hard) if hard < idle_at => hard,
            _ => idle_at,
        };
        tokio::time::sleep_until(wake_at).await;
        let now = Instant::now();
        if deadlines.hard_at().is_some_and(|hard| now >= hard) {
            return;
        }
        if now >= activity.last() + idle_timeout {
            return;
        }
        // Activity moved the deadline forward; sleep again.
    }
}
