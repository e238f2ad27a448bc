//! Message Channel: one bidirectional line stream to a remote endpoint.
//!
//! ARCHITECTURE
//! ============
//! `Channel::open` hands the transport to a spawned pump task and returns two
//! halves. `Channel` is a cheap clonable sender with a bounded outbound queue;
//! `Inbound` yields received lines in arrival order. The pump is the only
//! owner of the transport, so reads and writes never contend for it.
//!
//! DESIGN
//! ======
//! - `send` never blocks. A full queue is reported to the caller, who
//!   decides whether the peer is too slow to keep.
//! - `close` is idempotent and safe from any task. Lines queued before the
//!   close are flushed within one write timeout, so a final notice such as
//!   `YOU_WERE_KICKED` reaches the remote before the socket goes away.
//! - A remote close ends the stream, but lines already received stay
//!   readable from `Inbound`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =============================================================================
// TRANSPORT
// =============================================================================

/// A line-oriented byte stream. Implemented for direct TCP, for the guest
/// side of the topic broker, and for the broker's server-side websocket.
#[async_trait]
pub trait LineTransport: Send + 'static {
    /// Next inbound line without its terminator, `Ok(None)` once the remote
    /// has closed. Must be cancel-safe: the pump polls it inside `select!`.
    async fn next_line(&mut self) -> Result<Option<String>, ChannelError>;

    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError>;

    async fn shutdown(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("inbound line exceeds the maximum length")]
    LineTooLong,
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("write timed out")]
    WriteTimeout,
    #[error("timed out")]
    Timeout,
}

impl From<tokio_util::codec::LinesCodecError> for ChannelError {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::MaxLineLengthExceeded => Self::LineTooLong,
            tokio_util::codec::LinesCodecError::Io(e) => Self::Io(e),
        }
    }
}

// =============================================================================
// CHANNEL
// =============================================================================

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Lines that may wait for the writer before `send` reports `Full`.
    pub outbound_capacity: usize,
    /// Lines read ahead of the consumer.
    pub inbound_capacity: usize,
    /// Upper bound on a single write, and on the final flush after `close`.
    pub write_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            inbound_capacity: 256,
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue is full")]
    Full,
    #[error("channel is closed")]
    Closed,
}

/// Sending half. Clones share one outbound queue and one close state.
#[derive(Debug, Clone)]
pub struct Channel {
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
    terminated: CancellationToken,
}

/// Receiving half.
#[derive(Debug)]
pub struct Inbound {
    rx: mpsc::Receiver<String>,
    closed: CancellationToken,
}

impl Channel {
    /// Start pumping `transport`. Must be called inside a tokio runtime.
    pub fn open<T: LineTransport>(transport: T, opts: &ChannelOptions) -> (Channel, Inbound) {
        let (out_tx, out_rx) = mpsc::channel(opts.outbound_capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(opts.inbound_capacity.max(1));
        let closed = CancellationToken::new();
        let terminated = CancellationToken::new();

        tokio::spawn(pump(
            transport,
            out_rx,
            in_tx,
            closed.clone(),
            terminated.clone(),
            opts.write_timeout,
        ));

        let channel = Channel { outbound: out_tx, closed: closed.clone(), terminated };
        (channel, Inbound { rx: in_rx, closed })
    }

    /// Queue one line for the writer. Never blocks.
    ///
    /// # Errors
    ///
    /// [`SendError::Full`] when the remote is not keeping up,
    /// [`SendError::Closed`] after `close` or once the transport has ended.
    pub fn send(&self, line: impl Into<String>) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.outbound.try_send(line.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Stop the channel. Lines already queued are still flushed.
    pub fn close(&self) {
        self.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.terminated.is_cancelled() || self.outbound.is_closed()
    }

    /// Resolves once the pump has flushed and released the transport.
    pub async fn closed(&self) {
        self.terminated.cancelled().await;
    }
}

impl Inbound {
    /// Next received line, `None` once the channel is closed locally or the
    /// remote has closed and every buffered line has been read.
    pub async fn recv(&mut self) -> Option<String> {
        if self.closed.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            line = self.rx.recv() => line,
        }
    }
}

// =============================================================================
// PUMP
// =============================================================================

async fn pump<T: LineTransport>(
    mut transport: T,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<String>,
    closed: CancellationToken,
    terminated: CancellationToken,
    write_timeout: Duration,
) {
    let reason = loop {
        tokio::select! {
            biased;
            () = closed.cancelled() => break "closed locally",
            line = outbound.recv() => {
                let Some(line) = line else {
                    break "all senders dropped";
                };
                if let Err(e) = write(&mut transport, &line, write_timeout).await {
                    warn!(error = %e, "channel: write failed");
                    break "write failed";
                }
            }
            result = transport.next_line() => match result {
                Ok(Some(line)) => {
                    tokio::select! {
                        biased;
                        () = closed.cancelled() => break "closed locally",
                        sent = inbound.send(line) => {
                            if sent.is_err() {
                                break "inbound dropped";
                            }
                        }
                    }
                }
                Ok(None) => break "remote closed",
                Err(e) => {
                    warn!(error = %e, "channel: read failed");
                    break "read failed";
                }
            },
        }
    };

    debug!(reason, "channel: pump stopping");
    outbound.close();
    drop(inbound);

    if closed.is_cancelled() {
        flush(&mut transport, &mut outbound, write_timeout).await;
    }
    match tokio::time::timeout(write_timeout, transport.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "channel: shutdown failed"),
        Err(_) => debug!("channel: shutdown timed out"),
    }
    terminated.cancel();
}

async fn write<T: LineTransport>(transport: &mut T, line: &str, limit: Duration) -> Result<(), ChannelError> {
    tokio::time::timeout(limit, transport.write_line(line))
        .await
        .map_err(|_| ChannelError::WriteTimeout)?
}

/// Write whatever was queued before the close, bounded by one write timeout.
async fn flush<T: LineTransport>(transport: &mut T, outbound: &mut mpsc::Receiver<String>, limit: Duration) {
    let deadline = Instant::now() + limit;
    while let Ok(line) = outbound.try_recv() {
        match tokio::time::timeout_at(deadline, transport.write_line(&line)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "channel: flush failed");
                return;
            }
            Err(_) => {
                debug!("channel: flush timed out");
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
