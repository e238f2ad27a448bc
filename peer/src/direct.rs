//! Direct line transport: newline-framed UTF-8 over a byte stream.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::channel::{ChannelError, LineTransport};

/// Generic over the stream so tests can run it over `tokio::io::duplex`.
pub struct DirectTransport<S = TcpStream> {
    framed: Framed<S, LinesCodec>,
}

impl<S> DirectTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an established stream. Inbound lines longer than `max_line_bytes`
    /// fail the read.
    pub fn new(stream: S, max_line_bytes: usize) -> Self {
        Self { framed: Framed::new(stream, LinesCodec::new_with_max_length(max_line_bytes)) }
    }
}

impl DirectTransport<TcpStream> {
    /// # Errors
    ///
    /// Returns [`ChannelError::Io`] if the TCP connect fails.
    pub async fn connect(addr: SocketAddr, max_line_bytes: usize) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, max_line_bytes))
    }

    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.framed.get_ref().peer_addr().ok()
    }
}

#[async_trait]
impl<S> LineTransport for DirectTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_line(&mut self) -> Result<Option<String>, ChannelError> {
        match self.framed.next().await {
            Some(Ok(line)) => Ok(Some(line.trim_end_matches('\r').to_owned())),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        self.framed.send(line).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ChannelError> {
        SinkExt::<&str>::close(&mut self.framed).await?;
        Ok(())
    }
}
