//! Direct TCP listener for LAN guests.
//!
//! Every accepted socket is served in the configured LAN room, one task per
//! connection. Accept errors are logged and the loop keeps going after a
//! short pause.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use peer::DirectTransport;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::services::connection::{describe_remote, serve_connection};
use crate::services::room::RoomHandle;
use crate::state::AppState;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind the direct listener on all interfaces at `port`.
///
/// # Errors
///
/// Returns the bind error.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
}

/// Accept connections forever, serving each in `room`.
pub async fn run(state: AppState, listener: TcpListener, room: RoomHandle) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, room = %room.code(), "lan: listening");
    }

    loop {
        let (stream, addr) = next_accepted(|| listener.accept(), ACCEPT_BACKOFF).await;
        let _ = stream.set_nodelay(true);
        let transport = DirectTransport::new(stream, state.config.max_line_bytes);
        let remote = describe_remote(Some(addr));
        info!(%remote, "lan: connection accepted");
        tokio::spawn(serve_connection(state.clone(), room.clone(), transport, remote));
    }
}

/// Retry `accept` until it succeeds, sleeping `backoff` after each error so
/// a persistent failure such as EMFILE cannot spin the loop.
async fn next_accepted<F, Fut, T>(mut accept: F, backoff: Duration) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                warn!(error = %e, "lan: accept failed");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
#[path = "lan_test.rs"]
mod tests;
