//! Per-connection lifecycle, shared by every binding.
//!
//! LIFECYCLE
//! =========
//! 1. Open a `Channel` over the transport (CONNECTED)
//! 2. Wait for exactly one `IDENTIFY:<name>` line (IDENTIFIED)
//! 3. Join the room, which broadcasts the roster (ACTIVE)
//! 4. Decode and submit each line until either side closes
//! 5. Close the channel and leave the room (CLOSED)
//!
//! A connection that fails the handshake is dropped before step 3, so no
//! roster broadcast ever mentions it.

use std::net::SocketAddr;
use std::time::Duration;

use actions::Action;
use peer::{Channel, Inbound, LineTransport};
use tracing::{debug, info, warn};

use crate::services::room::{RoomError, RoomHandle};
use crate::state::{AppState, ConnectionId};

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("connection closed before IDENTIFY")]
    Closed,
    #[error("no IDENTIFY within {0:?}")]
    Timeout(Duration),
    #[error("first line was not IDENTIFY: {0:?}")]
    NotIdentify(String),
}

/// Serve one connection in `room` until either side closes it.
pub async fn serve_connection<T: LineTransport>(state: AppState, room: RoomHandle, transport: T, remote: String) {
    let (channel, mut inbound) = Channel::open(transport, &state.config.channel_options());

    let name = match await_identify(&mut inbound, state.config.handshake_timeout).await {
        Ok(name) => name,
        Err(e) => {
            warn!(room = %room.code(), %remote, error = %e, "relay: handshake failed");
            channel.close();
            return;
        }
    };

    let Some((room, id)) = join_room(&state, room, &name, &channel).await else {
        warn!(%remote, %name, "relay: room unavailable");
        channel.close();
        return;
    };
    info!(room = %room.code(), conn = %id, %name, %remote, "relay: participant active");

    while let Some(line) = inbound.recv().await {
        debug!(room = %room.code(), conn = %id, %line, "relay: recv");
        let action = match actions::decode(&line) {
            Ok(action) => action,
            Err(e) => {
                warn!(room = %room.code(), conn = %id, error = %e, "relay: dropped garbled line");
                continue;
            }
        };
        if room.submit(id, action).await.is_err() {
            break;
        }
    }

    channel.close();
    room.leave(id).await;
    info!(room = %room.code(), conn = %id, %name, "relay: participant closed");
}

/// Wait for the handshake line and return the sanitized display name.
async fn await_identify(inbound: &mut Inbound, limit: Duration) -> Result<String, HandshakeError> {
    let line = tokio::time::timeout(limit, inbound.recv())
        .await
        .map_err(|_| HandshakeError::Timeout(limit))?
        .ok_or(HandshakeError::Closed)?;

    match actions::decode(&line) {
        Ok(Action::Identify { name }) => {
            let name = actions::sanitize(&name);
            if name.is_empty() { Err(HandshakeError::NotIdentify(line)) } else { Ok(name) }
        }
        _ => Err(HandshakeError::NotIdentify(line)),
    }
}

/// Join `room`, retrying once on a freshly opened room if the first one was
/// evicted between lookup and join.
async fn join_room(
    state: &AppState,
    room: RoomHandle,
    name: &str,
    channel: &Channel,
) -> Option<(RoomHandle, ConnectionId)> {
    match room.join(name, channel.clone()).await {
        Ok(id) => return Some((room, id)),
        Err(RoomError::Closed) => {
            debug!(room = %room.code(), "relay: room closed during join, reopening");
        }
    }
    let room = state.rooms.get_or_open(room.code()).await.ok()?;
    let id = room.join(name, channel.clone()).await.ok()?;
    Some((room, id))
}

/// Log-friendly name for a socket peer.
#[must_use]
pub fn describe_remote(addr: Option<SocketAddr>) -> String {
    addr.map_or_else(|| "unknown".to_owned(), |a| a.to_string())
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
