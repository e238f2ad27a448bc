//! Peer Connector: establish a guest connection to a relay.
//!
//! `connect` resolves to exactly one outcome. The guest's `IDENTIFY` line is
//! queued before the `Peer` is handed out, so it is always the first line the
//! relay sees from this connection.

use std::net::SocketAddr;
use std::time::Duration;

use actions::Action;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError, ChannelOptions, Inbound, SendError};
use crate::direct::DirectTransport;
use crate::topic::TopicTransport;

// =============================================================================
// OPTIONS
// =============================================================================

/// Where the relay is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Raw TCP line stream to the relay's LAN listener.
    Direct { addr: SocketAddr },
    /// Websocket topic broker, e.g. `ws://relay.example:3000/ws`.
    Broker { url: String },
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub endpoint: Endpoint,
    /// Room code. Only used by the broker binding; a direct listener serves
    /// exactly one room.
    pub room: String,
    pub name: String,
    pub channel: ChannelOptions,
    pub connect_timeout: Duration,
    pub max_line_bytes: usize,
}

impl ConnectOptions {
    pub fn new(endpoint: Endpoint, name: impl Into<String>) -> Self {
        Self {
            endpoint,
            room: "LAN".to_owned(),
            name: name.into(),
            channel: ChannelOptions::default(),
            connect_timeout: Duration::from_secs(10),
            max_line_bytes: 1024 * 1024,
        }
    }

    #[must_use]
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = room.into();
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("display name must be non-empty and free of ':', ',' and line breaks")]
    InvalidName,
    #[error("invalid room code {0:?}")]
    InvalidRoom(String),
    #[error("timed out connecting to relay")]
    Timeout,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

// =============================================================================
// CONNECT
// =============================================================================

/// Open a channel to the relay and send `IDENTIFY:<name>`.
///
/// # Errors
///
/// Returns a [`ConnectError`] if the name or room is unusable or the
/// transport cannot be established within `connect_timeout`.
pub async fn connect(opts: ConnectOptions) -> Result<Peer, ConnectError> {
    if opts.name.is_empty() || actions::sanitize(&opts.name) != opts.name {
        return Err(ConnectError::InvalidName);
    }

    let (channel, inbound) = match &opts.endpoint {
        Endpoint::Direct { addr } => {
            let transport = tokio::time::timeout(
                opts.connect_timeout,
                DirectTransport::connect(*addr, opts.max_line_bytes),
            )
            .await
            .map_err(|_| ConnectError::Timeout)??;
            Channel::open(transport, &opts.channel)
        }
        Endpoint::Broker { url } => {
            if !frames::is_valid_room_code(&opts.room) {
                return Err(ConnectError::InvalidRoom(opts.room.clone()));
            }
            let transport = match TopicTransport::connect(url, &opts.room, opts.connect_timeout).await {
                Ok(transport) => transport,
                Err(ChannelError::Timeout) => return Err(ConnectError::Timeout),
                Err(e) => return Err(e.into()),
            };
            Channel::open(transport, &opts.channel)
        }
    };

    let identify = Action::Identify { name: opts.name.clone() };
    if channel.send(actions::encode(&identify)).is_err() {
        channel.close();
        return Err(ChannelError::Protocol("channel closed before handshake".into()).into());
    }

    info!(name = %opts.name, room = %opts.room, endpoint = ?opts.endpoint, "peer: connected");
    Ok(Peer { channel, inbound, name: opts.name, room: opts.room })
}

/// Callback form of [`connect`]. Exactly one of the two callbacks runs,
/// exactly once, on a spawned task.
pub fn connect_with<S, F>(opts: ConnectOptions, on_success: S, on_failure: F) -> JoinHandle<()>
where
    S: FnOnce(Peer) + Send + 'static,
    F: FnOnce(ConnectError) + Send + 'static,
{
    tokio::spawn(async move {
        match connect(opts).await {
            Ok(peer) => on_success(peer),
            Err(e) => on_failure(e),
        }
    })
}

// =============================================================================
// PEER
// =============================================================================

/// An identified guest connection.
#[derive(Debug)]
pub struct Peer {
    channel: Channel,
    inbound: Inbound,
    name: String,
    room: String,
}

impl Peer {
    /// Transmit one action immediately.
    ///
    /// # Errors
    ///
    /// [`SendError::Closed`] once the connection is gone, [`SendError::Full`]
    /// if the relay is not draining the socket.
    pub fn send(&self, action: &Action) -> Result<(), SendError> {
        self.channel.send(actions::encode(action))
    }

    /// Next action from the relay, `None` once the connection has ended.
    /// Garbled lines are logged and skipped.
    pub async fn recv(&mut self) -> Option<Action> {
        loop {
            let line = self.inbound.recv().await?;
            match actions::decode(&line) {
                Ok(action) => {
                    debug!(kind = action.kind(), "peer: recv");
                    return Some(action);
                }
                Err(e) => warn!(error = %e, %line, "peer: dropped garbled line"),
            }
        }
    }

    pub fn close(&self) {
        self.channel.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Sending half, for tasks that only transmit.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

#[cfg(test)]
#[path = "connector_test.rs"]
mod tests;
