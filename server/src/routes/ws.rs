//! WebSocket topic broker: JSON frames in, board lines out.
//!
//! DESIGN
//! ======
//! The broker is a thin binding in front of the room actors. Once a client
//! subscribes to `/topic/board/{room}` the socket becomes a `LineTransport`:
//! every `topic:publish` to `/app/board/{room}` yields one inbound line, and
//! every outbound line goes back as a `topic:message` on the room topic. From
//! there the connection follows the same lifecycle as a direct TCP guest.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected`
//! 2. Client sends `topic:subscribe` → `done` reply (or `error`)
//! 3. Client publishes lines, starting with `IDENTIFY:<name>`
//! 4. `topic:unsubscribe` or close → participant leaves

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use frames::{ErrorCode, Frame};
use peer::{ChannelError, LineTransport};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::connection::serve_connection;
use crate::services::room::RoomHandle;
use crate::state::AppState;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("invalid destination {0:?}")]
    InvalidDestination(String),
    #[error("subscribe to a room topic first")]
    NotSubscribed,
    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),
    #[error("unknown syscall {0:?}")]
    UnknownSyscall(String),
}

impl ErrorCode for BrokerError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidFrame(_) => "E_INVALID_FRAME",
            Self::InvalidDestination(_) => "E_INVALID_DESTINATION",
            Self::NotSubscribed => "E_NOT_SUBSCRIBED",
            Self::AlreadySubscribed(_) => "E_ALREADY_SUBSCRIBED",
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
        }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let welcome = Frame::connected().with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }
    info!(%client_id, "ws: client connected");

    let subscribed = tokio::time::timeout(state.config.handshake_timeout, await_subscribe(&mut socket, &state)).await;
    let room = match subscribed {
        Ok(Some(room)) => room,
        Ok(None) => {
            info!(%client_id, "ws: client left before subscribing");
            return;
        }
        Err(_) => {
            warn!(%client_id, "ws: no subscription before timeout");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    info!(%client_id, room = %room.code(), "ws: subscribed");

    let transport = BrokerTransport::new(socket, room.code());
    serve_connection(state, room, transport, format!("ws-{client_id}")).await;
    info!(%client_id, "ws: client disconnected");
}

/// Read frames until a valid room subscription arrives. Returns `None` if
/// the client goes away first.
async fn await_subscribe(socket: &mut WebSocket, state: &AppState) -> Option<RoomHandle> {
    loop {
        let frame = match recv_frame(socket).await? {
            Ok(frame) => frame,
            Err(err) => {
                send_frame(socket, &Frame::gateway_error(&err)).await.ok()?;
                continue;
            }
        };

        let reply = match frame.syscall.as_str() {
            frames::SYSCALL_SUBSCRIBE => match subscribe_target(&frame) {
                Ok(code) => match state.rooms.get_or_open(code).await {
                    Ok(room) => {
                        send_frame(socket, &frame.done()).await.ok()?;
                        return Some(room);
                    }
                    Err(e) => frame.error_from(&e),
                },
                Err(e) => frame.error_from(&e),
            },
            frames::SYSCALL_PUBLISH | frames::SYSCALL_UNSUBSCRIBE => frame.error_from(&BrokerError::NotSubscribed),
            other => frame.error_from(&BrokerError::UnknownSyscall(other.to_owned())),
        };
        send_frame(socket, &reply).await.ok()?;
    }
}

fn subscribe_target(frame: &Frame) -> Result<&str, BrokerError> {
    let destination = frame.destination().unwrap_or_default();
    frames::room_from_topic(destination)
        .filter(|room| frames::is_valid_room_code(room))
        .ok_or_else(|| BrokerError::InvalidDestination(destination.to_owned()))
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// A subscribed websocket seen as a line transport for one room.
struct BrokerTransport {
    socket: WebSocket,
    room: String,
    app_destination: String,
}

impl BrokerTransport {
    fn new(socket: WebSocket, room: &str) -> Self {
        Self { socket, room: room.to_owned(), app_destination: frames::app_destination_for(room) }
    }

    async fn reply(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        send_frame(&mut self.socket, frame)
            .await
            .map_err(|e| ChannelError::WebSocket(e.to_string()))
    }
}

#[async_trait]
impl LineTransport for BrokerTransport {
    async fn next_line(&mut self) -> Result<Option<String>, ChannelError> {
        loop {
            let frame = match recv_frame(&mut self.socket).await {
                None => return Ok(None),
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    self.reply(&Frame::gateway_error(&err)).await?;
                    continue;
                }
            };

            match frame.syscall.as_str() {
                frames::SYSCALL_PUBLISH => {
                    if frame.destination() != Some(self.app_destination.as_str()) {
                        let err = BrokerError::InvalidDestination(frame.destination().unwrap_or_default().to_owned());
                        self.reply(&frame.error_from(&err)).await?;
                        continue;
                    }
                    match frame.body() {
                        Some(body) => return Ok(Some(body.to_owned())),
                        None => self.reply(&frame.error("publish without body")).await?,
                    }
                }
                frames::SYSCALL_UNSUBSCRIBE => {
                    debug!(room = %self.room, "ws: unsubscribed");
                    let _ = self.reply(&frame.done()).await;
                    return Ok(None);
                }
                frames::SYSCALL_SUBSCRIBE => {
                    let err = BrokerError::AlreadySubscribed(frames::topic_for(&self.room));
                    self.reply(&frame.error_from(&err)).await?;
                }
                other => {
                    let err = BrokerError::UnknownSyscall(other.to_owned());
                    self.reply(&frame.error_from(&err)).await?;
                }
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        self.reply(&Frame::message(&self.room, line)).await
    }

    async fn shutdown(&mut self) -> Result<(), ChannelError> {
        self.socket
            .send(Message::Close(None))
            .await
            .map_err(|e| ChannelError::WebSocket(e.to_string()))
    }
}

// =============================================================================
// FRAME I/O
// =============================================================================

/// Next frame from the client. `None` once the socket is closed; `Some(Err)`
/// for text that is not a frame. Non-text messages are skipped.
async fn recv_frame(socket: &mut WebSocket) -> Option<Result<Frame, BrokerError>> {
    loop {
        match socket.recv().await? {
            Ok(Message::Text(text)) => {
                return Some(frames::decode_frame(text.as_str()).map_err(|e| BrokerError::InvalidFrame(e.to_string())));
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    socket.send(Message::Text(frames::encode_frame(frame).into())).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
