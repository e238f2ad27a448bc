//! Topic-broker line transport for guests.
//!
//! The broker speaks JSON `Frame`s over a websocket. After the server's
//! `session:connected` greeting the guest subscribes to its room topic and
//! waits for the acknowledgement. From then on every outbound line becomes a
//! `topic:publish` frame and every `topic:message` for the room yields one
//! inbound line.

use std::time::Duration;

use async_trait::async_trait;
use frames::{Frame, Status};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::channel::{ChannelError, LineTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TopicTransport {
    stream: WsStream,
    room: String,
    topic: String,
}

impl TopicTransport {
    /// Connect to `url`, subscribe to `room`, and wait for the broker to
    /// acknowledge the subscription. The whole sequence is bounded by
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Timeout`] if the broker is too slow,
    /// [`ChannelError::WebSocket`] for connect or socket failures, and
    /// [`ChannelError::Protocol`] if the broker refuses the subscription.
    pub async fn connect(url: &str, room: &str, timeout: Duration) -> Result<Self, ChannelError> {
        tokio::time::timeout(timeout, Self::handshake(url, room))
            .await
            .map_err(|_| ChannelError::Timeout)?
    }

    async fn handshake(url: &str, room: &str) -> Result<Self, ChannelError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ChannelError::WebSocket(e.to_string()))?;
        let mut transport = Self { stream, room: room.to_owned(), topic: frames::topic_for(room) };

        loop {
            let frame = transport.recv_frame().await?;
            if frame.syscall == frames::SYSCALL_CONNECTED {
                break;
            }
        }

        let subscribe = Frame::subscribe(room);
        let subscribe_id = subscribe.id;
        transport.send_frame(&subscribe).await?;

        loop {
            let frame = transport.recv_frame().await?;
            if frame.parent_id != Some(subscribe_id) {
                continue;
            }
            match frame.status {
                Status::Done => break,
                Status::Error => {
                    let message = frame.str_field(frames::FRAME_MESSAGE).unwrap_or("subscription refused");
                    return Err(ChannelError::Protocol(message.to_owned()));
                }
                Status::Request => {}
            }
        }

        debug!(%url, %room, "topic: subscribed");
        Ok(transport)
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(frames::encode_frame(frame).into()))
            .await
            .map_err(|e| ChannelError::WebSocket(e.to_string()))
    }

    /// Next frame from the broker. Cancel-safe: only `StreamExt::next` is awaited.
    async fn recv_frame(&mut self) -> Result<Frame, ChannelError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Err(ChannelError::WebSocket("connection closed".into()));
            };
            match message.map_err(|e| ChannelError::WebSocket(e.to_string()))? {
                Message::Text(text) => match frames::decode_frame(text.as_str()) {
                    Ok(frame) => return Ok(frame),
                    Err(e) => warn!(error = %e, "topic: invalid frame from broker"),
                },
                Message::Close(_) => return Err(ChannelError::WebSocket("connection closed".into())),
                _ => {}
            }
        }
    }
}

#[async_trait]
impl LineTransport for TopicTransport {
    async fn next_line(&mut self) -> Result<Option<String>, ChannelError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(e) => return Err(ChannelError::WebSocket(e.to_string())),
            };
            let frame = match frames::decode_frame(text.as_str()) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "topic: invalid frame from broker");
                    continue;
                }
            };
            if frame.syscall == frames::SYSCALL_ERROR || frame.status == Status::Error {
                warn!(code = ?frame.code(), message = ?frame.str_field(frames::FRAME_MESSAGE), "topic: broker error");
                continue;
            }
            if frame.syscall != frames::SYSCALL_MESSAGE || frame.destination() != Some(self.topic.as_str()) {
                continue;
            }
            if let Some(body) = frame.body() {
                return Ok(Some(body.to_owned()));
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        let frame = Frame::publish(&self.room, line);
        self.send_frame(&frame).await
    }

    async fn shutdown(&mut self) -> Result<(), ChannelError> {
        let unsubscribe = Frame::unsubscribe(&self.room);
        self.send_frame(&unsubscribe).await?;
        self.stream
            .close(None)
            .await
            .map_err(|e| ChannelError::WebSocket(e.to_string()))
    }
}
