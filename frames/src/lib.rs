//! Topic-broker envelope shared by the relay's `/ws` route and guest peers.
//!
//! ARCHITECTURE
//! ============
//! A guest that cannot reach the relay directly talks to a broker websocket.
//! Every websocket text message is one JSON `Frame`. The guest subscribes to
//! `/topic/board/{room}` and publishes board lines to `/app/board/{room}`;
//! the broker wraps each line the relay sends in a `topic:message` frame.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`, never nested.
//! - Responses correlate to requests via `parent_id`.
//! - Board lines travel verbatim in `data.body`. The envelope never looks
//!   inside them.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// SYSCALLS AND FIELDS
// =============================================================================

/// Server greeting sent once after the websocket upgrade.
pub const SYSCALL_CONNECTED: &str = "session:connected";
pub const SYSCALL_SUBSCRIBE: &str = "topic:subscribe";
pub const SYSCALL_UNSUBSCRIBE: &str = "topic:unsubscribe";
pub const SYSCALL_PUBLISH: &str = "topic:publish";
/// Server push carrying one line for a subscribed destination.
pub const SYSCALL_MESSAGE: &str = "topic:message";
/// Unsolicited error with no request to reply to.
pub const SYSCALL_ERROR: &str = "gateway:error";

pub const FRAME_DESTINATION: &str = "destination";
pub const FRAME_BODY: &str = "body";
pub const FRAME_MESSAGE: &str = "message";
pub const FRAME_CODE: &str = "code";
pub const FRAME_RETRYABLE: &str = "retryable";

const TOPIC_PREFIX: &str = "/topic/board/";
const APP_PREFIX: &str = "/app/board/";
const MAX_ROOM_CODE_LEN: usize = 64;

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// Lifecycle position of a frame. Every exchange is `request → done` or
/// `request → error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

impl Status {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    pub ts: i64,
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    #[must_use]
    pub fn connected() -> Self {
        Self::request(SYSCALL_CONNECTED, Data::new())
    }

    #[must_use]
    pub fn subscribe(room: &str) -> Self {
        Self::request(SYSCALL_SUBSCRIBE, Data::new()).with_data(FRAME_DESTINATION, topic_for(room))
    }

    #[must_use]
    pub fn unsubscribe(room: &str) -> Self {
        Self::request(SYSCALL_UNSUBSCRIBE, Data::new()).with_data(FRAME_DESTINATION, topic_for(room))
    }

    /// Guest line headed for the relay.
    #[must_use]
    pub fn publish(room: &str, body: impl Into<String>) -> Self {
        Self::request(SYSCALL_PUBLISH, Data::new())
            .with_data(FRAME_DESTINATION, app_destination_for(room))
            .with_data(FRAME_BODY, body.into())
    }

    /// Relay line headed for a subscribed guest.
    #[must_use]
    pub fn message(room: &str, body: impl Into<String>) -> Self {
        Self::request(SYSCALL_MESSAGE, Data::new())
            .with_data(FRAME_DESTINATION, topic_for(room))
            .with_data(FRAME_BODY, body.into())
    }

    /// Unsolicited structured error, e.g. for an unparseable inbound frame.
    #[must_use]
    pub fn gateway_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut frame = Self::request(SYSCALL_ERROR, error_data(err));
        frame.status = Status::Error;
        frame
    }

    /// Successful terminal reply.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(message.into()));
        self.reply(Status::Error, data)
    }

    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        self.reply(Status::Error, error_data(err))
    }

    /// Build a reply frame. Inherits `syscall` and points `parent_id` here.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }
}

fn error_data(err: &(impl ErrorCode + ?Sized)) -> Data {
    let mut data = Data::new();
    data.insert(FRAME_CODE.into(), serde_json::Value::String(err.error_code().to_owned()));
    data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(err.to_string()));
    data.insert(FRAME_RETRYABLE.into(), serde_json::Value::Bool(err.retryable()));
    data
}

// =============================================================================
// BUILDERS AND ACCESSORS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Extract the syscall prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.syscall.split_once(':') else {
            return &self.syscall;
        };
        prefix
    }

    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.str_field(FRAME_DESTINATION)
    }

    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.str_field(FRAME_BODY)
    }

    /// Error code of an error frame, if it carries one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.str_field(FRAME_CODE)
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode a frame as one JSON websocket text message.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    // Serializing a struct of strings, numbers and a string-keyed map cannot fail.
    serde_json::to_string(frame).unwrap_or_default()
}

/// Decode one websocket text message.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed JSON or missing fields.
pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    Ok(serde_json::from_str(text)?)
}

// =============================================================================
// DESTINATIONS
// =============================================================================

/// Subscription topic guests listen on.
#[must_use]
pub fn topic_for(room: &str) -> String {
    format!("{TOPIC_PREFIX}{room}")
}

/// Destination guests publish to.
#[must_use]
pub fn app_destination_for(room: &str) -> String {
    format!("{APP_PREFIX}{room}")
}

#[must_use]
pub fn room_from_topic(destination: &str) -> Option<&str> {
    destination
        .strip_prefix(TOPIC_PREFIX)
        .filter(|room| is_valid_room_code(room))
}

#[must_use]
pub fn room_from_app(destination: &str) -> Option<&str> {
    destination
        .strip_prefix(APP_PREFIX)
        .filter(|room| is_valid_room_code(room))
}

/// Room codes are 1 to 64 characters of ASCII alphanumerics, `-` or `_`.
#[must_use]
pub fn is_valid_room_code(room: &str) -> bool {
    !room.is_empty()
        && room.len() <= MAX_ROOM_CODE_LEN
        && room.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
