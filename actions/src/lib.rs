//! Board actions and the line codec shared by the relay and its guests.
//!
//! ARCHITECTURE
//! ============
//! Every message on a board connection is one UTF-8 line of the form
//! `KIND:field,field,...`. The first `:` splits the kind token from the
//! payload and `,` splits payload fields. Free text (sticky notes, chat) is
//! always the last field and is taken verbatim on decode; the encoder strips
//! `:`, `,` and line breaks from user text so it cannot break framing.
//!
//! DESIGN
//! ======
//! - `Action` is a closed enum. Kinds this build does not know decode to
//!   `Action::Unknown` so the caller decides whether to relay or drop them.
//! - Decoding never panics. Garbled input yields a `DecodeError` the caller
//!   logs before moving on to the next line.
//! - Numbers are written with the shortest exact decimal form, so every
//!   finite coordinate survives a round trip. Fixed-point input such as
//!   `10.00` decodes as well.

mod renderer;
mod timeline;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use renderer::{NullRenderer, Renderer};
pub use timeline::{Effect, Timeline};

// =============================================================================
// KIND TOKENS
// =============================================================================

pub const KIND_IDENTIFY: &str = "IDENTIFY";
pub const KIND_DRAW: &str = "DRAW";
pub const KIND_ERASE: &str = "ERASE";
pub const KIND_RECTANGLE: &str = "RECTANGLE";
pub const KIND_OVAL: &str = "OVAL";
pub const KIND_STICKY_NOTE: &str = "STICKY_NOTE";
pub const KIND_CHAT: &str = "CHAT";
pub const KIND_CLEAR: &str = "CLEAR";
pub const KIND_UNDO: &str = "UNDO";
pub const KIND_REDO: &str = "REDO";
pub const KIND_LOCK_BOARD: &str = "LOCK_BOARD";
pub const KIND_UNLOCK_BOARD: &str = "UNLOCK_BOARD";
pub const KIND_USER_LIST: &str = "USER_LIST";
pub const KIND_KICKED: &str = "YOU_WERE_KICKED";
pub const KIND_SCREEN_SHARE: &str = "SCREEN_SHARE";
pub const KIND_SCREEN_SHARE_STATUS: &str = "SCREEN_SHARE_STATUS";

// =============================================================================
// TYPES
// =============================================================================

/// One atomic board mutation, control command, or chat event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Handshake line a guest sends before anything else.
    Identify { name: String },
    Draw { x0: f64, y0: f64, x1: f64, y1: f64, color: String },
    Erase { x: f64, y: f64, size: f64 },
    Rectangle { x: f64, y: f64, w: f64, h: f64, color: String },
    Oval { x: f64, y: f64, w: f64, h: f64, color: String },
    StickyNote { x: f64, y: f64, text: String },
    Chat { author: String, text: String },
    Clear,
    Undo,
    Redo,
    LockBoard,
    UnlockBoard,
    /// Roster broadcast, in join order.
    UserList { names: Vec<String> },
    Kicked,
    /// Screen-share frame. The payload is opaque to the relay.
    ScreenShare { payload: String },
    ScreenShareStatus { payload: String },
    /// A well-formed kind token this build does not recognise.
    Unknown { kind: String, payload: Option<String> },
}

/// How the relay treats an action. See [`Action::class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    Handshake,
    /// Draw, erase, shapes, sticky notes: recorded in history.
    Stroke,
    /// Clear, undo, redo: every participant redraws from the history snapshot.
    Resync,
    Chat,
    Lock,
    Roster,
    Kicked,
    /// Opaque payloads forwarded without touching session state.
    Passthrough,
    Unknown,
}

/// Error returned by [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,
    #[error("invalid action kind {0:?}")]
    InvalidKind(String),
    #[error("{kind} requires a payload")]
    MissingPayload { kind: &'static str },
    #[error("{kind} takes no payload")]
    UnexpectedPayload { kind: &'static str },
    #[error("{kind} expects {expected} fields, found {found}")]
    FieldCount { kind: &'static str, expected: usize, found: usize },
    #[error("{kind}: invalid number {value:?}")]
    InvalidNumber { kind: &'static str, value: String },
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

impl Action {
    /// Wire kind token, e.g. `"DRAW"`.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Identify { .. } => KIND_IDENTIFY,
            Self::Draw { .. } => KIND_DRAW,
            Self::Erase { .. } => KIND_ERASE,
            Self::Rectangle { .. } => KIND_RECTANGLE,
            Self::Oval { .. } => KIND_OVAL,
            Self::StickyNote { .. } => KIND_STICKY_NOTE,
            Self::Chat { .. } => KIND_CHAT,
            Self::Clear => KIND_CLEAR,
            Self::Undo => KIND_UNDO,
            Self::Redo => KIND_REDO,
            Self::LockBoard => KIND_LOCK_BOARD,
            Self::UnlockBoard => KIND_UNLOCK_BOARD,
            Self::UserList { .. } => KIND_USER_LIST,
            Self::Kicked => KIND_KICKED,
            Self::ScreenShare { .. } => KIND_SCREEN_SHARE,
            Self::ScreenShareStatus { .. } => KIND_SCREEN_SHARE_STATUS,
            Self::Unknown { kind, .. } => kind.as_str(),
        }
    }

    #[must_use]
    pub fn class(&self) -> ActionClass {
        match self {
            Self::Identify { .. } => ActionClass::Handshake,
            Self::Draw { .. }
            | Self::Erase { .. }
            | Self::Rectangle { .. }
            | Self::Oval { .. }
            | Self::StickyNote { .. } => ActionClass::Stroke,
            Self::Clear | Self::Undo | Self::Redo => ActionClass::Resync,
            Self::Chat { .. } => ActionClass::Chat,
            Self::LockBoard | Self::UnlockBoard => ActionClass::Lock,
            Self::UserList { .. } => ActionClass::Roster,
            Self::Kicked => ActionClass::Kicked,
            Self::ScreenShare { .. } | Self::ScreenShareStatus { .. } => ActionClass::Passthrough,
            Self::Unknown { .. } => ActionClass::Unknown,
        }
    }

    /// True for actions recorded in the session history.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        self.class() == ActionClass::Stroke
    }

    /// True for actions a locked board refuses from guests other than the
    /// lock holder: strokes, resync commands, and lock changes.
    #[must_use]
    pub fn is_gated(&self) -> bool {
        matches!(self.class(), ActionClass::Stroke | ActionClass::Resync | ActionClass::Lock)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self))
    }
}

impl FromStr for Action {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

// =============================================================================
// ENCODE
// =============================================================================

/// Encode an action as one wire line, without the trailing newline.
#[must_use]
pub fn encode(action: &Action) -> String {
    match action {
        Action::Identify { name } => format!("{KIND_IDENTIFY}:{}", sanitize(name)),
        Action::Draw { x0, y0, x1, y1, color } => {
            format!("{KIND_DRAW}:{x0},{y0},{x1},{y1},{}", sanitize(color))
        }
        Action::Erase { x, y, size } => format!("{KIND_ERASE}:{x},{y},{size}"),
        Action::Rectangle { x, y, w, h, color } => {
            format!("{KIND_RECTANGLE}:{x},{y},{w},{h},{}", sanitize(color))
        }
        Action::Oval { x, y, w, h, color } => format!("{KIND_OVAL}:{x},{y},{w},{h},{}", sanitize(color)),
        Action::StickyNote { x, y, text } => format!("{KIND_STICKY_NOTE}:{x},{y},{}", sanitize(text)),
        Action::Chat { author, text } => format!("{KIND_CHAT}:{}: {}", sanitize(author), sanitize(text)),
        Action::Clear => KIND_CLEAR.to_owned(),
        Action::Undo => KIND_UNDO.to_owned(),
        Action::Redo => KIND_REDO.to_owned(),
        Action::LockBoard => KIND_LOCK_BOARD.to_owned(),
        Action::UnlockBoard => KIND_UNLOCK_BOARD.to_owned(),
        Action::UserList { names } => {
            let names: Vec<String> = names.iter().map(|n| sanitize(n)).collect();
            format!("{KIND_USER_LIST}:{}", names.join(","))
        }
        Action::Kicked => KIND_KICKED.to_owned(),
        Action::ScreenShare { payload } => format!("{KIND_SCREEN_SHARE}:{}", strip_line_breaks(payload)),
        Action::ScreenShareStatus { payload } => {
            format!("{KIND_SCREEN_SHARE_STATUS}:{}", strip_line_breaks(payload))
        }
        Action::Unknown { kind, payload } => match payload {
            Some(payload) => format!("{kind}:{}", strip_line_breaks(payload)),
            None => kind.clone(),
        },
    }
}

/// Remove the framing characters (`:`, `,`, CR, LF) from user text.
#[must_use]
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, ':' | ',' | '\n' | '\r'))
        .collect()
}

fn strip_line_breaks(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '\n' | '\r')).collect()
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode one wire line. A trailing CR/LF is ignored.
///
/// # Errors
///
/// Returns a [`DecodeError`] describing why the line is not a valid action.
pub fn decode(line: &str) -> Result<Action, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }

    let (kind, payload) = match line.split_once(':') {
        Some((kind, payload)) => (kind, Some(payload)),
        None => (line, None),
    };

    if !is_kind_token(kind) {
        return Err(DecodeError::InvalidKind(kind.to_owned()));
    }

    match kind {
        KIND_IDENTIFY => {
            let name = required(KIND_IDENTIFY, payload)?;
            Ok(Action::Identify { name: name.to_owned() })
        }
        KIND_DRAW => {
            let f = fields(KIND_DRAW, payload, 5)?;
            Ok(Action::Draw {
                x0: number(KIND_DRAW, f[0])?,
                y0: number(KIND_DRAW, f[1])?,
                x1: number(KIND_DRAW, f[2])?,
                y1: number(KIND_DRAW, f[3])?,
                color: f[4].to_owned(),
            })
        }
        KIND_ERASE => {
            let f = fields(KIND_ERASE, payload, 3)?;
            Ok(Action::Erase {
                x: number(KIND_ERASE, f[0])?,
                y: number(KIND_ERASE, f[1])?,
                size: number(KIND_ERASE, f[2])?,
            })
        }
        KIND_RECTANGLE => {
            let (x, y, w, h, color) = shape(KIND_RECTANGLE, payload)?;
            Ok(Action::Rectangle { x, y, w, h, color })
        }
        KIND_OVAL => {
            let (x, y, w, h, color) = shape(KIND_OVAL, payload)?;
            Ok(Action::Oval { x, y, w, h, color })
        }
        KIND_STICKY_NOTE => {
            let payload = required(KIND_STICKY_NOTE, payload)?;
            let parts: Vec<&str> = payload.splitn(3, ',').collect();
            let &[x, y, text] = parts.as_slice() else {
                return Err(DecodeError::FieldCount { kind: KIND_STICKY_NOTE, expected: 3, found: parts.len() });
            };
            Ok(Action::StickyNote {
                x: number(KIND_STICKY_NOTE, x)?,
                y: number(KIND_STICKY_NOTE, y)?,
                text: text.to_owned(),
            })
        }
        KIND_CHAT => {
            let payload = required(KIND_CHAT, payload)?;
            let Some((author, text)) = payload.split_once(':') else {
                return Err(DecodeError::FieldCount { kind: KIND_CHAT, expected: 2, found: 1 });
            };
            let text = text.strip_prefix(' ').unwrap_or(text);
            Ok(Action::Chat { author: author.to_owned(), text: text.to_owned() })
        }
        KIND_CLEAR => bare(KIND_CLEAR, payload, Action::Clear),
        KIND_UNDO => bare(KIND_UNDO, payload, Action::Undo),
        KIND_REDO => bare(KIND_REDO, payload, Action::Redo),
        KIND_LOCK_BOARD => bare(KIND_LOCK_BOARD, payload, Action::LockBoard),
        KIND_UNLOCK_BOARD => bare(KIND_UNLOCK_BOARD, payload, Action::UnlockBoard),
        KIND_KICKED => bare(KIND_KICKED, payload, Action::Kicked),
        KIND_USER_LIST => {
            let names = match payload {
                None | Some("") => Vec::new(),
                Some(list) => list.split(',').map(str::to_owned).collect(),
            };
            Ok(Action::UserList { names })
        }
        KIND_SCREEN_SHARE => {
            let payload = required(KIND_SCREEN_SHARE, payload)?;
            Ok(Action::ScreenShare { payload: payload.to_owned() })
        }
        KIND_SCREEN_SHARE_STATUS => {
            let payload = required(KIND_SCREEN_SHARE_STATUS, payload)?;
            Ok(Action::ScreenShareStatus { payload: payload.to_owned() })
        }
        other => Ok(Action::Unknown { kind: other.to_owned(), payload: payload.map(str::to_owned) }),
    }
}

/// Kind tokens are upper-case ASCII words: `[A-Z][A-Z0-9_]*`.
fn is_kind_token(kind: &str) -> bool {
    let mut chars = kind.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_uppercase() && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn required<'a>(kind: &'static str, payload: Option<&'a str>) -> Result<&'a str, DecodeError> {
    match payload {
        Some(p) if !p.is_empty() => Ok(p),
        _ => Err(DecodeError::MissingPayload { kind }),
    }
}

fn bare(kind: &'static str, payload: Option<&str>, action: Action) -> Result<Action, DecodeError> {
    match payload {
        None | Some("") => Ok(action),
        Some(_) => Err(DecodeError::UnexpectedPayload { kind }),
    }
}

fn fields<'a>(kind: &'static str, payload: Option<&'a str>, expected: usize) -> Result<Vec<&'a str>, DecodeError> {
    let payload = required(kind, payload)?;
    let parts: Vec<&str> = payload.split(',').collect();
    if parts.len() != expected {
        return Err(DecodeError::FieldCount { kind, expected, found: parts.len() });
    }
    Ok(parts)
}

fn shape(kind: &'static str, payload: Option<&str>) -> Result<(f64, f64, f64, f64, String), DecodeError> {
    let f = fields(kind, payload, 5)?;
    Ok((number(kind, f[0])?, number(kind, f[1])?, number(kind, f[2])?, number(kind, f[3])?, f[4].to_owned()))
}

fn number(kind: &'static str, field: &str) -> Result<f64, DecodeError> {
    match field.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DecodeError::InvalidNumber { kind, value: field.to_owned() }),
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
