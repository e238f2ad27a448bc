//! Line channels and the guest side of a board session.
//!
//! ARCHITECTURE
//! ============
//! `channel` turns any `LineTransport` into a clonable sender plus an
//! ordered inbound stream. `direct` (newline-framed TCP) and `topic`
//! (websocket broker frames) are the two transports. `connector` performs
//! the guest handshake and `mirror` keeps a guest's local copy of the board.

pub mod channel;
pub mod connector;
pub mod direct;
pub mod mirror;
pub mod topic;

pub use channel::{Channel, ChannelError, ChannelOptions, Inbound, LineTransport, SendError};
pub use connector::{ConnectError, ConnectOptions, Endpoint, Peer, connect, connect_with};
pub use direct::DirectTransport;
pub use mirror::{Guest, Mirror, Rejected, SubmitError};
pub use topic::TopicTransport;
