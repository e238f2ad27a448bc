//! Relay services used by the listeners, routes, and host console.
//!
//! ARCHITECTURE
//! ============
//! `room` is the actor that owns one board. `registry` maps room codes to
//! live rooms. `connection` runs the handshake and receive loop for one
//! socket over any `LineTransport`, and `lan` feeds it TCP sockets.

pub mod connection;
pub mod lan;
pub mod registry;
pub mod room;
