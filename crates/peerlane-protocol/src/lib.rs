//! Wire framing and shared types for Peerlane.
//!
//! This crate defines:
//!
//! - **Types** ([`Channel`], [`ConnectionState`], [`PeerId`], etc.):
//!   the values host frameworks exchange with Peerlane sockets.
//! - **Framing** ([`frame`], [`decode`] and friends): the one-byte
//!   trailing channel tag that lets several lanes share one backend
//!   connection.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Backend (opaque bytes) → Protocol (payload + channel) → Session (peer ids, states)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{decode, decode_owned, encode_in_place, frame};
pub use error::ProtocolError;
pub use types::{
    CLIENT_HOST_ID, Channel, ChannelConfig, ConnectionId, ConnectionState,
    DEFAULT_MTU, MAX_CLIENTS, PeerId, RemoteConnectionState, ServerMode,
    SocketRole,
};
