//! Peer-connection backend abstraction for Peerlane.
//!
//! Peerlane does not implement networking itself. It drives a
//! connection-oriented backend (a relay network, a platform socket
//! service, or the in-memory simulation in this crate) through the
//! [`PeerBackend`] trait:
//!
//! - **Connections** are identified by opaque [`ConnectionHandle`]s.
//! - **Listeners** ([`ListenerId`]) accept inbound connections, either
//!   bound to a socket address or reachable through the relay.
//! - **Status changes** ([`StatusChange`]) are pushed into a channel
//!   obtained from [`PeerBackend::subscribe`]. The backend may produce
//!   them on any thread; consumers drain them on their own schedule.
//!
//! # Feature Flags
//!
//! - `memory` (default): [`MemoryNetwork`], an in-process backend used
//!   by tests and demos.

mod error;
#[cfg(feature = "memory")]
mod memory;

pub use error::{SendError, TransportError};
#[cfg(feature = "memory")]
pub use memory::{MemoryEndpoint, MemoryNetwork};

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use tokio::sync::mpsc;

/// Opaque identifier for a live backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Creates a new `ConnectionHandle` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifier for a listening socket opened with
/// [`PeerBackend::listen`] or [`PeerBackend::listen_relay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u32);

impl ListenerId {
    /// Creates a new `ListenerId` from a raw `u32`.
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Backend-provided identity of a peer (an account or user id).
///
/// It is also the address used for relay connections, which is why it
/// parses from the decimal text a user would type into a "connect to"
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityToken(pub u64);

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IdentityToken {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Lifecycle of a backend connection as reported in [`StatusChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection (or the connection was destroyed).
    None,
    /// A connection attempt is in progress. On a listener this means a
    /// remote peer is waiting to be accepted or rejected.
    Connecting,
    /// The backend is still looking up a route to the peer.
    FindingRoute,
    /// The connection is established.
    Connected,
    /// The remote end closed the connection.
    ClosedByPeer,
    /// The local side detected a problem (timeout, route lost).
    ProblemDetectedLocally,
}

impl ConnectionStatus {
    /// Returns `true` for the statuses that end a connection.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::ClosedByPeer | Self::ProblemDetectedLocally)
    }
}

/// A connection status notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// The connection whose status changed.
    pub handle: ConnectionHandle,
    /// The listener that accepted this connection, or `None` for
    /// outbound connections.
    pub listener: Option<ListenerId>,
    /// The new status.
    pub status: ConnectionStatus,
    /// Identity of the peer on the other end.
    pub remote: IdentityToken,
    /// Human-readable reason when the connection ended.
    pub end_reason: Option<String>,
}

/// Sending half of a status subscription (held by the backend).
pub type StatusSender = mpsc::UnboundedSender<StatusChange>;

/// Receiving half of a status subscription. Dropping it unregisters.
pub type StatusReceiver = mpsc::UnboundedReceiver<StatusChange>;

/// Delivery class requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    Unreliable,
}

/// Reason code and text attached to a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: i32,
    pub text: String,
}

impl CloseReason {
    /// The reason used for ordinary, locally requested disconnects.
    pub fn graceful() -> Self {
        Self {
            code: 0,
            text: "Graceful disconnect".to_string(),
        }
    }

    /// The reason used when a server turns away a peer because it is full.
    pub fn max_connections() -> Self {
        Self {
            code: 0,
            text: "Max Connection Count".to_string(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.text, self.code)
    }
}

/// A connection-oriented peer-to-peer networking service.
///
/// Every method is synchronous and non-blocking; the backend does its
/// own I/O in the background and reports connection lifecycle through
/// [`subscribe`](Self::subscribe).
pub trait PeerBackend: Send + Sync + 'static {
    /// Returns `false` if the backend cannot be used yet.
    fn is_initialized(&self) -> bool;

    /// The identity other peers see for this endpoint.
    fn local_identity(&self) -> IdentityToken;

    /// Registers for connection status changes. Every subscriber gets
    /// every change for connections owned by this endpoint. Dropping the
    /// receiver unregisters.
    fn subscribe(&self) -> StatusReceiver;

    /// Opens a direct connection to a socket address.
    fn connect(
        &self,
        addr: SocketAddr,
    ) -> Result<ConnectionHandle, TransportError>;

    /// Opens a relayed connection to the peer with the given identity.
    fn connect_relay(
        &self,
        identity: IdentityToken,
    ) -> Result<ConnectionHandle, TransportError>;

    /// Opens a listener bound to a socket address.
    fn listen(&self, addr: SocketAddr) -> Result<ListenerId, TransportError>;

    /// Opens a listener reachable through the relay by this endpoint's
    /// identity.
    fn listen_relay(&self) -> Result<ListenerId, TransportError>;

    /// Closes a listener. Connections accepted by it are dropped.
    fn close_listener(&self, listener: ListenerId);

    /// Accepts a connection reported as
    /// [`Connecting`](ConnectionStatus::Connecting) on a listener.
    fn accept(&self, handle: ConnectionHandle) -> Result<(), TransportError>;

    /// Closes a connection, telling the peer why.
    fn close(&self, handle: ConnectionHandle, reason: CloseReason);

    /// Queues a message on a connection.
    fn send(
        &self,
        handle: ConnectionHandle,
        data: &[u8],
        reliability: Reliability,
    ) -> Result<(), SendError>;

    /// Pushes queued messages for a connection onto the wire.
    fn flush(&self, handle: ConnectionHandle);

    /// Takes up to `max` received messages from an outbound connection.
    fn receive(&self, handle: ConnectionHandle, max: usize) -> Vec<Vec<u8>>;

    /// Takes up to `max` received messages across every connection
    /// accepted by a listener.
    fn receive_on_listener(
        &self,
        listener: ListenerId,
        max: usize,
    ) -> Vec<(ConnectionHandle, Vec<u8>)>;
}
