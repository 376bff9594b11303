//! Core types shared by every Peerlane socket.
//!
//! These are the values a host framework sees: which lane a message
//! travelled on ([`Channel`]), what state a socket is in
//! ([`ConnectionState`], [`RemoteConnectionState`]), and who a message
//! came from ([`PeerId`]).

use std::fmt;

use peerlane_transport::Reliability;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A logical lane of communication.
///
/// Host frameworks usually define two lanes (reliable and unreliable),
/// but any `u8` value is carried through the framing unchanged, so a
/// channel is a newtype over the raw byte rather than a closed enum.
///
/// `#[serde(transparent)]` serializes `Channel(1)` as plain `1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize, Default,
)]
#[serde(transparent)]
pub struct Channel(pub u8);

impl Channel {
    /// Delivered in order, no loss.
    pub const RELIABLE: Channel = Channel(0);

    /// May be lost or arrive out of order.
    pub const UNRELIABLE: Channel = Channel(1);

    /// The delivery class requested from the backend for this lane.
    ///
    /// Only [`Channel::UNRELIABLE`] maps to unreliable delivery; every
    /// other lane is sent reliably.
    pub fn reliability(self) -> Reliability {
        if self == Self::UNRELIABLE {
            Reliability::Unreliable
        } else {
            Reliability::Reliable
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::RELIABLE => write!(f, "reliable"),
            Self::UNRELIABLE => write!(f, "unreliable"),
            Self(other) => write!(f, "channel-{other}"),
        }
    }
}

/// Default maximum transmission unit for a channel, in bytes.
pub const DEFAULT_MTU: usize = 1200;

/// Per-channel tuning: which lane, and the largest payload it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: Channel,
    #[serde(default = "default_mtu")]
    pub mtu: usize,
}

fn default_mtu() -> usize {
    DEFAULT_MTU
}

impl ChannelConfig {
    /// A channel with the default MTU.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            mtu: DEFAULT_MTU,
        }
    }

    /// A channel with an explicit MTU.
    pub fn with_mtu(channel: Channel, mtu: usize) -> Self {
        Self { channel, mtu }
    }
}

// ---------------------------------------------------------------------------
// Connection states
// ---------------------------------------------------------------------------

/// State of a local socket (the client, the server, or the client host).
///
/// ```text
/// Stopped → Starting → Started → Stopping → Stopped
/// ```
///
/// Nothing enforces the order; sockets only ever request sensible
/// transitions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
pub enum ConnectionState {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Started => write!(f, "Started"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

/// State of a remote peer as seen by the server.
///
/// The server cannot observe a peer half-way through connecting, so
/// there are only two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteConnectionState {
    Stopped,
    Started,
}

/// Which side of the transport a local state change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketRole {
    Client,
    Server,
}

/// How a server makes itself reachable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// Listen through the relay under the local identity. Clients
    /// connect with the host's identity token.
    #[default]
    PeerRelay,
    /// Bind a socket address and accept direct connections.
    Dedicated,
}

// ---------------------------------------------------------------------------
// Peer identity
// ---------------------------------------------------------------------------

/// Raw id reported to host frameworks for the client host.
///
/// Remote connection ids always stay below this value because the
/// server clamps its client limit to `CLIENT_HOST_ID - 1`.
pub const CLIENT_HOST_ID: u32 = i16::MAX as u32;

/// Largest client limit a server accepts.
pub const MAX_CLIENTS: u32 = CLIENT_HOST_ID - 1;

/// Small integer a server assigns to a remote peer. Ids are recycled
/// after the peer disconnects.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who a server-side message or state change refers to.
///
/// The client host gets its own variant instead of a magic connection
/// id, so it can never be confused with a backend-assigned peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerId {
    /// A peer connected through the backend.
    Remote(ConnectionId),
    /// The client running inside the server's own process.
    LocalHost,
}

impl PeerId {
    /// Flat integer form for host frameworks that index peers by number.
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Remote(id) => id.0,
            Self::LocalHost => CLIENT_HOST_ID,
        }
    }

    /// Inverse of [`as_raw`](Self::as_raw).
    pub fn from_raw(raw: u32) -> Self {
        if raw == CLIENT_HOST_ID {
            Self::LocalHost
        } else {
            Self::Remote(ConnectionId(raw))
        }
    }
}

impl From<ConnectionId> for PeerId {
    fn from(id: ConnectionId) -> Self {
        Self::Remote(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(id) => write!(f, "peer-{id}"),
            Self::LocalHost => write!(f, "client-host"),
        }
    }
}
