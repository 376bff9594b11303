//! # Peerlane
//!
//! A multi-channel transport adapter that runs a game networking
//! framework's sockets over a connection-oriented peer-to-peer backend.
//!
//! The host framework sees a client socket, a server socket, numbered
//! channels, and events. The backend sees connections, listeners, and
//! opaque byte messages. Peerlane sits between them:
//!
//! ```text
//! Host framework  ── PeerTransport ──→  sessions  ── framing ──→  PeerBackend
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peerlane::prelude::*;
//!
//! # async fn run() {
//! let network = MemoryNetwork::new();
//! let (mut transport, mut events) =
//!     PeerTransport::new(network.endpoint(), TransportConfig::default());
//!
//! transport.start_connection(true); // server
//! transport.start_connection(false); // client host
//!
//! loop {
//!     transport.iterate_incoming(true);
//!     transport.iterate_incoming(false);
//!     while let Ok(_event) = events.try_recv() {
//!         // hand the event to the game
//!     }
//!     transport.iterate_outgoing(true);
//!     transport.iterate_outgoing(false);
//!     # break;
//! }
//! # }
//! ```

mod config;
mod error;
mod transport;

pub use config::{ConfigError, TransportConfig};
pub use error::PeerlaneError;
pub use transport::PeerTransport;

pub use peerlane_protocol as protocol;
pub use peerlane_session as session;
pub use peerlane_transport as backend;

/// Installs a `tracing` subscriber that honours `RUST_LOG` and defaults
/// to `info`. Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Re-exports of the types most applications need.
pub mod prelude {
    pub use crate::{PeerTransport, PeerlaneError, TransportConfig, init_tracing};
    pub use peerlane_protocol::{
        CLIENT_HOST_ID, Channel, ChannelConfig, ConnectionId, ConnectionState,
        PeerId, RemoteConnectionState, ServerMode, SocketRole,
    };
    pub use peerlane_session::{EventStream, TransportEvent};
    pub use peerlane_transport::{
        CloseReason, IdentityToken, MemoryEndpoint, MemoryNetwork, PeerBackend,
    };
}
