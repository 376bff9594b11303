//! Client, server, and client-host sessions for Peerlane.
//!
//! This crate turns a [`PeerBackend`](peerlane_transport::PeerBackend)
//! into the sockets a host framework drives:
//!
//! 1. **Client** ([`ClientSession`]): one outbound connection with an
//!    async connect handshake (timeout and cancellation).
//! 2. **Server** ([`ServerSession`]): a listener with admission control,
//!    connection ids ([`ConnectionRegistry`], [`IdAllocator`]), and
//!    per-peer message demultiplexing.
//! 3. **Client host** ([`ClientHostSession`]): the server's own client,
//!    wired to it through a [`LoopbackBridge`] instead of the network.
//!
//! # How it fits in the stack
//!
//! ```text
//! Host framework (above)  ← drains TransportEvents, calls pumps and sends
//!     ↕
//! Session layer (this crate)  ← connection states, ids, admission
//!     ↕
//! Protocol layer (below)  ← channel framing, shared types
//!     ↕
//! Backend  ← connect / listen / send / receive
//! ```
//!
//! Everything is driven by the host's tick: `pump_inbound` applies
//! backend status changes and delivers messages, `pump_outbound` flushes.
//! Each pump does a bounded amount of work.

pub mod address;
mod client;
mod error;
mod events;
mod loopback;
mod registry;
mod server;
mod state;

/// Most messages taken from the backend by one inbound pump.
pub const MAX_MESSAGES_PER_PUMP: usize = 256;

/// Most backend status changes applied by one inbound pump.
pub const MAX_STATUS_EVENTS_PER_PUMP: usize = 256;

pub use address::{ConnectTarget, parse_target};
pub use client::{ClientSession, MIN_HANDSHAKE_TIMEOUT, PendingHandshake};
pub use error::{AddressError, RegistryError, SessionError};
pub use events::{EventSink, EventStream, TransportEvent};
pub use loopback::{ClientHostSession, LocalPacket, LoopbackBridge};
pub use registry::{ConnectionRegistry, IdAllocator};
pub use server::ServerSession;
pub use state::LocalState;
