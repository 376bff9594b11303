//! Unified error type for Peerlane.

use peerlane_protocol::ProtocolError;
use peerlane_session::{AddressError, RegistryError, SessionError};
use peerlane_transport::{SendError, TransportError};

use crate::ConfigError;

/// Top-level error that wraps every crate-specific error.
///
/// Socket operations never return errors (they log and report through
/// events), so this mostly shows up when loading configuration or when
/// driving a backend directly.
#[derive(Debug, thiserror::Error)]
pub enum PeerlaneError {
    /// A backend-level error (not initialized, bind, unknown connection).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A backend send failure, fatal or transient.
    #[error(transparent)]
    Send(#[from] SendError),

    /// A framing error (empty frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A socket-level error (already running, handshake failed).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An address that is neither an IP endpoint nor a peer identity.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// A connection-table conflict (duplicate id, handle, identity).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A configuration file that could not be read or parsed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
