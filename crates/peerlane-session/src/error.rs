//! Error types for the session layer.
//!
//! Session operations never return these to the host framework; they
//! are logged and turned into state changes at the operation boundary.
//! They exist so the setup paths can use `?` internally and so every
//! failure has one readable message.

use peerlane_protocol::ConnectionId;
use peerlane_transport::{ConnectionHandle, IdentityToken, TransportError};

/// Errors that can occur while starting or running a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The backend refused to connect or listen.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The address could not be understood.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// The backend reports that it is not initialized.
    #[error("backend not initialized")]
    BackendNotInitialized,

    /// The session is already running.
    #[error("session already running")]
    AlreadyRunning,

    /// The peer never answered within the timeout.
    #[error("connection to {0} timed out")]
    HandshakeTimedOut(String),

    /// The connection attempt was cancelled by a stop.
    #[error("connection attempt was cancelled")]
    HandshakeCancelled,

    /// The remote end closed the connection during the handshake.
    #[error("connection closed during handshake: {0}")]
    HandshakeRejected(String),
}

/// The text given as a connect address is neither a network address
/// nor a relay identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection string {0:?} is not an address or a peer identity")]
pub struct AddressError(pub String);

/// Uniqueness violations in the connection registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection id {0} is already registered")]
    DuplicateId(ConnectionId),

    #[error("backend connection {0} is already registered")]
    DuplicateHandle(ConnectionHandle),

    #[error("identity {0} is already registered")]
    DuplicateIdentity(IdentityToken),
}
