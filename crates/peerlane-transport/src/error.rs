use std::net::SocketAddr;

use crate::ConnectionHandle;

/// Errors that can occur when opening connections or listeners on a
/// backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The backend has not been initialized (e.g. the platform service
    /// behind it is not running).
    #[error("backend not initialized")]
    NotInitialized,

    /// Binding a listener failed (for example, the address is taken).
    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    /// The handle does not refer to a live connection.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionHandle),

    /// The connection is not in a state that allows this operation.
    /// For example, accepting a connection that is already connected.
    #[error("connection {0} is in the wrong state for this operation")]
    InvalidState(ConnectionHandle),
}

/// Result of a failed send, as reported by the backend.
///
/// [`SendError::is_fatal`] separates "the remote end is gone" from
/// transient failures the caller should only log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection is closed or was never established.
    #[error("no connection")]
    NoConnection,

    /// The handle or the payload was rejected by the backend.
    #[error("invalid parameter")]
    InvalidParam,

    /// The backend's send buffer is full; try again later.
    #[error("send limit exceeded")]
    LimitExceeded,

    /// Any other backend-specific failure.
    #[error("send failed: {0}")]
    Failed(String),
}

impl SendError {
    /// Returns `true` when the failure means the connection is gone and
    /// should be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoConnection | Self::InvalidParam)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_is_fatal_only_for_lost_connections() {
        assert!(SendError::NoConnection.is_fatal());
        assert!(SendError::InvalidParam.is_fatal());
        assert!(!SendError::LimitExceeded.is_fatal());
        assert!(!SendError::Failed("busy".into()).is_fatal());
    }

    #[test]
    fn test_transport_error_display_includes_handle() {
        let err = TransportError::UnknownConnection(ConnectionHandle::new(9));
        assert_eq!(err.to_string(), "unknown connection conn-9");
    }
}
