//! Events delivered to the host framework.
//!
//! Sessions never call back into the host framework directly. They push
//! [`TransportEvent`]s into an [`EventSink`], and the host drains the
//! matching [`EventStream`] on its own schedule. The sink is a thin
//! wrapper around an unbounded channel, so emitting never blocks the
//! pump that produced the event.

use peerlane_protocol::{
    Channel, ConnectionState, PeerId, RemoteConnectionState, SocketRole,
};
use tokio::sync::mpsc;

/// Something the host framework needs to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A local socket (client or server) changed state.
    LocalConnectionState {
        role: SocketRole,
        state: ConnectionState,
    },
    /// A peer connected to or disconnected from the local server.
    RemoteConnectionState {
        peer: PeerId,
        state: RemoteConnectionState,
    },
    /// The local client received data from the server.
    ClientReceived { payload: Vec<u8>, channel: Channel },
    /// The local server received data from a peer.
    ServerReceived {
        payload: Vec<u8>,
        channel: Channel,
        peer: PeerId,
    },
}

/// Receiving end handed to the host framework.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending end shared by every session of one transport.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Creates a connected sink/stream pair.
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Delivers an event. If the host dropped its stream the event is
    /// discarded.
    pub fn emit(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event stream closed, dropping event");
        }
    }

    pub(crate) fn remote_state(&self, peer: PeerId, state: RemoteConnectionState) {
        self.emit(TransportEvent::RemoteConnectionState { peer, state });
    }
}
