//! The client host: a client living inside the server's process.
//!
//! When a process both hosts and plays, its client must not connect to
//! its own server through the backend. Instead the two sides exchange
//! [`LocalPacket`]s through in-process queues:
//!
//! ```text
//!                  received_from_client_host
//!   ClientHostSession ─────────────────────────→ ServerSession
//!          ↑                                           │
//!          └──────── LoopbackBridge.to_client ←────────┘ send(LocalHost)
//! ```
//!
//! The server→client queue lives in the shared [`LoopbackBridge`]; the
//! client→server queue lives in the server session itself. Each side
//! drains its queue during its own inbound pump, only taking what was
//! queued when the pass began.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use peerlane_protocol::{Channel, ConnectionState, SocketRole};
use peerlane_transport::PeerBackend;

use crate::{EventSink, LocalState, ServerSession, SessionError, TransportEvent};

/// One message crossing the loopback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPacket {
    pub payload: Vec<u8>,
    pub channel: Channel,
}

impl LocalPacket {
    pub fn new(payload: &[u8], channel: Channel) -> Self {
        Self {
            payload: payload.to_vec(),
            channel,
        }
    }
}

/// State shared between the server and its client host.
///
/// Cheap to clone; every clone refers to the same bridge.
#[derive(Debug, Clone)]
pub struct LoopbackBridge {
    inner: Arc<Mutex<BridgeInner>>,
}

#[derive(Debug)]
struct BridgeInner {
    state: LocalState,
    to_client: VecDeque<LocalPacket>,
}

impl LoopbackBridge {
    /// Creates a bridge whose client-host state changes go to `sink`
    /// with the client role.
    pub fn new(sink: EventSink) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BridgeInner {
                state: LocalState::new(SocketRole::Client, sink),
                to_client: VecDeque::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BridgeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// State of the client host.
    pub fn state(&self) -> ConnectionState {
        self.lock().state.get()
    }

    pub fn is_started(&self) -> bool {
        self.state() == ConnectionState::Started
    }

    pub(crate) fn set_state(&self, state: ConnectionState) -> bool {
        self.lock().state.set(state)
    }

    /// Queues a packet for the client host. Dropped unless it is started.
    pub(crate) fn push_to_client(&self, packet: LocalPacket) {
        let mut inner = self.lock();
        if inner.state.get() != ConnectionState::Started {
            tracing::trace!("client host not started, dropping packet");
            return;
        }
        inner.to_client.push_back(packet);
    }

    /// Takes every packet queued for the client host so far.
    pub(crate) fn take_to_client(&self) -> VecDeque<LocalPacket> {
        std::mem::take(&mut self.lock().to_client)
    }

    /// Stops the client side: drops queued packets and moves through
    /// `Stopping` to `Stopped`. Returns `false` if already stopped.
    pub(crate) fn stop_client(&self) -> bool {
        let mut inner = self.lock();
        if inner.state.is_stopped_or_stopping() {
            return false;
        }
        inner.state.set(ConnectionState::Stopping);
        inner.to_client.clear();
        inner.state.set(ConnectionState::Stopped);
        true
    }
}

/// The client half of a client host.
///
/// Owns the bridge and borrows the server for every operation that
/// crosses to the other side.
#[derive(Debug)]
pub struct ClientHostSession {
    bridge: LoopbackBridge,
    sink: EventSink,
}

impl ClientHostSession {
    pub fn new(sink: EventSink) -> Self {
        Self {
            bridge: LoopbackBridge::new(sink.clone()),
            sink,
        }
    }

    pub fn bridge(&self) -> &LoopbackBridge {
        &self.bridge
    }

    pub fn state(&self) -> ConnectionState {
        self.bridge.state()
    }

    /// Starts the client host against a running server.
    ///
    /// Returns `false` if the server is not started or the client host
    /// is already running.
    pub fn start<B: PeerBackend>(&self, server: &mut ServerSession<B>) -> bool {
        if server.state() != ConnectionState::Started {
            tracing::warn!("cannot start client host: local server is not started");
            return false;
        }
        if self.bridge.state() != ConnectionState::Stopped {
            tracing::warn!(error = %SessionError::AlreadyRunning, "client host");
            return false;
        }

        server.attach_client_host(Some(self.bridge.clone()));
        self.bridge.set_state(ConnectionState::Starting);
        self.bridge.set_state(ConnectionState::Started);
        server.on_client_host_state(true);
        tracing::info!("client host started");
        true
    }

    /// Stops the client host. Returns `false` if it was not running.
    pub fn stop<B: PeerBackend>(&self, server: &mut ServerSession<B>) -> bool {
        if !self.bridge.stop_client() {
            return false;
        }
        server.on_client_host_state(false);
        tracing::info!("client host stopped");
        true
    }

    /// Hands a message to the server. Dropped unless both sides are
    /// started.
    pub fn send_to_server<B: PeerBackend>(
        &self,
        server: &mut ServerSession<B>,
        channel: Channel,
        payload: &[u8],
    ) {
        if !self.bridge.is_started()
            || server.state() != ConnectionState::Started
        {
            tracing::trace!("client host not connected, dropping packet");
            return;
        }
        server.received_from_client_host(LocalPacket::new(payload, channel));
    }

    /// Delivers packets the server queued for the client host.
    ///
    /// If the server went away while the client host was running, the
    /// client host stops instead.
    pub fn pump_inbound<B: PeerBackend>(&self, server: &mut ServerSession<B>) {
        if self.bridge.state() != ConnectionState::Started {
            return;
        }
        if server.state() != ConnectionState::Started {
            tracing::info!("local server stopped, stopping client host");
            self.stop(server);
            return;
        }
        for packet in self.bridge.take_to_client() {
            self.sink.emit(TransportEvent::ClientReceived {
                payload: packet.payload,
                channel: packet.channel,
            });
        }
    }
}
