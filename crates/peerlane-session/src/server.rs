//! The server socket: many inbound connections behind one listener.
//!
//! # Admission
//!
//! Connections arrive as `Connecting` status changes. The server accepts
//! them while `registered + pending_accept < max_clients` and closes the
//! rest with a "Max Connection Count" reason. An id is only allocated
//! once the backend reports the connection as `Connected`, so a
//! rejected peer never consumes one.
//!
//! # Pumps
//!
//! All backend status changes are queued by the backend and applied in
//! [`ServerSession::pump_inbound`], which is the only place the registry
//! changes in response to the network. Nothing here blocks.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use peerlane_protocol::{
    Channel, ConnectionId, ConnectionState, MAX_CLIENTS, PeerId,
    RemoteConnectionState, ServerMode, SocketRole, decode_owned,
    encode_in_place,
};
use peerlane_transport::{
    CloseReason, ConnectionHandle, ConnectionStatus, ListenerId, PeerBackend,
    StatusChange, StatusReceiver,
};

use crate::address::parse_bind;
use crate::{
    ConnectionRegistry, EventSink, IdAllocator, LocalPacket, LocalState,
    LoopbackBridge, MAX_MESSAGES_PER_PUMP, MAX_STATUS_EVENTS_PER_PUMP,
    SessionError, TransportEvent,
};

/// Server side of the transport.
pub struct ServerSession<B: PeerBackend> {
    backend: Arc<B>,
    state: LocalState,
    sink: EventSink,
    listener: Option<ListenerId>,
    status_rx: Option<StatusReceiver>,
    registry: ConnectionRegistry,
    ids: IdAllocator,
    /// Accepted connections the backend has not reported as connected.
    pending_accept: HashSet<ConnectionHandle>,
    max_clients: u32,
    scratch: Vec<u8>,
    client_host: Option<LoopbackBridge>,
    client_host_started: bool,
    client_host_incoming: VecDeque<LocalPacket>,
}

impl<B: PeerBackend> ServerSession<B> {
    /// Creates a stopped server. `max_mtu` sizes the outbound scratch
    /// buffer.
    pub fn new(backend: Arc<B>, sink: EventSink, max_mtu: usize) -> Self {
        Self {
            backend,
            state: LocalState::new(SocketRole::Server, sink.clone()),
            sink,
            listener: None,
            status_rx: None,
            registry: ConnectionRegistry::new(),
            ids: IdAllocator::new(),
            pending_accept: HashSet::new(),
            max_clients: MAX_CLIENTS,
            scratch: Vec::with_capacity(max_mtu + 1),
            client_host: None,
            client_host_started: false,
            client_host_incoming: VecDeque::new(),
        }
    }

    // =====================================================================
    // Lifecycle
    // =====================================================================

    /// Starts listening. Calling this on a running server replaces its
    /// listener and forgets every peer.
    ///
    /// Returns `false` (and stays `Stopped`) if the listener cannot be
    /// opened.
    pub fn start(
        &mut self,
        address: &str,
        port: u16,
        max_clients: u32,
        mode: ServerMode,
    ) -> bool {
        if let Some(listener) = self.listener.take() {
            self.backend.close_listener(listener);
        }
        self.status_rx = Some(self.backend.subscribe());
        self.set_max_clients(max_clients);
        self.ids.reset();
        self.registry.clear();
        self.pending_accept.clear();

        self.state.set(ConnectionState::Starting);
        match self.open_listener(address, port, mode) {
            Ok(listener) => {
                self.listener = Some(listener);
                self.state.set(ConnectionState::Started);
                tracing::info!(
                    %listener,
                    ?mode,
                    max_clients = self.max_clients,
                    "server started"
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, address, port, "server failed to start");
                self.status_rx = None;
                self.state.set(ConnectionState::Stopped);
                false
            }
        }
    }

    fn open_listener(
        &self,
        address: &str,
        port: u16,
        mode: ServerMode,
    ) -> Result<ListenerId, SessionError> {
        if !self.backend.is_initialized() {
            return Err(SessionError::BackendNotInitialized);
        }
        let listener = match mode {
            ServerMode::Dedicated => {
                self.backend.listen(parse_bind(address, port)?)?
            }
            ServerMode::PeerRelay => self.backend.listen_relay()?,
        };
        Ok(listener)
    }

    /// Stops listening and drops every peer. Remote peers are not
    /// announced individually; a running client host is announced as
    /// stopped. Returns `false` if already stopped.
    pub fn stop(&mut self) -> bool {
        if self.state.is_stopped_or_stopping() {
            return false;
        }
        self.state.set(ConnectionState::Stopping);
        self.status_rx = None;
        if let Some(listener) = self.listener.take() {
            self.backend.close_listener(listener);
        }
        self.registry.clear();
        self.pending_accept.clear();
        self.on_client_host_state(false);
        self.state.set(ConnectionState::Stopped);
        tracing::info!("server stopped");
        true
    }

    /// Disconnects one peer.
    pub fn stop_peer(&mut self, peer: PeerId) -> bool {
        match peer {
            PeerId::LocalHost => {
                let stopped = self
                    .client_host
                    .as_ref()
                    .is_some_and(LoopbackBridge::stop_client);
                if !stopped {
                    tracing::error!("client host is not active");
                    return false;
                }
                self.on_client_host_state(false);
                true
            }
            PeerId::Remote(id) => {
                let Some(handle) = self.registry.handle_of(id) else {
                    tracing::error!(%peer, "cannot stop unknown peer");
                    return false;
                };
                self.disconnect(handle, id);
                true
            }
        }
    }

    /// Closes a registered connection and forgets it.
    fn disconnect(&mut self, handle: ConnectionHandle, id: ConnectionId) {
        self.backend.close(handle, CloseReason::graceful());
        self.registry.remove(id);
        self.ids.release(id);
        let peer = PeerId::Remote(id);
        self.sink.remote_state(peer, RemoteConnectionState::Stopped);
        tracing::info!(%peer, %handle, "peer disconnected");
    }

    // =====================================================================
    // Queries
    // =====================================================================

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn remote_state(&self, peer: PeerId) -> RemoteConnectionState {
        let connected = match peer {
            PeerId::LocalHost => self.client_host_started,
            PeerId::Remote(id) => self.registry.contains(id),
        };
        if connected {
            RemoteConnectionState::Started
        } else {
            RemoteConnectionState::Stopped
        }
    }

    /// The identity of a connected peer, as text.
    pub fn remote_address(&self, peer: PeerId) -> Option<String> {
        match peer {
            PeerId::LocalHost => {
                tracing::debug!("client host has no remote address");
                None
            }
            PeerId::Remote(id) => {
                let identity = self.registry.identity_of(id);
                if identity.is_none() {
                    tracing::error!(%peer, "no address for unknown peer");
                }
                identity.map(|identity| identity.to_string())
            }
        }
    }

    pub fn max_clients(&self) -> u32 {
        self.max_clients
    }

    /// Changes the client limit for future admissions. Connected peers
    /// above the new limit stay connected.
    pub fn set_max_clients(&mut self, max_clients: u32) {
        if max_clients > MAX_CLIENTS {
            tracing::warn!(requested = max_clients, limit = MAX_CLIENTS, "clamping max clients");
        }
        self.max_clients = max_clients.min(MAX_CLIENTS);
    }

    /// Number of connected remote peers. The client host is not counted.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    // =====================================================================
    // Pumps
    // =====================================================================

    /// Applies connection status changes, then delivers messages from
    /// the client host and from remote peers.
    pub fn pump_inbound(&mut self) {
        if self.state.is_stopped_or_stopping() {
            return;
        }
        self.apply_status_changes();

        // Only what was queued before this pass.
        for packet in std::mem::take(&mut self.client_host_incoming) {
            self.sink.emit(TransportEvent::ServerReceived {
                payload: packet.payload,
                channel: packet.channel,
                peer: PeerId::LocalHost,
            });
        }

        let Some(listener) = self.listener else {
            return;
        };
        for (handle, wire) in self
            .backend
            .receive_on_listener(listener, MAX_MESSAGES_PER_PUMP)
        {
            let Some(id) = self.registry.id_of(handle) else {
                tracing::trace!(%handle, "message from unregistered connection");
                continue;
            };
            match decode_owned(wire) {
                Ok((payload, channel)) => {
                    self.sink.emit(TransportEvent::ServerReceived {
                        payload,
                        channel,
                        peer: PeerId::Remote(id),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, peer = %PeerId::Remote(id), "dropping message");
                }
            }
        }
    }

    /// Flushes every connected peer.
    pub fn pump_outbound(&mut self) {
        if self.state.get() != ConnectionState::Started {
            return;
        }
        for handle in self.registry.handles() {
            self.backend.flush(handle);
        }
    }

    fn apply_status_changes(&mut self) {
        let Some(rx) = self.status_rx.as_mut() else {
            return;
        };
        let mut changes = Vec::new();
        while changes.len() < MAX_STATUS_EVENTS_PER_PUMP {
            match rx.try_recv() {
                Ok(change) => changes.push(change),
                Err(_) => break,
            }
        }
        for change in changes {
            if change.listener.is_none() || change.listener != self.listener {
                continue;
            }
            self.on_status_change(change);
        }
    }

    fn on_status_change(&mut self, change: StatusChange) {
        let handle = change.handle;
        match change.status {
            ConnectionStatus::Connecting => {
                let occupied = self.registry.len() + self.pending_accept.len();
                if occupied >= self.max_clients as usize {
                    tracing::info!(
                        %handle,
                        remote = %change.remote,
                        max_clients = self.max_clients,
                        "rejecting connection: server is full"
                    );
                    self.backend.close(handle, CloseReason::max_connections());
                    return;
                }
                match self.backend.accept(handle) {
                    Ok(()) => {
                        self.pending_accept.insert(handle);
                        tracing::debug!(%handle, remote = %change.remote, "accepted connection");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, %handle, "failed to accept connection");
                        self.backend.close(handle, CloseReason::graceful());
                    }
                }
            }
            ConnectionStatus::Connected => {
                self.pending_accept.remove(&handle);
                if self.registry.id_of(handle).is_some() {
                    tracing::debug!(%handle, "connection already registered");
                    return;
                }
                let id = self.ids.allocate();
                match self.registry.insert(handle, change.remote, id) {
                    Ok(()) => {
                        let peer = PeerId::Remote(id);
                        tracing::info!(%peer, %handle, remote = %change.remote, "peer connected");
                        self.sink.remote_state(peer, RemoteConnectionState::Started);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, %handle, "cannot register connection");
                        self.backend.close(handle, CloseReason::graceful());
                        self.ids.release(id);
                    }
                }
            }
            ConnectionStatus::ClosedByPeer
            | ConnectionStatus::ProblemDetectedLocally => {
                if self.pending_accept.remove(&handle) {
                    tracing::debug!(
                        %handle,
                        status = ?change.status,
                        "connection ended before it was established"
                    );
                    self.backend.close(handle, CloseReason::graceful());
                    return;
                }
                let Some(id) = self.registry.id_of(handle) else {
                    return;
                };
                tracing::debug!(
                    %handle,
                    status = ?change.status,
                    reason = change.end_reason.as_deref().unwrap_or(""),
                    "connection ended"
                );
                self.disconnect(handle, id);
            }
            status => {
                tracing::debug!(%handle, ?status, "server status");
            }
        }
    }

    // =====================================================================
    // Sending
    // =====================================================================

    /// Sends a message to one peer.
    ///
    /// A send error that means the connection is gone disconnects that
    /// peer; any other send error is only logged.
    pub fn send(&mut self, channel: Channel, payload: &[u8], peer: PeerId) {
        if self.state.get() != ConnectionState::Started {
            tracing::trace!(%peer, "server not started, dropping message");
            return;
        }
        let id = match peer {
            PeerId::LocalHost => {
                match &self.client_host {
                    Some(bridge) => {
                        bridge.push_to_client(LocalPacket::new(payload, channel));
                    }
                    None => tracing::trace!("no client host, dropping message"),
                }
                return;
            }
            PeerId::Remote(id) => id,
        };
        let Some(handle) = self.registry.handle_of(id) else {
            tracing::error!(%peer, "cannot send to unknown peer");
            return;
        };

        self.scratch.clear();
        self.scratch.extend_from_slice(payload);
        encode_in_place(&mut self.scratch, channel);
        match self
            .backend
            .send(handle, &self.scratch, channel.reliability())
        {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                tracing::info!(error = %e, %peer, "connection to peer was lost");
                self.disconnect(handle, id);
            }
            Err(e) => {
                tracing::error!(error = %e, %peer, %channel, "send to peer failed");
            }
        }
    }

    // =====================================================================
    // Client host
    // =====================================================================

    /// Attaches the bridge of an in-process client host. `None` detaches.
    pub fn attach_client_host(&mut self, bridge: Option<LoopbackBridge>) {
        self.client_host = bridge;
    }

    /// Called by the client host when it starts or stops.
    ///
    /// Stopping drops every message the client host sent that the
    /// server has not delivered yet.
    pub fn on_client_host_state(&mut self, started: bool) {
        if started == self.client_host_started {
            return;
        }
        self.client_host_started = started;
        if started {
            self.sink
                .remote_state(PeerId::LocalHost, RemoteConnectionState::Started);
        } else {
            self.client_host_incoming.clear();
            self.sink
                .remote_state(PeerId::LocalHost, RemoteConnectionState::Stopped);
        }
    }

    /// Queues a message from the client host for the next inbound pump.
    pub fn received_from_client_host(&mut self, packet: LocalPacket) {
        if !self.client_host_started {
            tracing::trace!("client host not started, dropping message");
            return;
        }
        self.client_host_incoming.push_back(packet);
    }
}
