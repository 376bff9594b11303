//! In-memory peer-connection backend.
//!
//! A [`MemoryNetwork`] is a simulated network shared by any number of
//! [`MemoryEndpoint`]s, each with its own identity. Endpoints connect to
//! each other by socket address (direct) or by identity (relay), go
//! through the same Connecting → accept → Connected dance a real backend
//! does, and report every status change to their own subscribers.
//!
//! Messages are queued by `send` and only reach the peer's inbox when
//! the sender calls `flush`, so tests can observe the outbound pump.
//! Connecting to an address nobody listens on leaves the connection in
//! `Connecting` forever, which is how a handshake timeout looks from the
//! outside.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::{
    CloseReason, ConnectionHandle, ConnectionStatus, IdentityToken,
    ListenerId, PeerBackend, Reliability, SendError, StatusChange,
    StatusReceiver, StatusSender, TransportError,
};

/// Base of the identity range handed out to endpoints, so generated
/// identities look like real account ids.
const IDENTITY_BASE: u64 = 76_561_197_960_265_728;

type EndpointId = u32;

/// A simulated network. Cheap to clone; every clone is the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    next_handle: u64,
    next_listener: u32,
    next_endpoint: EndpointId,
    endpoints: HashMap<EndpointId, EndpointState>,
    // BTreeMap so listener receives walk connections in a stable order.
    connections: BTreeMap<ConnectionHandle, MemoryConnection>,
    listeners: HashMap<ListenerId, MemoryListener>,
}

struct EndpointState {
    identity: IdentityToken,
    initialized: bool,
    subscribers: Vec<StatusSender>,
    closed: Vec<(ConnectionHandle, CloseReason)>,
    flushes: u64,
    accepts: u64,
}

struct MemoryListener {
    owner: EndpointId,
    /// `None` for relay listeners.
    bind: Option<SocketAddr>,
}

struct MemoryConnection {
    owner: EndpointId,
    listener: Option<ListenerId>,
    peer: Option<ConnectionHandle>,
    remote: IdentityToken,
    status: ConnectionStatus,
    outbox: VecDeque<Vec<u8>>,
    inbox: VecDeque<Vec<u8>>,
    injected: Option<SendError>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an endpoint with a random identity.
    pub fn endpoint(&self) -> MemoryEndpoint {
        let identity = IDENTITY_BASE + u64::from(rand::random::<u32>());
        self.endpoint_with_identity(IdentityToken(identity))
    }

    /// Adds an endpoint with a fixed identity.
    pub fn endpoint_with_identity(
        &self,
        identity: IdentityToken,
    ) -> MemoryEndpoint {
        let mut state = lock(&self.state);
        let id = state.next_endpoint;
        state.next_endpoint += 1;
        state.endpoints.insert(
            id,
            EndpointState {
                identity,
                initialized: true,
                subscribers: Vec::new(),
                closed: Vec::new(),
                flushes: 0,
                accepts: 0,
            },
        );
        tracing::debug!(endpoint = id, %identity, "memory endpoint created");
        MemoryEndpoint {
            id,
            identity,
            state: Arc::clone(&self.state),
        }
    }
}

/// One participant on a [`MemoryNetwork`]. Implements [`PeerBackend`].
#[derive(Clone)]
pub struct MemoryEndpoint {
    id: EndpointId,
    identity: IdentityToken,
    state: Arc<Mutex<NetworkState>>,
}

fn lock(state: &Mutex<NetworkState>) -> MutexGuard<'_, NetworkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NetworkState {
    fn notify(&mut self, handle: ConnectionHandle, end_reason: Option<String>) {
        let Some(conn) = self.connections.get(&handle) else {
            return;
        };
        let change = StatusChange {
            handle,
            listener: conn.listener,
            status: conn.status,
            remote: conn.remote,
            end_reason,
        };
        if let Some(endpoint) = self.endpoints.get_mut(&conn.owner) {
            // Dropped receivers are how subscribers unregister.
            endpoint
                .subscribers
                .retain(|tx| tx.send(change.clone()).is_ok());
        }
    }

    fn identity_of(&self, endpoint: EndpointId) -> IdentityToken {
        self.endpoints
            .get(&endpoint)
            .map(|e| e.identity)
            .unwrap_or(IdentityToken(0))
    }

    fn is_initialized(&self, endpoint: EndpointId) -> bool {
        self.endpoints
            .get(&endpoint)
            .is_some_and(|e| e.initialized)
    }

    fn next_handle(&mut self) -> ConnectionHandle {
        self.next_handle += 1;
        ConnectionHandle::new(self.next_handle)
    }

    /// Creates the outbound half of a connection and, when a listener was
    /// found, its inbound half on the listener's owner.
    fn open(
        &mut self,
        owner: EndpointId,
        target: Option<ListenerId>,
    ) -> ConnectionHandle {
        let outbound = self.next_handle();
        let Some((listener_id, listener_owner)) = target.and_then(|id| {
            self.listeners.get(&id).map(|l| (id, l.owner))
        }) else {
            // Nobody answers: the attempt stays in Connecting.
            self.connections.insert(
                outbound,
                MemoryConnection::new(owner, None, None, IdentityToken(0)),
            );
            return outbound;
        };

        let inbound = self.next_handle();
        let local_identity = self.identity_of(owner);
        let remote_identity = self.identity_of(listener_owner);
        self.connections.insert(
            outbound,
            MemoryConnection::new(owner, None, Some(inbound), remote_identity),
        );
        self.connections.insert(
            inbound,
            MemoryConnection::new(
                listener_owner,
                Some(listener_id),
                Some(outbound),
                local_identity,
            ),
        );
        self.notify(outbound, None);
        self.notify(inbound, None);
        outbound
    }

    /// Ends the peer half of `handle` (if any) with `status`.
    fn end_peer(
        &mut self,
        handle: ConnectionHandle,
        status: ConnectionStatus,
        reason: &str,
    ) {
        let Some(peer) = self.connections.get(&handle).and_then(|c| c.peer)
        else {
            return;
        };
        if let Some(peer_conn) = self.connections.get_mut(&peer) {
            peer_conn.peer = None;
            if !peer_conn.status.is_closed() {
                peer_conn.status = status;
                self.notify(peer, Some(reason.to_string()));
            }
        }
    }

    fn owned_mut(
        &mut self,
        owner: EndpointId,
        handle: ConnectionHandle,
    ) -> Option<&mut MemoryConnection> {
        self.connections
            .get_mut(&handle)
            .filter(|c| c.owner == owner)
    }
}

impl MemoryConnection {
    fn new(
        owner: EndpointId,
        listener: Option<ListenerId>,
        peer: Option<ConnectionHandle>,
        remote: IdentityToken,
    ) -> Self {
        Self {
            owner,
            listener,
            peer,
            remote,
            status: ConnectionStatus::Connecting,
            outbox: VecDeque::new(),
            inbox: VecDeque::new(),
            injected: None,
        }
    }
}

impl MemoryEndpoint {
    /// Marks the endpoint as (un)initialized. An uninitialized endpoint
    /// refuses to connect or listen.
    pub fn set_initialized(&self, initialized: bool) {
        let mut state = lock(&self.state);
        if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
            endpoint.initialized = initialized;
        }
    }

    /// Makes the next `send` on `handle` fail with `error`.
    pub fn inject_send_error(&self, handle: ConnectionHandle, error: SendError) {
        let mut state = lock(&self.state);
        if let Some(conn) = state.owned_mut(self.id, handle) {
            conn.injected = Some(error);
        }
    }

    /// Simulates a network failure on `handle`: both halves report
    /// [`ConnectionStatus::ProblemDetectedLocally`].
    pub fn drop_connection(&self, handle: ConnectionHandle) {
        let mut state = lock(&self.state);
        let Some(conn) = state.owned_mut(self.id, handle) else {
            return;
        };
        conn.status = ConnectionStatus::ProblemDetectedLocally;
        state.end_peer(
            handle,
            ConnectionStatus::ProblemDetectedLocally,
            "connection lost",
        );
        state.notify(handle, Some("connection lost".to_string()));
    }

    /// Every close this endpoint performed, in order.
    pub fn closed_connections(&self) -> Vec<(ConnectionHandle, CloseReason)> {
        let state = lock(&self.state);
        state
            .endpoints
            .get(&self.id)
            .map(|e| e.closed.clone())
            .unwrap_or_default()
    }

    /// Number of `flush` calls made on live connections.
    pub fn flush_count(&self) -> u64 {
        let state = lock(&self.state);
        state.endpoints.get(&self.id).map_or(0, |e| e.flushes)
    }

    /// Number of successful `accept` calls.
    pub fn accept_count(&self) -> u64 {
        let state = lock(&self.state);
        state.endpoints.get(&self.id).map_or(0, |e| e.accepts)
    }

    /// Current status of a connection owned by this endpoint.
    pub fn status_of(&self, handle: ConnectionHandle) -> Option<ConnectionStatus> {
        let state = lock(&self.state);
        state
            .connections
            .get(&handle)
            .filter(|c| c.owner == self.id)
            .map(|c| c.status)
    }

    /// Number of connections this endpoint owns that are not closed.
    pub fn open_connection_count(&self) -> usize {
        let state = lock(&self.state);
        state
            .connections
            .values()
            .filter(|c| c.owner == self.id && !c.status.is_closed())
            .count()
    }
}

impl PeerBackend for MemoryEndpoint {
    fn is_initialized(&self) -> bool {
        lock(&self.state).is_initialized(self.id)
    }

    fn local_identity(&self) -> IdentityToken {
        self.identity
    }

    fn subscribe(&self) -> StatusReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
            endpoint.subscribers.push(tx);
        }
        rx
    }

    fn connect(
        &self,
        addr: SocketAddr,
    ) -> Result<ConnectionHandle, TransportError> {
        let mut state = lock(&self.state);
        if !state.is_initialized(self.id) {
            return Err(TransportError::NotInitialized);
        }
        let target = state
            .listeners
            .iter()
            .find(|(_, l)| {
                l.bind.is_some_and(|bind| {
                    bind == addr
                        || (bind.ip().is_unspecified()
                            && bind.port() == addr.port())
                })
            })
            .map(|(id, _)| *id);
        let handle = state.open(self.id, target);
        tracing::debug!(%handle, %addr, "memory connect");
        Ok(handle)
    }

    fn connect_relay(
        &self,
        identity: IdentityToken,
    ) -> Result<ConnectionHandle, TransportError> {
        let mut state = lock(&self.state);
        if !state.is_initialized(self.id) {
            return Err(TransportError::NotInitialized);
        }
        let target = state
            .listeners
            .iter()
            .find(|(_, l)| {
                l.bind.is_none() && state.identity_of(l.owner) == identity
            })
            .map(|(id, _)| *id);
        let handle = state.open(self.id, target);
        tracing::debug!(%handle, %identity, "memory relay connect");
        Ok(handle)
    }

    fn listen(&self, addr: SocketAddr) -> Result<ListenerId, TransportError> {
        let mut state = lock(&self.state);
        if !state.is_initialized(self.id) {
            return Err(TransportError::NotInitialized);
        }
        if state.listeners.values().any(|l| l.bind == Some(addr)) {
            return Err(TransportError::BindFailed {
                addr,
                reason: "address in use".to_string(),
            });
        }
        state.next_listener += 1;
        let id = ListenerId::new(state.next_listener);
        state.listeners.insert(
            id,
            MemoryListener {
                owner: self.id,
                bind: Some(addr),
            },
        );
        tracing::debug!(listener = %id, %addr, "memory listener bound");
        Ok(id)
    }

    fn listen_relay(&self) -> Result<ListenerId, TransportError> {
        let mut state = lock(&self.state);
        if !state.is_initialized(self.id) {
            return Err(TransportError::NotInitialized);
        }
        state.next_listener += 1;
        let id = ListenerId::new(state.next_listener);
        state.listeners.insert(
            id,
            MemoryListener {
                owner: self.id,
                bind: None,
            },
        );
        tracing::debug!(listener = %id, "memory relay listener opened");
        Ok(id)
    }

    fn close_listener(&self, listener: ListenerId) {
        let mut state = lock(&self.state);
        let owned = state
            .listeners
            .get(&listener)
            .is_some_and(|l| l.owner == self.id);
        if !owned {
            return;
        }
        state.listeners.remove(&listener);
        let accepted: Vec<ConnectionHandle> = state
            .connections
            .iter()
            .filter(|(_, c)| c.listener == Some(listener))
            .map(|(h, _)| *h)
            .collect();
        for handle in accepted {
            state.end_peer(
                handle,
                ConnectionStatus::ClosedByPeer,
                "listener closed",
            );
            state.connections.remove(&handle);
        }
    }

    fn accept(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        let Some(conn) = state.owned_mut(self.id, handle) else {
            return Err(TransportError::UnknownConnection(handle));
        };
        if conn.listener.is_none()
            || conn.status != ConnectionStatus::Connecting
        {
            return Err(TransportError::InvalidState(handle));
        }
        let Some(peer) = conn.peer else {
            return Err(TransportError::InvalidState(handle));
        };
        conn.status = ConnectionStatus::Connected;
        if let Some(peer_conn) = state.connections.get_mut(&peer) {
            peer_conn.status = ConnectionStatus::Connected;
        }
        if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
            endpoint.accepts += 1;
        }
        state.notify(handle, None);
        state.notify(peer, None);
        Ok(())
    }

    fn close(&self, handle: ConnectionHandle, reason: CloseReason) {
        let mut state = lock(&self.state);
        if state.owned_mut(self.id, handle).is_none() {
            return;
        }
        state.end_peer(handle, ConnectionStatus::ClosedByPeer, &reason.text);
        state.connections.remove(&handle);
        tracing::trace!(%handle, %reason, "memory close");
        if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
            endpoint.closed.push((handle, reason));
        }
    }

    fn send(
        &self,
        handle: ConnectionHandle,
        data: &[u8],
        _reliability: Reliability,
    ) -> Result<(), SendError> {
        let mut state = lock(&self.state);
        let Some(conn) = state.owned_mut(self.id, handle) else {
            return Err(SendError::InvalidParam);
        };
        if let Some(error) = conn.injected.take() {
            return Err(error);
        }
        if conn.status != ConnectionStatus::Connected {
            return Err(SendError::NoConnection);
        }
        conn.outbox.push_back(data.to_vec());
        Ok(())
    }

    fn flush(&self, handle: ConnectionHandle) {
        let mut state = lock(&self.state);
        let Some(conn) = state.owned_mut(self.id, handle) else {
            return;
        };
        let outgoing: Vec<Vec<u8>> = conn.outbox.drain(..).collect();
        let peer = conn.peer;
        if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
            endpoint.flushes += 1;
        }
        if let Some(peer_conn) = peer.and_then(|p| state.connections.get_mut(&p)) {
            peer_conn.inbox.extend(outgoing);
        }
    }

    fn receive(&self, handle: ConnectionHandle, max: usize) -> Vec<Vec<u8>> {
        let mut state = lock(&self.state);
        let Some(conn) = state.owned_mut(self.id, handle) else {
            return Vec::new();
        };
        let take = conn.inbox.len().min(max);
        conn.inbox.drain(..take).collect()
    }

    fn receive_on_listener(
        &self,
        listener: ListenerId,
        max: usize,
    ) -> Vec<(ConnectionHandle, Vec<u8>)> {
        let mut state = lock(&self.state);
        let mut received = Vec::new();
        for (handle, conn) in state.connections.iter_mut() {
            if received.len() >= max {
                break;
            }
            if conn.owner != self.id || conn.listener != Some(listener) {
                continue;
            }
            while received.len() < max {
                let Some(data) = conn.inbox.pop_front() else {
                    break;
                };
                received.push((*handle, data));
            }
        }
        received
    }
}
