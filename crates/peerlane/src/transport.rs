//! The transport a host framework drives.

use std::sync::Arc;
use std::time::Duration;

use peerlane_protocol::{
    Channel, ConnectionState, MAX_CLIENTS, PeerId, RemoteConnectionState,
};
use peerlane_session::{
    ClientHostSession, ClientSession, EventSink, EventStream, ServerSession,
};
use peerlane_transport::PeerBackend;
use tokio::task::JoinHandle;

use crate::TransportConfig;

/// One client socket, one server socket, and the client host that joins
/// them when a process hosts and plays at once.
///
/// Every operation is synchronous. Starting the client spawns its
/// connect handshake on the current tokio runtime; its outcome shows up
/// as client [`LocalConnectionState`] events.
///
/// ```text
/// host framework tick:
///   iterate_incoming(true)   iterate_incoming(false)
///   ... game logic, send_to_server / send_to_client ...
///   iterate_outgoing(true)   iterate_outgoing(false)
/// ```
///
/// [`LocalConnectionState`]: peerlane_session::TransportEvent::LocalConnectionState
pub struct PeerTransport<B: PeerBackend> {
    config: TransportConfig,
    client: Arc<ClientSession<B>>,
    server: ServerSession<B>,
    client_host: ClientHostSession,
    handshake: Option<JoinHandle<bool>>,
}

impl<B: PeerBackend> PeerTransport<B> {
    /// Creates a stopped transport. Events from every socket arrive on
    /// the returned stream.
    pub fn new(backend: B, config: TransportConfig) -> (Self, EventStream) {
        let config = config.validated();
        let backend = Arc::new(backend);
        let (sink, events) = EventSink::channel();
        let max_mtu = config.max_mtu();

        let client = Arc::new(ClientSession::new(
            Arc::clone(&backend),
            sink.clone(),
            config.timeout(false),
            max_mtu,
        ));
        let server = ServerSession::new(backend, sink.clone(), max_mtu);
        let client_host = ClientHostSession::new(sink);

        let transport = Self {
            config,
            client,
            server,
            client_host,
            handshake: None,
        };
        (transport, events)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    // =====================================================================
    // Lifecycle
    // =====================================================================

    /// Starts the server or the client.
    ///
    /// The client becomes the client host when the local server is
    /// already running. Otherwise this only begins the handshake, and
    /// `true` means the attempt was launched.
    pub fn start_connection(&mut self, server: bool) -> bool {
        if server {
            return self.server.start(
                &self.config.server_bind_address,
                self.config.port,
                self.config.max_clients,
                self.config.server_mode,
            );
        }

        if self.server.state() == ConnectionState::Started {
            return self.client_host.start(&mut self.server);
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("cannot start client: no tokio runtime");
            return false;
        };
        // `begin` leaves the client Starting before the handshake is spawned.
        let Some(pending) =
            self.client.begin(&self.config.client_address, self.config.port)
        else {
            return false;
        };
        let client = Arc::clone(&self.client);
        self.handshake =
            Some(runtime.spawn(async move { client.finish(pending).await }));
        true
    }

    /// Stops the server or the client (whichever kind is running).
    pub fn stop_connection(&mut self, server: bool) -> bool {
        if server {
            self.client_host.stop(&mut self.server);
            return self.server.stop();
        }
        if self.client_host.state() != ConnectionState::Stopped {
            return self.client_host.stop(&mut self.server);
        }
        self.client.stop()
    }

    /// Disconnects one peer from the server.
    pub fn stop_remote(&mut self, peer: PeerId) -> bool {
        self.server.stop_peer(peer)
    }

    /// Stops everything.
    pub fn shutdown(&mut self) {
        self.client_host.stop(&mut self.server);
        self.client.stop();
        self.server.stop();
        self.handshake = None;
    }

    /// Takes the pending client handshake, if one was started and not
    /// taken yet. Resolves to whether the client connected.
    pub fn take_handshake(&mut self) -> Option<JoinHandle<bool>> {
        self.handshake.take()
    }

    // =====================================================================
    // Queries
    // =====================================================================

    /// State of the server, or of the client (the client host when it
    /// is running).
    pub fn local_state(&self, server: bool) -> ConnectionState {
        if server {
            return self.server.state();
        }
        match self.client_host.state() {
            ConnectionState::Stopped => self.client.state(),
            state => state,
        }
    }

    pub fn remote_state(&self, peer: PeerId) -> RemoteConnectionState {
        self.server.remote_state(peer)
    }

    pub fn remote_address(&self, peer: PeerId) -> Option<String> {
        self.server.remote_address(peer)
    }

    pub fn mtu(&self, channel: Channel) -> usize {
        self.config.mtu(channel)
    }

    pub fn timeout(&self, server: bool) -> Duration {
        self.config.timeout(server)
    }

    pub fn max_clients(&self) -> u32 {
        self.config.max_clients
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    // =====================================================================
    // Settings
    // =====================================================================

    /// Changes the client limit. Takes effect for the next admission.
    pub fn set_max_clients(&mut self, max_clients: u32) {
        self.config.max_clients = max_clients.min(MAX_CLIENTS);
        self.server.set_max_clients(max_clients);
    }

    /// Where the next client start connects.
    pub fn set_client_address(&mut self, address: impl Into<String>) {
        self.config.client_address = address.into();
    }

    /// Where the next dedicated server start binds.
    pub fn set_server_bind_address(&mut self, address: impl Into<String>) {
        self.config.server_bind_address = address.into();
    }

    pub fn set_port(&mut self, port: u16) {
        self.config.port = port;
    }

    // =====================================================================
    // Pumps and sends
    // =====================================================================

    /// Delivers what arrived since the last call for one side.
    pub fn iterate_incoming(&mut self, server: bool) {
        if server {
            self.server.pump_inbound();
        } else {
            self.client.pump_inbound();
            self.client_host.pump_inbound(&mut self.server);
        }
    }

    /// Flushes what was sent since the last call for one side.
    pub fn iterate_outgoing(&mut self, server: bool) {
        if server {
            self.server.pump_outbound();
        } else {
            self.client.pump_outbound();
        }
    }

    /// Sends from the local client (or client host) to its server.
    pub fn send_to_server(&mut self, channel: Channel, payload: &[u8]) {
        if self.client_host.state() == ConnectionState::Started {
            self.client_host
                .send_to_server(&mut self.server, channel, payload);
        } else {
            self.client.send_to_server(channel, payload);
        }
    }

    /// Sends from the local server to one peer.
    pub fn send_to_client(
        &mut self,
        channel: Channel,
        payload: &[u8],
        peer: PeerId,
    ) {
        self.server.send(channel, payload, peer);
    }
}
