//! Integration tests for the server session over the in-memory backend.

use std::net::SocketAddr;
use std::sync::Arc;

use peerlane_protocol::{
    Channel, ConnectionId, ConnectionState, PeerId, RemoteConnectionState,
    ServerMode, frame,
};
use peerlane_session::{EventSink, EventStream, ServerSession, TransportEvent};
use peerlane_transport::{
    CloseReason, ConnectionHandle, ConnectionStatus, MemoryEndpoint,
    MemoryNetwork, PeerBackend, Reliability, SendError, StatusReceiver,
};

const PORT: u16 = 27015;

// =========================================================================
// Helpers
// =========================================================================

struct Harness {
    net: MemoryNetwork,
    endpoint: MemoryEndpoint,
    server: ServerSession<MemoryEndpoint>,
    events: EventStream,
    /// Sees every status change on the server's endpoint.
    watch: StatusReceiver,
}

fn start_server(max_clients: u32) -> Harness {
    let net = MemoryNetwork::new();
    let endpoint = net.endpoint();
    let watch = endpoint.subscribe();
    let (sink, events) = EventSink::channel();
    let mut server =
        ServerSession::new(Arc::new(endpoint.clone()), sink, 1200);
    assert!(server.start("127.0.0.1", PORT, max_clients, ServerMode::Dedicated));
    Harness {
        net,
        endpoint,
        server,
        events,
        watch,
    }
}

fn server_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], PORT))
}

/// Opens a raw backend connection to the server.
fn dial(net: &MemoryNetwork) -> (MemoryEndpoint, ConnectionHandle) {
    let client = net.endpoint();
    let handle = client.connect(server_addr()).unwrap();
    (client, handle)
}

fn drain(events: &mut EventStream) -> Vec<TransportEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn remote_changes(events: &mut EventStream) -> Vec<(PeerId, RemoteConnectionState)> {
    drain(events)
        .into_iter()
        .filter_map(|event| match event {
            TransportEvent::RemoteConnectionState { peer, state } => {
                Some((peer, state))
            }
            _ => None,
        })
        .collect()
}

/// Server-side handles reported as connected, in order.
fn connected_handles(watch: &mut StatusReceiver) -> Vec<ConnectionHandle> {
    let mut out = Vec::new();
    while let Ok(change) = watch.try_recv() {
        if change.listener.is_some()
            && change.status == ConnectionStatus::Connected
        {
            out.push(change.handle);
        }
    }
    out
}

fn remote(id: u32) -> PeerId {
    PeerId::Remote(ConnectionId(id))
}

/// Two pumps: the first accepts, the second registers.
fn pump_twice(server: &mut ServerSession<MemoryEndpoint>) {
    server.pump_inbound();
    server.pump_inbound();
}

// =========================================================================
// Lifecycle
// =========================================================================

#[test]
fn test_start_emits_starting_then_started() {
    let mut h = start_server(4);

    let events = drain(&mut h.events);

    assert_eq!(h.server.state(), ConnectionState::Started);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[1],
        TransportEvent::LocalConnectionState {
            state: ConnectionState::Started,
            ..
        }
    ));
}

#[test]
fn test_start_uninitialized_backend_stays_stopped() {
    let net = MemoryNetwork::new();
    let endpoint = net.endpoint();
    endpoint.set_initialized(false);
    let (sink, _events) = EventSink::channel();
    let mut server = ServerSession::new(Arc::new(endpoint), sink, 1200);

    assert!(!server.start("", PORT, 4, ServerMode::Dedicated));
    assert_eq!(server.state(), ConnectionState::Stopped);
}

#[test]
fn test_start_address_in_use_fails() {
    let h = start_server(4);
    let other = h.net.endpoint();
    let (sink, _events) = EventSink::channel();
    let mut second = ServerSession::new(Arc::new(other), sink, 1200);

    assert!(!second.start("127.0.0.1", PORT, 4, ServerMode::Dedicated));
    assert_eq!(second.state(), ConnectionState::Stopped);
}

#[test]
fn test_start_clamps_max_clients() {
    let h = start_server(u32::MAX);
    assert_eq!(h.server.max_clients(), peerlane_protocol::MAX_CLIENTS);
}

#[test]
fn test_stop_twice_second_is_noop() {
    let mut h = start_server(4);
    let (_client, _handle) = dial(&h.net);
    pump_twice(&mut h.server);
    drain(&mut h.events);

    assert!(h.server.stop());
    assert!(!h.server.stop());

    assert_eq!(h.server.state(), ConnectionState::Stopped);
    assert_eq!(h.server.connection_count(), 0);
    assert_eq!(h.server.remote_state(remote(0)), RemoteConnectionState::Stopped);
    // Peers are dropped with the listener, not announced one by one.
    assert!(remote_changes(&mut h.events).is_empty());
}

#[test]
fn test_restart_resets_connection_ids() {
    let mut h = start_server(4);
    let (_a, _) = dial(&h.net);
    let (_b, _) = dial(&h.net);
    pump_twice(&mut h.server);
    h.server.stop();

    assert!(h.server.start("127.0.0.1", PORT, 4, ServerMode::Dedicated));
    drain(&mut h.events);
    let (_c, _) = dial(&h.net);
    pump_twice(&mut h.server);

    assert_eq!(
        remote_changes(&mut h.events),
        vec![(remote(0), RemoteConnectionState::Started)]
    );
}

// =========================================================================
// Admission and id recycling
// =========================================================================

#[test]
fn test_max_clients_two_rejects_third_and_reuses_id_zero() {
    let mut h = start_server(2);
    drain(&mut h.events);

    let (c1, h1) = dial(&h.net);
    let (_c2, _h2) = dial(&h.net);
    let (c3, h3) = dial(&h.net);
    pump_twice(&mut h.server);

    assert_eq!(
        remote_changes(&mut h.events),
        vec![
            (remote(0), RemoteConnectionState::Started),
            (remote(1), RemoteConnectionState::Started),
        ]
    );
    assert_eq!(h.server.connection_count(), 2);
    assert_eq!(c3.status_of(h3), Some(ConnectionStatus::ClosedByPeer));
    let (_, reason) = h.endpoint.closed_connections().last().cloned().unwrap();
    assert_eq!(reason, CloseReason::max_connections());

    // Peer 0 leaves, a newcomer takes its id.
    c1.close(h1, CloseReason::graceful());
    h.server.pump_inbound();
    let (_c4, _h4) = dial(&h.net);
    pump_twice(&mut h.server);

    assert_eq!(
        remote_changes(&mut h.events),
        vec![
            (remote(0), RemoteConnectionState::Stopped),
            (remote(0), RemoteConnectionState::Started),
        ]
    );
    assert_eq!(h.server.connection_count(), 2);
}

#[test]
fn test_rejected_connection_allocates_no_id() {
    let mut h = start_server(1);
    drain(&mut h.events);

    let (_a, _) = dial(&h.net);
    let (_b, _) = dial(&h.net);
    pump_twice(&mut h.server);
    h.server.stop_peer(remote(0));
    let (_c, _) = dial(&h.net);
    pump_twice(&mut h.server);

    let started: Vec<PeerId> = remote_changes(&mut h.events)
        .into_iter()
        .filter(|(_, state)| *state == RemoteConnectionState::Started)
        .map(|(peer, _)| peer)
        .collect();
    assert_eq!(started, vec![remote(0), remote(0)]);
}

#[test]
fn test_ids_recycle_in_release_order() {
    let mut h = start_server(8);
    let _clients: Vec<_> = (0..3).map(|_| dial(&h.net)).collect();
    pump_twice(&mut h.server);
    drain(&mut h.events);

    h.server.stop_peer(remote(2));
    h.server.stop_peer(remote(0));
    let (_d, _) = dial(&h.net);
    let (_e, _) = dial(&h.net);
    let (_f, _) = dial(&h.net);
    pump_twice(&mut h.server);

    let started: Vec<PeerId> = remote_changes(&mut h.events)
        .into_iter()
        .filter(|(_, state)| *state == RemoteConnectionState::Started)
        .map(|(peer, _)| peer)
        .collect();
    assert_eq!(started, vec![remote(2), remote(0), remote(3)]);
}

#[test]
fn test_set_max_clients_affects_only_new_admissions() {
    let mut h = start_server(4);
    let (_a, _) = dial(&h.net);
    let (_b, _) = dial(&h.net);
    pump_twice(&mut h.server);

    h.server.set_max_clients(1);
    let (c, hc) = dial(&h.net);
    pump_twice(&mut h.server);

    assert_eq!(h.server.connection_count(), 2);
    assert_eq!(c.status_of(hc), Some(ConnectionStatus::ClosedByPeer));
}

// =========================================================================
// Peers
// =========================================================================

#[test]
fn test_stop_peer_closes_and_notifies() {
    let mut h = start_server(4);
    let (client, handle) = dial(&h.net);
    pump_twice(&mut h.server);
    drain(&mut h.events);

    assert!(h.server.stop_peer(remote(0)));

    assert_eq!(
        remote_changes(&mut h.events),
        vec![(remote(0), RemoteConnectionState::Stopped)]
    );
    assert_eq!(client.status_of(handle), Some(ConnectionStatus::ClosedByPeer));
    assert!(!h.server.stop_peer(remote(0)), "unknown peer");
}

#[test]
fn test_stop_peer_local_host_without_client_host_fails() {
    let mut h = start_server(4);
    assert!(!h.server.stop_peer(PeerId::LocalHost));
}

#[test]
fn test_peer_close_is_idempotent() {
    let mut h = start_server(4);
    let (client, handle) = dial(&h.net);
    pump_twice(&mut h.server);
    drain(&mut h.events);

    client.drop_connection(handle);
    h.server.pump_inbound();
    h.server.pump_inbound();

    assert_eq!(
        remote_changes(&mut h.events),
        vec![(remote(0), RemoteConnectionState::Stopped)]
    );
}

#[test]
fn test_connection_closed_before_accept_is_released() {
    let mut h = start_server(4);
    let (client, handle) = dial(&h.net);
    client.close(handle, CloseReason::graceful());
    drain(&mut h.events);

    h.server.pump_inbound();
    h.server.pump_inbound();

    let inbound = h.watch.try_recv().unwrap().handle;
    assert_eq!(h.endpoint.status_of(inbound), None);
    assert!(
        h.endpoint
            .closed_connections()
            .iter()
            .any(|(closed, _)| *closed == inbound)
    );
    assert_eq!(h.server.connection_count(), 0);
    assert!(remote_changes(&mut h.events).is_empty());

    dial(&h.net);
    pump_twice(&mut h.server);
    assert_eq!(
        remote_changes(&mut h.events),
        vec![(remote(0), RemoteConnectionState::Started)]
    );
}

#[test]
fn test_remote_address_is_peer_identity() {
    let mut h = start_server(4);
    let (client, _) = dial(&h.net);
    pump_twice(&mut h.server);

    assert_eq!(
        h.server.remote_address(remote(0)),
        Some(client.local_identity().to_string())
    );
    assert_eq!(h.server.remote_address(remote(9)), None);
    assert_eq!(h.server.remote_address(PeerId::LocalHost), None);
}

// =========================================================================
// Messages
// =========================================================================

#[test]
fn test_pump_inbound_tags_messages_with_peer_and_channel() {
    let mut h = start_server(4);
    let (client, handle) = dial(&h.net);
    pump_twice(&mut h.server);
    drain(&mut h.events);

    client
        .send(handle, &frame(b"hello", Channel::UNRELIABLE), Reliability::Unreliable)
        .unwrap();
    client.flush(handle);
    h.server.pump_inbound();

    assert_eq!(
        drain(&mut h.events),
        vec![TransportEvent::ServerReceived {
            payload: b"hello".to_vec(),
            channel: Channel::UNRELIABLE,
            peer: remote(0),
        }]
    );
}

#[test]
fn test_pump_inbound_drops_empty_frame() {
    let mut h = start_server(4);
    let (client, handle) = dial(&h.net);
    pump_twice(&mut h.server);
    drain(&mut h.events);

    client.send(handle, &[], Reliability::Reliable).unwrap();
    client.flush(handle);
    h.server.pump_inbound();

    assert!(drain(&mut h.events).is_empty());
    assert_eq!(h.server.connection_count(), 1);
}

#[test]
fn test_message_racing_a_close_is_dropped() {
    let mut h = start_server(4);
    let (client, handle) = dial(&h.net);
    pump_twice(&mut h.server);
    drain(&mut h.events);

    client
        .send(handle, &frame(b"last words", Channel::RELIABLE), Reliability::Reliable)
        .unwrap();
    client.flush(handle);
    client.close(handle, CloseReason::graceful());
    h.server.pump_inbound();

    assert_eq!(
        drain(&mut h.events),
        vec![TransportEvent::RemoteConnectionState {
            peer: remote(0),
            state: RemoteConnectionState::Stopped,
        }]
    );
    assert_eq!(h.server.connection_count(), 0);
}

#[test]
fn test_send_then_pump_outbound_reaches_peer() {
    let mut h = start_server(4);
    let (client, handle) = dial(&h.net);
    pump_twice(&mut h.server);

    h.server.send(Channel::RELIABLE, b"welcome", remote(0));
    assert!(client.receive(handle, 8).is_empty(), "not flushed yet");
    h.server.pump_outbound();

    assert_eq!(
        client.receive(handle, 8),
        vec![frame(b"welcome", Channel::RELIABLE)]
    );
}

#[test]
fn test_send_fatal_error_disconnects_only_that_peer() {
    let mut h = start_server(4);
    let (_a, _) = dial(&h.net);
    let (_b, _) = dial(&h.net);
    pump_twice(&mut h.server);
    drain(&mut h.events);
    let handles = connected_handles(&mut h.watch);

    h.endpoint.inject_send_error(handles[0], SendError::NoConnection);
    h.server.send(Channel::RELIABLE, b"x", remote(0));

    assert_eq!(
        remote_changes(&mut h.events),
        vec![(remote(0), RemoteConnectionState::Stopped)]
    );
    assert_eq!(h.server.remote_state(remote(1)), RemoteConnectionState::Started);
    assert_eq!(h.server.connection_count(), 1);
}

#[test]
fn test_send_transient_error_keeps_peer() {
    let mut h = start_server(4);
    let (_a, _) = dial(&h.net);
    pump_twice(&mut h.server);
    drain(&mut h.events);
    let handles = connected_handles(&mut h.watch);

    h.endpoint.inject_send_error(handles[0], SendError::LimitExceeded);
    h.server.send(Channel::RELIABLE, b"x", remote(0));

    assert!(remote_changes(&mut h.events).is_empty());
    assert_eq!(h.server.remote_state(remote(0)), RemoteConnectionState::Started);
}

#[test]
fn test_send_to_unknown_peer_is_dropped() {
    let mut h = start_server(4);
    h.server.send(Channel::RELIABLE, b"x", remote(3));
    h.server.pump_outbound();
    assert_eq!(h.endpoint.flush_count(), 0);
}

#[test]
fn test_pump_outbound_flushes_every_peer() {
    let mut h = start_server(4);
    let _clients: Vec<_> = (0..3).map(|_| dial(&h.net)).collect();
    pump_twice(&mut h.server);

    h.server.pump_outbound();

    assert_eq!(h.endpoint.flush_count(), 3);
}

#[test]
fn test_relay_mode_accepts_by_identity() {
    let net = MemoryNetwork::new();
    let endpoint = net.endpoint();
    let (sink, mut events) = EventSink::channel();
    let mut server = ServerSession::new(Arc::new(endpoint.clone()), sink, 1200);
    assert!(server.start("", 0, 4, ServerMode::PeerRelay));
    drain(&mut events);

    let client = net.endpoint();
    client.connect_relay(endpoint.local_identity()).unwrap();
    pump_twice(&mut server);

    assert_eq!(
        remote_changes(&mut events),
        vec![(remote(0), RemoteConnectionState::Started)]
    );
}
