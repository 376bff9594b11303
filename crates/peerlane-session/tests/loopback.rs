//! Integration tests for the client host and its loopback to the server.

use std::sync::Arc;

use peerlane_protocol::{
    Channel, ConnectionState, PeerId, RemoteConnectionState, ServerMode,
};
use peerlane_session::{
    ClientHostSession, EventSink, EventStream, ServerSession, TransportEvent,
};
use peerlane_transport::{MemoryEndpoint, MemoryNetwork};

fn host_setup() -> (ServerSession<MemoryEndpoint>, ClientHostSession, EventStream) {
    let net = MemoryNetwork::new();
    let (sink, events) = EventSink::channel();
    let mut server = ServerSession::new(Arc::new(net.endpoint()), sink.clone(), 1200);
    assert!(server.start("", 0, 4, ServerMode::PeerRelay));
    let host = ClientHostSession::new(sink);
    (server, host, events)
}

fn drain(events: &mut EventStream) -> Vec<TransportEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn received_by_server(events: &mut EventStream) -> Vec<Vec<u8>> {
    drain(events)
        .into_iter()
        .filter_map(|event| match event {
            TransportEvent::ServerReceived {
                payload,
                peer: PeerId::LocalHost,
                ..
            } => Some(payload),
            _ => None,
        })
        .collect()
}

fn received_by_client(events: &mut EventStream) -> Vec<Vec<u8>> {
    drain(events)
        .into_iter()
        .filter_map(|event| match event {
            TransportEvent::ClientReceived { payload, .. } => Some(payload),
            _ => None,
        })
        .collect()
}

#[test]
fn test_start_announces_local_host_to_server() {
    let (mut server, host, mut events) = host_setup();
    drain(&mut events);

    assert!(host.start(&mut server));

    assert_eq!(host.state(), ConnectionState::Started);
    assert_eq!(
        server.remote_state(PeerId::LocalHost),
        RemoteConnectionState::Started
    );
    assert!(drain(&mut events).contains(
        &TransportEvent::RemoteConnectionState {
            peer: PeerId::LocalHost,
            state: RemoteConnectionState::Started,
        }
    ));
    assert!(!host.start(&mut server), "already running");
}

#[test]
fn test_start_without_running_server_fails() {
    let net = MemoryNetwork::new();
    let (sink, _events) = EventSink::channel();
    let mut server = ServerSession::new(Arc::new(net.endpoint()), sink.clone(), 1200);
    let host = ClientHostSession::new(sink);

    assert!(!host.start(&mut server));
    assert_eq!(host.state(), ConnectionState::Stopped);
}

#[test]
fn test_client_to_server_delivered_exactly_once_in_order() {
    let (mut server, host, mut events) = host_setup();
    host.start(&mut server);
    drain(&mut events);

    host.send_to_server(&mut server, Channel::RELIABLE, b"one");
    host.send_to_server(&mut server, Channel::UNRELIABLE, b"two");
    server.pump_inbound();
    server.pump_inbound();

    assert_eq!(
        received_by_server(&mut events),
        vec![b"one".to_vec(), b"two".to_vec()]
    );
}

#[test]
fn test_server_to_client_delivered_exactly_once() {
    let (mut server, host, mut events) = host_setup();
    host.start(&mut server);
    drain(&mut events);

    server.send(Channel::UNRELIABLE, b"state", PeerId::LocalHost);
    host.pump_inbound(&mut server);
    host.pump_inbound(&mut server);

    assert_eq!(received_by_client(&mut events), vec![b"state".to_vec()]);
}

#[test]
fn test_queued_packets_dropped_after_stop() {
    let (mut server, host, mut events) = host_setup();
    host.start(&mut server);
    host.send_to_server(&mut server, Channel::RELIABLE, b"lost");
    server.send(Channel::RELIABLE, b"also lost", PeerId::LocalHost);

    assert!(host.stop(&mut server));
    assert!(!host.stop(&mut server));
    drain(&mut events);
    server.pump_inbound();
    host.pump_inbound(&mut server);

    assert!(drain(&mut events).is_empty());
    assert_eq!(
        server.remote_state(PeerId::LocalHost),
        RemoteConnectionState::Stopped
    );
}

#[test]
fn test_stop_peer_local_host_stops_client_host() {
    let (mut server, host, mut events) = host_setup();
    host.start(&mut server);
    drain(&mut events);

    assert!(server.stop_peer(PeerId::LocalHost));

    assert_eq!(host.state(), ConnectionState::Stopped);
    let events = drain(&mut events);
    assert!(events.contains(&TransportEvent::RemoteConnectionState {
        peer: PeerId::LocalHost,
        state: RemoteConnectionState::Stopped,
    }));
    assert!(!server.stop_peer(PeerId::LocalHost), "already stopped");
}

#[test]
fn test_server_stop_stops_client_host_on_next_pump() {
    let (mut server, host, mut events) = host_setup();
    host.start(&mut server);

    server.stop();
    assert_eq!(
        server.remote_state(PeerId::LocalHost),
        RemoteConnectionState::Stopped
    );
    host.pump_inbound(&mut server);

    assert_eq!(host.state(), ConnectionState::Stopped);
    let local_host_states: Vec<RemoteConnectionState> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            TransportEvent::RemoteConnectionState {
                peer: PeerId::LocalHost,
                state,
            } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        local_host_states,
        vec![RemoteConnectionState::Started, RemoteConnectionState::Stopped]
    );
}

#[test]
fn test_restart_after_stop() {
    let (mut server, host, mut events) = host_setup();
    host.start(&mut server);
    host.stop(&mut server);

    assert!(host.start(&mut server));
    drain(&mut events);
    host.send_to_server(&mut server, Channel::RELIABLE, b"again");
    server.pump_inbound();

    assert_eq!(received_by_server(&mut events), vec![b"again".to_vec()]);
}
