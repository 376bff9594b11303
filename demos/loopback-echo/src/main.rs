//! Echo demo over the in-memory backend.
//!
//! One process runs two transports on a simulated network:
//!
//! - a host running the server and its own client host,
//! - a remote client that connects to the host by identity.
//!
//! Every tick both clients send a line, the server echoes each line back
//! to whoever sent it, and the clients log what comes back.
//!
//! Run with `RUST_LOG=debug` to see the transport's own logs.

use std::time::Duration;

use peerlane::prelude::*;

const TICK: Duration = Duration::from_millis(50);
const TICKS: u32 = 20;

#[tokio::main]
async fn main() {
    init_tracing();

    let network = MemoryNetwork::new();
    let host_endpoint = network.endpoint();
    let host_identity = host_endpoint.local_identity();

    let (mut host, mut host_events) =
        PeerTransport::new(host_endpoint, TransportConfig::default());
    let (mut remote, mut remote_events) = PeerTransport::new(
        network.endpoint(),
        TransportConfig {
            client_address: host_identity.to_string(),
            ..TransportConfig::default()
        },
    );

    if !host.start_connection(true) || !host.start_connection(false) {
        tracing::error!("host failed to start");
        return;
    }
    remote.start_connection(false);

    let mut interval = tokio::time::interval(TICK);
    for tick in 0..TICKS {
        interval.tick().await;

        host.iterate_incoming(true);
        host.iterate_incoming(false);
        remote.iterate_incoming(false);

        while let Ok(event) = host_events.try_recv() {
            match event {
                TransportEvent::ServerReceived {
                    payload,
                    channel,
                    peer,
                } => host.send_to_client(channel, &payload, peer),
                TransportEvent::ClientReceived { payload, .. } => {
                    tracing::info!(
                        echo = %String::from_utf8_lossy(&payload),
                        "client host got"
                    );
                }
                other => tracing::info!(?other, "host event"),
            }
        }
        while let Ok(event) = remote_events.try_recv() {
            match event {
                TransportEvent::ClientReceived { payload, .. } => {
                    tracing::info!(
                        echo = %String::from_utf8_lossy(&payload),
                        "remote client got"
                    );
                }
                other => tracing::info!(?other, "remote event"),
            }
        }

        host.send_to_server(
            Channel::RELIABLE,
            format!("host line {tick}").as_bytes(),
        );
        if remote.local_state(false) == ConnectionState::Started {
            remote.send_to_server(
                Channel::UNRELIABLE,
                format!("remote line {tick}").as_bytes(),
            );
        }

        host.iterate_outgoing(true);
        remote.iterate_outgoing(false);
    }

    remote.shutdown();
    host.shutdown();
    while let Ok(event) = host_events.try_recv() {
        tracing::info!(?event, "host event");
    }
}
