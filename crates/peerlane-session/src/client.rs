//! The client socket: one outbound connection to a server.
//!
//! # Handshake
//!
//! [`ClientSession::start`] is the only async operation in the crate. It
//! opens the connection synchronously ([`ClientSession::begin`]) and then
//! races three things ([`ClientSession::finish`]):
//!
//! ```text
//!   stop() cancels the token ──┐
//!   backend reports Connected ─┼─→ first one wins
//!   timeout elapses ───────────┘
//! ```
//!
//! The state lives behind a `Mutex` that is never held across an
//! `.await`, so `stop()` can run from anywhere while the handshake is
//! pending. Each handshake carries a generation number; its outcome is
//! applied only if no later `stop()`/`start()` superseded it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use peerlane_protocol::{
    Channel, ConnectionState, SocketRole, decode_owned, encode_in_place,
};
use peerlane_transport::{
    CloseReason, ConnectionHandle, ConnectionStatus, PeerBackend,
    StatusReceiver,
};
use tokio_util::sync::CancellationToken;

use crate::address::{ConnectTarget, parse_target};
use crate::{
    EventSink, LocalState, MAX_MESSAGES_PER_PUMP, MAX_STATUS_EVENTS_PER_PUMP,
    SessionError, TransportEvent,
};

/// Shortest handshake timeout, whatever the configuration says.
pub const MIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Client side of the transport.
pub struct ClientSession<B: PeerBackend> {
    backend: Arc<B>,
    timeout: Duration,
    inner: Mutex<ClientInner>,
}

struct ClientInner {
    state: LocalState,
    handle: Option<ConnectionHandle>,
    /// Status subscription while connected. During the handshake the
    /// receiver is owned by the handshake future instead.
    status_rx: Option<StatusReceiver>,
    cancel: Option<CancellationToken>,
    generation: u64,
    scratch: Vec<u8>,
}

/// How a handshake race ended.
enum Handshake {
    Connected,
    Cancelled,
    TimedOut,
    Rejected(String),
}

/// A connect attempt that has been opened but whose handshake has not
/// run yet. Produced by [`ClientSession::begin`], consumed by
/// [`ClientSession::finish`].
#[derive(Debug)]
pub struct PendingHandshake {
    handle: ConnectionHandle,
    address: String,
    status_rx: StatusReceiver,
    token: CancellationToken,
    generation: u64,
}

impl<B: PeerBackend> ClientSession<B> {
    /// Creates a stopped client. `max_mtu` sizes the outbound scratch
    /// buffer.
    pub fn new(
        backend: Arc<B>,
        sink: EventSink,
        timeout: Duration,
        max_mtu: usize,
    ) -> Self {
        Self {
            backend,
            timeout,
            inner: Mutex::new(ClientInner {
                state: LocalState::new(SocketRole::Client, sink),
                handle: None,
                status_rx: None,
                cancel: None,
                generation: 0,
                scratch: Vec::with_capacity(max_mtu + 1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClientInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state.get()
    }

    /// Connects to `address` and waits for the handshake to finish.
    ///
    /// Returns `true` once the client is `Started`. Every failure is
    /// logged and leaves the client `Stopped`.
    pub async fn start(&self, address: &str, port: u16) -> bool {
        match self.begin(address, port) {
            Some(pending) => self.finish(pending).await,
            None => false,
        }
    }

    /// Moves the client to `Starting` and opens the connection, without
    /// waiting for it.
    ///
    /// Returns `None` if the client was not stopped or the connection
    /// could not be opened; the failure is logged.
    pub fn begin(&self, address: &str, port: u16) -> Option<PendingHandshake> {
        let mut inner = self.lock();
        if inner.state.get() != ConnectionState::Stopped {
            tracing::warn!(
                error = %SessionError::AlreadyRunning,
                state = %inner.state.get()
            );
            return None;
        }
        inner.state.set(ConnectionState::Starting);

        match self.open(&mut inner, address, port) {
            Ok(pending) => Some(pending),
            Err(e) => {
                tracing::error!(error = %e, address, "client failed to start");
                self.stop_locked(&mut inner);
                None
            }
        }
    }

    /// Runs the handshake of an attempt opened by [`begin`](Self::begin).
    pub async fn finish(&self, pending: PendingHandshake) -> bool {
        let PendingHandshake {
            handle,
            address,
            mut status_rx,
            token,
            generation,
        } = pending;
        let timeout = self.timeout.max(MIN_HANDSHAKE_TIMEOUT);

        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => Handshake::Cancelled,
            outcome = wait_for_connected(&mut status_rx, handle) => outcome,
            () = tokio::time::sleep(timeout) => Handshake::TimedOut,
        };

        let mut inner = self.lock();
        if inner.generation != generation || token.is_cancelled() {
            tracing::warn!(error = %SessionError::HandshakeCancelled, %handle);
            return false;
        }

        match outcome {
            Handshake::Connected => {
                inner.cancel = None;
                inner.status_rx = Some(status_rx);
                inner.state.set(ConnectionState::Started);
                tracing::info!(%handle, address, "connected to server");
                true
            }
            Handshake::TimedOut => {
                let e = SessionError::HandshakeTimedOut(address);
                tracing::error!(error = %e, ?timeout);
                self.stop_locked(&mut inner);
                false
            }
            Handshake::Rejected(reason) => {
                let e = SessionError::HandshakeRejected(reason);
                tracing::error!(error = %e, %handle);
                self.stop_locked(&mut inner);
                false
            }
            Handshake::Cancelled => {
                tracing::warn!(error = %SessionError::HandshakeCancelled, %handle);
                false
            }
        }
    }

    /// Everything up to and including `connect`.
    fn open(
        &self,
        inner: &mut ClientInner,
        address: &str,
        port: u16,
    ) -> Result<PendingHandshake, SessionError> {
        if !self.backend.is_initialized() {
            return Err(SessionError::BackendNotInitialized);
        }
        // Subscribe first so a fast Connected is not missed.
        let status_rx = self.backend.subscribe();
        let handle = match parse_target(address, port)? {
            ConnectTarget::Direct(addr) => self.backend.connect(addr)?,
            ConnectTarget::Relay(identity) => {
                self.backend.connect_relay(identity)?
            }
        };
        tracing::debug!(%handle, address, port, "connecting");

        let token = CancellationToken::new();
        inner.generation += 1;
        inner.handle = Some(handle);
        inner.cancel = Some(token.clone());
        Ok(PendingHandshake {
            handle,
            address: address.to_string(),
            status_rx,
            token,
            generation: inner.generation,
        })
    }

    /// Disconnects. Returns `false` if the client was already stopped
    /// or stopping.
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        self.stop_locked(&mut inner)
    }

    fn stop_locked(&self, inner: &mut ClientInner) -> bool {
        if inner.state.is_stopped_or_stopping() {
            return false;
        }
        inner.state.set(ConnectionState::Stopping);
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
        inner.status_rx = None;
        if let Some(handle) = inner.handle.take() {
            self.backend.close(handle, CloseReason::graceful());
        }
        inner.state.set(ConnectionState::Stopped);
        true
    }

    /// Applies status changes, then delivers received messages.
    pub fn pump_inbound(&self) {
        let mut inner = self.lock();
        if inner.state.get() != ConnectionState::Started {
            return;
        }
        let Some(handle) = inner.handle else {
            return;
        };

        let mut lost = None;
        if let Some(rx) = inner.status_rx.as_mut() {
            for _ in 0..MAX_STATUS_EVENTS_PER_PUMP {
                let Ok(change) = rx.try_recv() else {
                    break;
                };
                if change.handle != handle {
                    continue;
                }
                if change.status.is_closed() {
                    lost = Some(change);
                    break;
                }
                tracing::debug!(%handle, status = ?change.status, "client status");
            }
        }
        if let Some(change) = lost {
            tracing::info!(
                %handle,
                status = ?change.status,
                reason = change.end_reason.as_deref().unwrap_or(""),
                "disconnected from server"
            );
            self.stop_locked(&mut inner);
            return;
        }

        for wire in self.backend.receive(handle, MAX_MESSAGES_PER_PUMP) {
            match decode_owned(wire) {
                Ok((payload, channel)) => inner
                    .state
                    .sink()
                    .emit(TransportEvent::ClientReceived { payload, channel }),
                Err(e) => tracing::warn!(error = %e, %handle, "dropping message"),
            }
        }
    }

    /// Flushes messages queued by [`send_to_server`](Self::send_to_server).
    pub fn pump_outbound(&self) {
        let inner = self.lock();
        if inner.state.get() != ConnectionState::Started {
            return;
        }
        if let Some(handle) = inner.handle {
            self.backend.flush(handle);
        }
    }

    /// Frames and queues a message for the server.
    ///
    /// A send error that means the connection is gone stops the client;
    /// any other send error is only logged.
    pub fn send_to_server(&self, channel: Channel, payload: &[u8]) {
        let mut inner = self.lock();
        if inner.state.get() != ConnectionState::Started {
            tracing::trace!("client not started, dropping message");
            return;
        }
        let Some(handle) = inner.handle else {
            return;
        };

        let mut scratch = std::mem::take(&mut inner.scratch);
        scratch.clear();
        scratch.extend_from_slice(payload);
        encode_in_place(&mut scratch, channel);
        let result = self.backend.send(handle, &scratch, channel.reliability());
        inner.scratch = scratch;

        match result {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                tracing::info!(error = %e, %handle, "connection to server was lost");
                self.stop_locked(&mut inner);
            }
            Err(e) => {
                tracing::error!(error = %e, %handle, %channel, "send to server failed");
            }
        }
    }
}

/// Waits until the backend reports `handle` as connected or closed.
async fn wait_for_connected(
    status_rx: &mut StatusReceiver,
    handle: ConnectionHandle,
) -> Handshake {
    while let Some(change) = status_rx.recv().await {
        if change.handle != handle {
            continue;
        }
        match change.status {
            ConnectionStatus::Connected => return Handshake::Connected,
            status if status.is_closed() => {
                return Handshake::Rejected(
                    change
                        .end_reason
                        .unwrap_or_else(|| format!("{status:?}")),
                );
            }
            status => tracing::debug!(%handle, ?status, "handshake progress"),
        }
    }
    Handshake::Rejected("backend closed the status stream".to_string())
}
