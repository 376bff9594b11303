//! Local connection state recorder.

use peerlane_protocol::{ConnectionState, SocketRole};

use crate::{EventSink, TransportEvent};

/// The state of one local socket, plus the sink its changes go to.
///
/// This is a recorder, not a validator: any transition is accepted, and
/// each real change (new value differs from the current one) emits
/// exactly one [`TransportEvent::LocalConnectionState`] tagged with the
/// socket's role.
#[derive(Debug)]
pub struct LocalState {
    role: SocketRole,
    current: ConnectionState,
    sink: EventSink,
}

impl LocalState {
    /// Creates a recorder in the `Stopped` state.
    pub fn new(role: SocketRole, sink: EventSink) -> Self {
        Self {
            role,
            current: ConnectionState::Stopped,
            sink,
        }
    }

    /// Moves to `state`. Returns `false` (and emits nothing) when the
    /// state is unchanged.
    pub fn set(&mut self, state: ConnectionState) -> bool {
        if state == self.current {
            return false;
        }
        tracing::trace!(role = ?self.role, from = %self.current, to = %state, "local state");
        self.current = state;
        self.sink.emit(TransportEvent::LocalConnectionState {
            role: self.role,
            state,
        });
        true
    }

    pub fn get(&self) -> ConnectionState {
        self.current
    }

    pub fn role(&self) -> SocketRole {
        self.role
    }

    /// `true` for `Stopped` and `Stopping`.
    pub fn is_stopped_or_stopping(&self) -> bool {
        matches!(
            self.current,
            ConnectionState::Stopped | ConnectionState::Stopping
        )
    }

    pub(crate) fn sink(&self) -> &EventSink {
        &self.sink
    }
}
