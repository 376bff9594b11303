//! Connection bookkeeping for the server.
//!
//! The server addresses peers by small [`ConnectionId`]s, the backend by
//! [`ConnectionHandle`]s, and the host framework asks for a peer's
//! [`IdentityToken`]. [`ConnectionRegistry`] keeps all three in sync:
//!
//! ```text
//!   handle ──→ id ──→ handle
//!                 └─→ identity ──→ id
//! ```
//!
//! Every map is a plain `HashMap`, so each lookup is O(1) on average.
//! [`IdAllocator`] hands out the ids and recycles released ones.
//!
//! Neither type talks to the backend; the server session does that and
//! uses these purely as bookkeeping.

use std::collections::{HashMap, VecDeque};

use peerlane_protocol::ConnectionId;
use peerlane_transport::{ConnectionHandle, IdentityToken};

use crate::RegistryError;

/// Bidirectional map between backend handles, peer identities, and
/// connection ids.
///
/// Invariant: an entry exists for an id exactly while that peer is
/// connected (remote state `Started`).
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_handle: HashMap<ConnectionHandle, ConnectionId>,
    by_id: HashMap<ConnectionId, ConnectionHandle>,
    identities: HashMap<ConnectionId, IdentityToken>,
    by_identity: HashMap<IdentityToken, ConnectionId>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connected peer.
    ///
    /// # Errors
    /// Fails without changing anything if the id, the handle, or the
    /// identity is already registered.
    pub fn insert(
        &mut self,
        handle: ConnectionHandle,
        identity: IdentityToken,
        id: ConnectionId,
    ) -> Result<(), RegistryError> {
        if self.by_id.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        if self.by_handle.contains_key(&handle) {
            return Err(RegistryError::DuplicateHandle(handle));
        }
        if self.by_identity.contains_key(&identity) {
            return Err(RegistryError::DuplicateIdentity(identity));
        }

        // Checked all three first so a failure leaves the maps in sync.
        self.by_handle.insert(handle, id);
        self.by_id.insert(id, handle);
        self.identities.insert(id, identity);
        self.by_identity.insert(identity, id);
        Ok(())
    }

    /// Removes a peer from every map. Returns what was stored for it.
    pub fn remove(
        &mut self,
        id: ConnectionId,
    ) -> Option<(ConnectionHandle, IdentityToken)> {
        let handle = self.by_id.remove(&id)?;
        self.by_handle.remove(&handle);
        let identity = self.identities.remove(&id)?;
        self.by_identity.remove(&identity);
        Some((handle, identity))
    }

    pub fn id_of(&self, handle: ConnectionHandle) -> Option<ConnectionId> {
        self.by_handle.get(&handle).copied()
    }

    pub fn handle_of(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.by_id.get(&id).copied()
    }

    pub fn identity_of(&self, id: ConnectionId) -> Option<IdentityToken> {
        self.identities.get(&id).copied()
    }

    pub fn id_of_identity(
        &self,
        identity: IdentityToken,
    ) -> Option<ConnectionId> {
        self.by_identity.get(&identity).copied()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Every registered backend handle, in no particular order.
    pub fn handles(&self) -> impl Iterator<Item = ConnectionHandle> + '_ {
        self.by_handle.keys().copied()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Forgets every peer.
    pub fn clear(&mut self) {
        self.by_handle.clear();
        self.by_id.clear();
        self.identities.clear();
        self.by_identity.clear();
    }
}

/// Hands out connection ids, reusing released ones first (FIFO).
///
/// Reuse keeps ids small for the lifetime of a long-running server
/// instead of growing with every connection ever made.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u32,
    recycled: VecDeque<ConnectionId>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the oldest released id, or the next never-used one.
    pub fn allocate(&mut self) -> ConnectionId {
        if let Some(id) = self.recycled.pop_front() {
            return id;
        }
        let id = ConnectionId(self.next);
        self.next += 1;
        id
    }

    /// Makes `id` available again.
    pub fn release(&mut self, id: ConnectionId) {
        self.recycled.push_back(id);
    }

    /// Starts over from id 0 with an empty recycle pool.
    pub fn reset(&mut self) {
        self.next = 0;
        self.recycled.clear();
    }
}
