//! Connection table for tracking watched descriptors.
//!
//! A fixed-capacity slab of slots. Slot 0 holds the listener; every other
//! occupied slot holds one accepted client stream registered for read
//! readiness under `Token(slot_id)`. Freed slots are reused in place, so a
//! slot id stays stable for as long as its connection lives.

use crate::runtime::Listener;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use slab::Slab;
use std::io;
use std::net::{Shutdown, SocketAddr};
use tracing::debug;

/// Index of a slot in the table, also used as the poll token.
pub type SlotId = usize;

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    /// The accepted stream.
    pub stream: TcpStream,
    /// Remote address reported by accept.
    pub peer: SocketAddr,
    /// Readiness the slot is watched for.
    pub interest: Interest,
}

/// An occupied slot.
#[derive(Debug)]
pub enum Slot {
    /// Reserved for the listening socket, which the event loop owns.
    Listener,
    /// An accepted client.
    Client(Connection),
}

/// A stream the table refused to track.
///
/// The stream is handed back so the caller can shut it down without
/// serving it.
#[derive(Debug)]
pub enum RegisterError {
    /// Every slot is taken.
    Full(TcpStream),
    /// The poller rejected the registration.
    Io(TcpStream, io::Error),
}

impl RegisterError {
    /// Take back the refused stream.
    pub fn into_stream(self) -> TcpStream {
        match self {
            RegisterError::Full(stream) | RegisterError::Io(stream, _) => stream,
        }
    }
}

/// Registry of watched descriptors using slab allocation.
///
/// Provides O(1) register and release. Capacity counts the listener slot.
#[derive(Debug)]
pub struct ConnectionTable {
    slots: Slab<Slot>,
    capacity: usize,
}

impl ConnectionTable {
    /// Create an empty table holding at most `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            capacity,
        }
    }

    /// Claim a slot for the listener and watch it for incoming connections.
    pub fn register_listener(
        &mut self,
        registry: &Registry,
        listener: &mut Listener,
    ) -> io::Result<SlotId> {
        if self.is_full() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "no slot left for the listener",
            ));
        }
        let entry = self.slots.vacant_entry();
        let slot_id = entry.key();
        registry.register(listener, Token(slot_id), Interest::READABLE)?;
        entry.insert(Slot::Listener);
        Ok(slot_id)
    }

    /// Track a newly accepted stream with read interest.
    pub fn register(
        &mut self,
        registry: &Registry,
        mut stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<SlotId, RegisterError> {
        if self.is_full() {
            return Err(RegisterError::Full(stream));
        }

        let entry = self.slots.vacant_entry();
        let slot_id = entry.key();
        let interest = Interest::READABLE;
        if let Err(e) = registry.register(&mut stream, Token(slot_id), interest) {
            return Err(RegisterError::Io(stream, e));
        }

        entry.insert(Slot::Client(Connection {
            stream,
            peer,
            interest,
        }));
        debug!(slot = slot_id, peer = %peer, "Connection held in slot");
        Ok(slot_id)
    }

    /// Shut down and close a client slot, freeing it for reuse.
    ///
    /// Returns `false` if the slot is already free or holds the listener.
    pub fn release(&mut self, registry: &Registry, slot_id: SlotId) -> bool {
        if !matches!(self.slots.get(slot_id), Some(Slot::Client(_))) {
            return false;
        }
        if let Slot::Client(mut conn) = self.slots.remove(slot_id) {
            let _ = registry.deregister(&mut conn.stream);
            shutdown_stream(&conn.stream);
            debug!(slot = slot_id, peer = %conn.peer, interest = ?conn.interest, "Connection closed");
        }
        true
    }

    /// Shut down every client slot, leaving only the listener.
    ///
    /// Returns the slots and peers that were drained, in table order.
    pub fn drain(&mut self, registry: &Registry) -> Vec<(SlotId, SocketAddr)> {
        let clients: Vec<SlotId> = self
            .active_slots()
            .filter(|&slot_id| !self.is_listener(slot_id))
            .collect();

        clients
            .into_iter()
            .filter_map(|slot_id| {
                let peer = self.get_mut(slot_id)?.peer;
                self.release(registry, slot_id);
                Some((slot_id, peer))
            })
            .collect()
    }

    /// Get a client connection.
    pub fn get_mut(&mut self, slot_id: SlotId) -> Option<&mut Connection> {
        match self.slots.get_mut(slot_id) {
            Some(Slot::Client(conn)) => Some(conn),
            _ => None,
        }
    }

    /// Whether `slot_id` is the listener's slot.
    pub fn is_listener(&self, slot_id: SlotId) -> bool {
        matches!(self.slots.get(slot_id), Some(Slot::Listener))
    }

    /// Occupied slots in table order, listener included.
    pub fn active_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.slots.iter().map(|(id, _)| id)
    }

    /// Number of occupied slots, listener included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check whether every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Maximum number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Shut down both directions; the peer may already be gone.
fn shutdown_stream(stream: &TcpStream) {
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        debug!(error = %e, "Shutdown on closed connection");
    }
}
