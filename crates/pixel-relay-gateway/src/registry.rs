//! Connection registry: the set of live peers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use pixel_relay_core::{RelayError, Result};

/// An encoded outbound frame. Cloning shares the underlying buffer, so one
/// encoded broadcast is handed to every peer and written to each socket
/// without copying.
pub type Frame = axum::extract::ws::Utf8Bytes;

/// Opaque handle identifying one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outbound half of a peer's transport.
///
/// Delivery must not wait: implementations either queue the frame at once or
/// fail with [`RelayError::PeerUnreachable`].
pub trait PeerSink: Send + Sync {
    fn deliver(&self, frame: Frame) -> Result<()>;
}

impl PeerSink for mpsc::Sender<Frame> {
    fn deliver(&self, frame: Frame) -> Result<()> {
        self.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => RelayError::PeerUnreachable("outbound queue full".into()),
            TrySendError::Closed(_) => RelayError::PeerUnreachable("connection closed".into()),
        })
    }
}

/// Per-connection lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
    Connecting = 0,
    Active = 1,
    Closed = 2,
}

impl PeerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Active,
            _ => Self::Closed,
        }
    }
}

/// One live connection. Clones share the same lifecycle state.
#[derive(Clone)]
pub struct Peer {
    id: PeerId,
    sink: Arc<dyn PeerSink>,
    state: Arc<AtomicU8>,
    connected_at: DateTime<Utc>,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

impl Peer {
    pub fn new(sink: Arc<dyn PeerSink>) -> Self {
        Self {
            id: PeerId::new(),
            sink,
            state: Arc::new(AtomicU8::new(PeerState::Connecting as u8)),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == PeerState::Active
    }

    /// `Connecting -> Active`. Returns false if the peer already left `Connecting`.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                PeerState::Connecting as u8,
                PeerState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closed`. Returns true only for the call that performed the transition.
    pub fn close(&self) -> bool {
        self.state.swap(PeerState::Closed as u8, Ordering::AcqRel) != PeerState::Closed as u8
    }

    /// Queue a frame for this peer. Closed peers are never sent to.
    pub fn deliver(&self, frame: Frame) -> Result<()> {
        if self.state() == PeerState::Closed {
            return Err(RelayError::PeerUnreachable(format!("peer {} is closed", self.id)));
        }
        self.sink.deliver(frame)
    }
}

/// Set of currently registered peers, safe to share across tasks.
///
/// The lock is only held for map operations and is never held across an
/// `.await` or while calling peer handlers.
#[derive(Default)]
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<PeerId, Peer>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, peer: Peer) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.id(), peer);
    }

    /// Remove a peer and mark it closed. Removing an absent peer is a no-op.
    pub fn remove(&self, id: PeerId) -> Option<Peer> {
        let removed = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(peer) = &removed {
            peer.close();
        }
        removed
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<Peer> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the registered peers.
    pub fn peers(&self) -> Vec<Peer> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Visit a snapshot of the registered peers.
    ///
    /// The handler runs without the registry lock held, so it may add or
    /// remove peers; changes are not reflected in the current iteration.
    pub fn for_each<F>(&self, mut handler: F)
    where
        F: FnMut(&Peer),
    {
        for peer in self.peers() {
            handler(&peer);
        }
    }
}
