//! Broadcast relay: snapshot on join, append and fan-out on draw.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use pixel_relay_canvas::CanvasStore;
use pixel_relay_core::{Envelope, PixelCodec, PixelEvent, RelayError, Result};

use crate::registry::{ConnectionRegistry, Frame, Peer, PeerId, PeerSink};

/// What the relay did with one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A draw event was appended and fanned out.
    Broadcast { delivered: usize, evicted: usize },
    /// Valid frame with nothing to do (unknown type, snapshot from a client,
    /// or a sender that already disconnected).
    Ignored,
    /// The frame failed to decode and was dropped.
    Rejected,
}

/// Orchestrates the canvas store and the connection registry.
///
/// Joins and draws are serialized by one lock so that every registered peer
/// observes accepted draws in the same order, and a joining peer receives
/// exactly the history that precedes its first live update. The lock guards
/// only non-blocking work: decoding happens before it is taken and peer
/// delivery is a bounded queue push.
pub struct BroadcastRelay {
    codec: PixelCodec,
    store: Arc<CanvasStore>,
    registry: Arc<ConnectionRegistry>,
    ingest: Mutex<()>,
}

impl BroadcastRelay {
    pub fn new(codec: PixelCodec, store: Arc<CanvasStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            codec,
            store,
            registry,
            ingest: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<CanvasStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Current draw history.
    pub fn snapshot(&self) -> Vec<PixelEvent> {
        self.store.snapshot()
    }

    /// Register a new peer and queue its snapshot.
    ///
    /// The snapshot goes to the new peer only. Fails with `PeerUnreachable`
    /// if the snapshot cannot be queued, in which case the peer is already
    /// removed again.
    pub fn connect(&self, sink: Arc<dyn PeerSink>) -> Result<PeerId> {
        let _ingest = self.ingest.lock().unwrap_or_else(PoisonError::into_inner);

        let peer = Peer::new(sink);
        let id = peer.id();
        self.registry.add(peer.clone());
        peer.activate();

        let frame = Frame::from(Envelope::Snapshot(self.store.snapshot()).encode());
        if let Err(e) = peer.deliver(frame) {
            // Never counted as connected, so no disconnect is recorded.
            self.registry.remove(id);
            warn!(peer_id = %id, error = %e, "Failed to queue snapshot for new peer");
            return Err(e);
        }

        #[cfg(feature = "metrics")]
        crate::metrics::record_peer_connect();

        info!(peer_id = %id, peers = self.registry.len(), "Client connected");
        Ok(id)
    }

    /// Remove a peer after its transport closed. Safe to call more than once.
    pub fn disconnect(&self, id: PeerId) -> bool {
        match self.registry.remove(id) {
            Some(_) => {
                #[cfg(feature = "metrics")]
                crate::metrics::record_peer_disconnect();

                info!(peer_id = %id, peers = self.registry.len(), "Client disconnected");
                true
            }
            None => false,
        }
    }

    /// Handle one inbound text frame from `origin`.
    pub fn on_message(&self, origin: PeerId, raw: &str) -> Dispatch {
        let decoded = self.codec.decode(raw);
        self.handle_decoded(origin, decoded)
    }

    /// Handle one inbound binary frame from `origin`.
    pub fn on_binary(&self, origin: PeerId, raw: &[u8]) -> Dispatch {
        let decoded = self.codec.decode_bytes(raw);
        self.handle_decoded(origin, decoded)
    }

    fn handle_decoded(&self, origin: PeerId, decoded: Result<Envelope>) -> Dispatch {
        match decoded {
            Ok(Envelope::Draw(event)) => self.accept_draw(origin, event),
            Ok(other) => {
                debug!(peer_id = %origin, kind = other.kind(), "Ignoring non-draw message");
                Dispatch::Ignored
            }
            Err(e) => {
                #[cfg(feature = "metrics")]
                crate::metrics::record_error(e.kind());

                warn!(peer_id = %origin, error = %e, "Dropping malformed message");
                Dispatch::Rejected
            }
        }
    }

    fn accept_draw(&self, origin: PeerId, event: PixelEvent) -> Dispatch {
        let _ingest = self.ingest.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.registry.contains(origin) {
            debug!(peer_id = %origin, "Ignoring draw from closed peer");
            return Dispatch::Ignored;
        }

        self.store.append(event.clone());
        let frame = Frame::from(Envelope::Draw(event).encode());

        let mut delivered = 0;
        let mut unreachable = Vec::new();
        self.registry.for_each(|peer| {
            if peer.id() == origin || !peer.is_active() {
                return;
            }
            match peer.deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => unreachable.push((peer.id(), e)),
            }
        });

        let evicted = unreachable.len();
        for (id, e) in unreachable {
            self.evict(id, &e);
        }

        #[cfg(feature = "metrics")]
        crate::metrics::record_draw();

        debug!(peer_id = %origin, delivered, evicted, "Broadcast draw");
        Dispatch::Broadcast { delivered, evicted }
    }

    fn evict(&self, id: PeerId, reason: &RelayError) {
        if self.registry.remove(id).is_some() {
            #[cfg(feature = "metrics")]
            {
                crate::metrics::record_peer_disconnect();
                crate::metrics::record_error(reason.kind());
            }

            warn!(peer_id = %id, error = %reason, peers = self.registry.len(), "Evicting unreachable peer");
        }
    }
}
