//! In-memory canvas history.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::trace;

use pixel_relay_core::PixelEvent;

/// Ordered draw history plus bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct CanvasHistory {
    pub events: Vec<PixelEvent>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Time of the most recent append. `None` until the first draw.
    pub last_draw_at: Option<DateTime<Utc>>,
}

impl CanvasHistory {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            events: Vec::new(),
            created_at: now,
            last_updated: now,
            last_draw_at: None,
        }
    }

    pub fn push(&mut self, event: PixelEvent) {
        self.events.push(event);
        let now = Utc::now();
        self.last_updated = now;
        self.last_draw_at = Some(now);
    }
}

impl Default for CanvasHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe, append-only store of accepted draw events.
///
/// Insertion order is draw order. Readers get a copy taken at call time, so a
/// racing append may or may not be visible to a given snapshot.
#[derive(Debug, Default)]
pub struct CanvasStore {
    history: RwLock<CanvasHistory>,
}

impl CanvasStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing events, keeping their order.
    pub fn with_events(events: Vec<PixelEvent>) -> Self {
        let mut history = CanvasHistory::new();
        history.events = events;
        Self {
            history: RwLock::new(history),
        }
    }

    /// Append an already validated event.
    pub fn append(&self, event: PixelEvent) {
        let mut history = self.write();
        history.push(event);
        trace!(events = history.events.len(), "Canvas event appended");
    }

    /// Copy of the full ordered history.
    pub fn snapshot(&self) -> Vec<PixelEvent> {
        self.read().events.clone()
    }

    pub fn len(&self) -> usize {
        self.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().events.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.read().created_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.read().last_updated
    }

    pub fn last_draw_at(&self) -> Option<DateTime<Utc>> {
        self.read().last_draw_at
    }

    // A panic while holding the lock cannot leave the Vec half-pushed, so a
    // poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, CanvasHistory> {
        self.history.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CanvasHistory> {
        self.history.write().unwrap_or_else(PoisonError::into_inner)
    }
}
