//! Canvas state store: the authoritative, append-only draw history.
//!
//! The store holds every [`PixelEvent`] accepted since process start, in the
//! order the relay accepted them. There is no removal; the history is the
//! current picture.

pub mod store;

pub use pixel_relay_core::PixelEvent;
pub use store::{CanvasHistory, CanvasStore};
