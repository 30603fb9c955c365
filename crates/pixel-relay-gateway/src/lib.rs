//! WebSocket broadcast relay for a shared drawing canvas.
//!
//! Peers connect on a single channel path. Each new peer receives the full
//! draw history, and every accepted draw event is fanned out to all other
//! connected peers in the order the relay accepted it.

pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod relay;
pub mod server;
pub mod state;

pub use registry::{ConnectionRegistry, Frame, Peer, PeerId, PeerSink, PeerState};
pub use relay::{BroadcastRelay, Dispatch};
pub use server::{build_router, serve, start_relay};
pub use state::RelayState;
