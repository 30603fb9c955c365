//! Core types, config, and errors for the pixel relay.

pub mod config;
pub mod error;
pub mod protocol;

pub use error::{RelayError, Result};
pub use protocol::{Envelope, PixelCodec, PixelEvent};
