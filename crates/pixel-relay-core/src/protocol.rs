//! Pixel relay wire protocol.
//!
//! Every frame is a JSON text message shaped `{"type": ..., "payload": ...}`.
//! The payload shape depends on the type, so frames are decoded once at the
//! boundary into an [`Envelope`] and never re-inspected downstream.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{RelayError, Result};

/// Wire tag for a single draw action.
pub const DRAW_PIXEL: &str = "DRAW_PIXEL";

/// Wire tag for the snapshot sent to a newly joined peer.
pub const INITIAL_DATA: &str = "initialData";

/// One atomic draw action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelEvent {
    pub x: f64,
    pub y: f64,
    pub color: String,
}

/// Inclusive drawing area shared by client and relay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasBounds {
    pub width: f64,
    pub height: f64,
}

impl PixelEvent {
    pub fn new(x: f64, y: f64, color: impl Into<String>) -> Self {
        Self {
            x,
            y,
            color: color.into(),
        }
    }

    /// Check coordinates and color. Bounds are only enforced when given.
    pub fn validate(&self, bounds: Option<CanvasBounds>) -> Result<()> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(RelayError::MalformedMessage(
                "coordinates must be finite".into(),
            ));
        }
        if self.x < 0.0 || self.y < 0.0 {
            return Err(RelayError::MalformedMessage(format!(
                "negative coordinates ({}, {})",
                self.x, self.y
            )));
        }
        if let Some(bounds) = bounds {
            if self.x > bounds.width || self.y > bounds.height {
                return Err(RelayError::MalformedMessage(format!(
                    "({}, {}) outside {}x{} canvas",
                    self.x, self.y, bounds.width, bounds.height
                )));
            }
        }
        if !is_hex_color(&self.color) {
            return Err(RelayError::MalformedMessage(format!(
                "invalid color {:?}",
                self.color
            )));
        }
        Ok(())
    }
}

/// `#RGB`, `#RRGGBB` or `#RRGGBBAA`.
fn is_hex_color(color: &str) -> bool {
    match color.strip_prefix('#') {
        Some(hex) => {
            matches!(hex.len(), 3 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Full ordered draw history, sent once per connection.
    Snapshot(Vec<PixelEvent>),
    /// A single draw action.
    Draw(PixelEvent),
    /// Any type tag this relay does not understand. Never forwarded.
    Unknown(String),
}

impl Envelope {
    /// Wire tag of this envelope.
    pub fn kind(&self) -> &str {
        match self {
            Self::Snapshot(_) => INITIAL_DATA,
            Self::Draw(_) => DRAW_PIXEL,
            Self::Unknown(kind) => kind.as_str(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> String {
        let frame = match self {
            Self::Snapshot(events) => json!({ "type": INITIAL_DATA, "payload": events }),
            Self::Draw(event) => json!({ "type": DRAW_PIXEL, "payload": event }),
            Self::Unknown(kind) => json!({ "type": kind, "payload": Value::Null }),
        };
        frame.to_string()
    }

    /// Decode without bounds enforcement.
    pub fn decode(raw: &str) -> Result<Self> {
        PixelCodec::default().decode(raw)
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Decoder that validates payloads against the configured canvas bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelCodec {
    bounds: Option<CanvasBounds>,
}

impl PixelCodec {
    pub fn new(bounds: Option<CanvasBounds>) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> Option<CanvasBounds> {
        self.bounds
    }

    /// Decode a text frame.
    ///
    /// Unrecognized type tags decode to [`Envelope::Unknown`] rather than an
    /// error, so newer clients cannot break older relays.
    pub fn decode(&self, raw: &str) -> Result<Envelope> {
        let frame: RawFrame = serde_json::from_str(raw)
            .map_err(|e| RelayError::MalformedMessage(format!("invalid frame: {e}")))?;
        self.decode_frame(frame)
    }

    /// Decode a binary frame carrying the same JSON document.
    pub fn decode_bytes(&self, raw: &[u8]) -> Result<Envelope> {
        let frame: RawFrame = serde_json::from_slice(raw)
            .map_err(|e| RelayError::MalformedMessage(format!("invalid frame: {e}")))?;
        self.decode_frame(frame)
    }

    fn decode_frame(&self, frame: RawFrame) -> Result<Envelope> {
        match frame.kind.as_str() {
            DRAW_PIXEL => {
                let event: PixelEvent = serde_json::from_value(frame.payload).map_err(|e| {
                    RelayError::MalformedMessage(format!("invalid {DRAW_PIXEL} payload: {e}"))
                })?;
                event.validate(self.bounds)?;
                Ok(Envelope::Draw(event))
            }
            INITIAL_DATA => {
                let events: Vec<PixelEvent> =
                    serde_json::from_value(frame.payload).map_err(|e| {
                        RelayError::MalformedMessage(format!("invalid {INITIAL_DATA} payload: {e}"))
                    })?;
                for event in &events {
                    event.validate(self.bounds)?;
                }
                Ok(Envelope::Snapshot(events))
            }
            _ => Ok(Envelope::Unknown(frame.kind)),
        }
    }
}
