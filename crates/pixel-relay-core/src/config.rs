//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::protocol::CanvasBounds;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_PATH: &str = "/canvas";
const DEFAULT_OUTBOUND_BUFFER: usize = 256;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;
const LARGE_OUTBOUND_BUFFER: usize = 65_536;

/// Top-level pixel relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas: Option<CanvasConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// WebSocket channel path (default: "/canvas").
    #[serde(default = "default_path")]
    pub path: String,

    /// Allow cross-origin requests from any origin (default: true).
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Frames queued per peer before it is treated as unreachable.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Largest inbound WebSocket message accepted.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: None,
            path: default_path(),
            cors: true,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            rate_limit: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_path() -> String {
    DEFAULT_PATH.into()
}

fn default_true() -> bool {
    true
}

fn default_outbound_buffer() -> usize {
    DEFAULT_OUTBOUND_BUFFER
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Max concurrent WebSocket connections per IP (default: 10).
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: u32,
}

fn default_max_connections_per_ip() -> u32 {
    10
}

/// Drawing area. Bounds are enforced only when both dimensions are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanvasConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "pixel_relay_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::RelayError::Io)?;
        Self::parse(&raw)
    }

    /// Parse config text after env substitution.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted)
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(DEFAULT_PORT)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
    }

    pub fn channel_path(&self) -> String {
        self.gateway
            .as_ref()
            .map(|g| g.path.clone())
            .unwrap_or_else(default_path)
    }

    pub fn cors_enabled(&self) -> bool {
        self.gateway.as_ref().map(|g| g.cors).unwrap_or(true)
    }

    pub fn outbound_buffer(&self) -> usize {
        self.gateway
            .as_ref()
            .map(|g| g.outbound_buffer)
            .unwrap_or(DEFAULT_OUTBOUND_BUFFER)
    }

    pub fn max_message_bytes(&self) -> usize {
        self.gateway
            .as_ref()
            .map(|g| g.max_message_bytes)
            .unwrap_or(DEFAULT_MAX_MESSAGE_BYTES)
    }

    pub fn max_connections_per_ip(&self) -> Option<u32> {
        self.gateway
            .as_ref()
            .and_then(|g| g.rate_limit.as_ref())
            .map(|rl| rl.max_connections_per_ip)
    }

    pub fn canvas_bounds(&self) -> Option<CanvasBounds> {
        let canvas = self.canvas.as_ref()?;
        Some(CanvasBounds {
            width: canvas.width?,
            height: canvas.height?,
        })
    }

    /// Check the config for problems. Returns `(warnings, errors)`.
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(gateway) = &self.gateway {
            if !gateway.path.starts_with('/') {
                errors.push(format!(
                    "gateway.path '{}' must start with '/'",
                    gateway.path
                ));
            }
            if gateway.outbound_buffer == 0 {
                errors.push("gateway.outbound_buffer must be at least 1".into());
            } else if gateway.outbound_buffer > LARGE_OUTBOUND_BUFFER {
                warnings.push(format!(
                    "gateway.outbound_buffer {} is very large; slow peers may hold a lot of memory",
                    gateway.outbound_buffer
                ));
            }
            if gateway.max_message_bytes == 0 {
                errors.push("gateway.max_message_bytes must be at least 1".into());
            }
            if let Some(rl) = &gateway.rate_limit {
                if rl.max_connections_per_ip == 0 {
                    errors.push("gateway.rate_limit.max_connections_per_ip must be at least 1".into());
                }
            }
        }

        if let Some(canvas) = &self.canvas {
            for (name, value) in [("width", canvas.width), ("height", canvas.height)] {
                if let Some(v) = value {
                    if !v.is_finite() || v <= 0.0 {
                        errors.push(format!("canvas.{name} must be a positive number, got {v}"));
                    }
                }
            }
            if canvas.width.is_some() != canvas.height.is_some() {
                warnings.push(
                    "canvas bounds are only enforced when both width and height are set".into(),
                );
            }
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                warnings.push(format!(
                    "Unknown logging.format '{}', falling back to plain",
                    logging.format
                ));
            }
        }

        (warnings, errors)
    }
}

/// Resolve the pixel relay data directory (~/.pixel_relay).
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pixel_relay")
}
