use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Errors the relay absorbs without affecting other peers.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedMessage(_) | Self::PeerUnreachable(_))
    }

    /// Stable label for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "malformed_message",
            Self::PeerUnreachable(_) => "peer_unreachable",
            Self::Transport(_) => "transport",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(RelayError::MalformedMessage("x".into()).is_recoverable());
        assert!(RelayError::PeerUnreachable("gone".into()).is_recoverable());
        assert!(!RelayError::Config("bad".into()).is_recoverable());
        assert!(!RelayError::Transport("reset".into()).is_recoverable());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(RelayError::MalformedMessage("x".into()).kind(), "malformed_message");
        assert_eq!(RelayError::PeerUnreachable("x".into()).kind(), "peer_unreachable");
        let io = RelayError::from(std::io::Error::other("boom"));
        assert_eq!(io.kind(), "io");
    }
}
