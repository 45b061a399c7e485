use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one provider connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Streaming,
    Closing,
    Reconnecting,
    /// Retries exhausted; only an explicit restart leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, ConnectionState::Streaming)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Closing => "closing",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
