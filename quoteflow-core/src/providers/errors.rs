//! Provider connection errors

use tokio_tungstenite::tungstenite;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Timeout after {millis} ms while {phase}")]
    Timeout { phase: &'static str, millis: u64 },

    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("Protocol error: {details}")]
    Protocol { details: String },

    #[error("Connection closed by peer")]
    Closed,

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },
}

/// How a failure is classified for metrics and logging. Both kinds go
/// through the same backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Authentication,
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Authentication { .. } => ErrorKind::Authentication,
            _ => ErrorKind::Transient,
        }
    }

    pub(crate) fn timeout(phase: &'static str, after: std::time::Duration) -> Self {
        ProviderError::Timeout {
            phase,
            millis: after.as_millis() as u64,
        }
    }
}

impl From<tungstenite::Error> for ProviderError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => ProviderError::Closed,
            tungstenite::Error::Protocol(e) => ProviderError::Protocol { details: e.to_string() },
            tungstenite::Error::Http(response) if response.status().as_u16() == 401 || response.status().as_u16() == 403 => {
                ProviderError::Authentication {
                    reason: format!("handshake rejected with HTTP {}", response.status()),
                }
            }
            other => ProviderError::Connection { message: other.to_string() },
        }
    }
}

impl From<url::ParseError> for ProviderError {
    fn from(err: url::ParseError) -> Self {
        ProviderError::InvalidConfig { details: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        let auth = ProviderError::Authentication { reason: "bad token".into() };
        assert_eq!(auth.kind(), ErrorKind::Authentication);
        assert_eq!(ProviderError::Closed.kind(), ErrorKind::Transient);
        assert_eq!(
            ProviderError::timeout("connecting", std::time::Duration::from_secs(2)).to_string(),
            "Timeout after 2000 ms while connecting"
        );
    }

    #[test]
    fn test_from_tungstenite_closed() {
        let err: ProviderError = tungstenite::Error::ConnectionClosed.into();
        assert_eq!(err, ProviderError::Closed);
    }
}
