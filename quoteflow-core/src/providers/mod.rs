//! Provider connectivity: venue adapters, the transport seam and shared types.
//!
//! An adapter is a pure protocol translator. It knows how a venue wants to be
//! connected to, authenticated and subscribed, and how to turn one raw text
//! frame into a [`Decoded`] value. It never touches the network, the cache or
//! the clock; the supervisor drives it.

pub mod errors;
pub mod transport;
pub mod types;

pub mod exness;
pub mod fxcm;
pub mod interactive_brokers;
pub mod metatrader5;
pub mod oanda;
pub mod tradingview;

pub use errors::{ErrorKind, ProviderError, ProviderResult};
pub use transport::{ConnectRequest, Connector, InboundFrame, OutboundFrame, Transport, WsConnector};
pub use types::{AuthMethod, Credentials, ProviderConfig, ProviderId, ProviderKind, Quote, QuoteError, ReconnectPolicy};

use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::clock::Stamp;
use crate::market_data::{CanonicalSymbol, SymbolMapper};

/// Outcome of decoding one raw frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Quote(Quote),
    /// Venue-level keepalive or any frame that only proves liveness.
    Heartbeat,
    AuthAccepted,
    AuthRejected(String),
    /// Carried no usable quote: failed validation or parsing, or a
    /// venue-reported error that does not end the session.
    Invalid(String),
    Unrecognized,
}

pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// URL and headers for the handshake. The default carries the
    /// `Authorization` header for token and basic-credentials auth.
    fn build_connect_request(&self, config: &ProviderConfig) -> ProviderResult<ConnectRequest> {
        let request = ConnectRequest::new(config.url.clone());
        Ok(match authorization_header(config)? {
            Some(value) => request.with_header("Authorization", value),
            None => request,
        })
    }

    /// Frames sent right after connecting, when auth is configured.
    fn build_auth(&self, _config: &ProviderConfig) -> Vec<OutboundFrame> {
        Vec::new()
    }

    /// Whether the venue answers the auth frames before it accepts
    /// subscriptions. `ProviderConfig::await_auth_ack` overrides this for
    /// deployments whose gateway never acknowledges.
    fn awaits_auth_ack(&self) -> bool {
        false
    }

    fn build_subscription(&self, symbols: &[String]) -> Vec<OutboundFrame>;

    /// Translate one raw frame. Must not panic on arbitrary input.
    fn decode(&self, raw: &str, stamp: Stamp) -> Decoded;

    fn normalize_symbol(&self, native: &str) -> CanonicalSymbol;

    fn keepalive(&self) -> OutboundFrame {
        OutboundFrame::Ping
    }
}

/// Build the adapter for a provider's configured kind.
pub fn adapter_for(config: &ProviderConfig, symbols: Arc<SymbolMapper>) -> Arc<dyn ProviderAdapter> {
    let provider = config.id.clone();
    match config.kind {
        ProviderKind::InteractiveBrokers => Arc::new(interactive_brokers::InteractiveBrokersAdapter::new(provider, symbols)),
        ProviderKind::Exness => Arc::new(exness::ExnessAdapter::new(provider, symbols)),
        ProviderKind::Oanda => Arc::new(oanda::OandaAdapter::new(provider, symbols)),
        ProviderKind::Fxcm => Arc::new(fxcm::FxcmAdapter::new(provider, symbols)),
        ProviderKind::MetaTrader5 => Arc::new(metatrader5::MetaTrader5Adapter::new(provider, symbols)),
        ProviderKind::TradingView => Arc::new(tradingview::TradingViewAdapter::new(provider, symbols)),
    }
}

/// `Authorization` header value for the configured auth method.
pub(crate) fn authorization_header(config: &ProviderConfig) -> ProviderResult<Option<String>> {
    let creds = &config.credentials;
    match config.auth {
        AuthMethod::None => Ok(None),
        AuthMethod::Token => {
            let token = creds.token.as_deref().ok_or_else(|| ProviderError::InvalidConfig {
                details: format!("{}: token auth without a token", config.id),
            })?;
            Ok(Some(format!("Bearer {}", token)))
        }
        AuthMethod::BasicCredentials => match (creds.username.as_deref(), creds.password.as_deref()) {
            (Some(user), Some(pass)) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
                Ok(Some(format!("Basic {}", encoded)))
            }
            _ => Err(ProviderError::InvalidConfig {
                details: format!("{}: basic-credentials auth without username/password", config.id),
            }),
        },
    }
}

/// Validate and wrap a decoded price pair.
pub(crate) fn quote_from(
    provider: &ProviderId,
    symbol: CanonicalSymbol,
    bid: f64,
    ask: f64,
    stamp: Stamp,
    venue_time: Option<DateTime<Utc>>,
) -> Decoded {
    match Quote::new(symbol, bid, ask, provider.clone(), stamp) {
        Ok(quote) => Decoded::Quote(quote.with_venue_time(venue_time)),
        Err(e) => Decoded::Invalid(e.to_string()),
    }
}

/// A price that may arrive as a JSON number or a numeric string.
pub(crate) fn price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn from_millis(value: &Value) -> Option<DateTime<Utc>> {
    let millis = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))?;
    Utc.timestamp_millis_opt(millis).single()
}

pub(crate) fn from_secs(value: &Value) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(value.as_i64()?, 0).single()
}

pub(crate) fn from_rfc3339(value: &Value) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.as_str()?).ok().map(|t| t.with_timezone(&Utc))
}

pub(crate) fn json_text(value: &Value) -> OutboundFrame {
    OutboundFrame::Text(value.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_headers() {
        let base = ProviderConfig::new(ProviderId::new("p"), ProviderKind::Oanda, "wss://example.test");
        assert_eq!(authorization_header(&base).unwrap(), None);

        let token = base.clone().with_auth(
            AuthMethod::Token,
            Credentials { token: Some("abc".into()), ..Default::default() },
        );
        assert_eq!(authorization_header(&token).unwrap().as_deref(), Some("Bearer abc"));

        let basic = base.clone().with_auth(
            AuthMethod::BasicCredentials,
            Credentials { username: Some("user".into()), password: Some("pass".into()), ..Default::default() },
        );
        assert_eq!(authorization_header(&basic).unwrap().as_deref(), Some("Basic dXNlcjpwYXNz"));

        let missing = base.with_auth(AuthMethod::Token, Credentials::default());
        assert!(matches!(authorization_header(&missing), Err(ProviderError::InvalidConfig { .. })));
    }

    #[test]
    fn test_price_accepts_numbers_and_strings() {
        assert_eq!(price(&serde_json::json!(1.25)), Some(1.25));
        assert_eq!(price(&serde_json::json!("1.25")), Some(1.25));
        assert_eq!(price(&serde_json::json!("n/a")), None);
        assert_eq!(price(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_adapter_for_selects_kind() {
        let mapper = Arc::new(SymbolMapper::new());
        for kind in [
            ProviderKind::InteractiveBrokers,
            ProviderKind::Exness,
            ProviderKind::Oanda,
            ProviderKind::Fxcm,
            ProviderKind::MetaTrader5,
            ProviderKind::TradingView,
        ] {
            let config = ProviderConfig::new(ProviderId::new("p"), kind, "wss://example.test");
            assert_eq!(adapter_for(&config, mapper.clone()).kind(), kind);
        }
    }
}
