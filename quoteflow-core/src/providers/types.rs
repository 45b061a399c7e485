//! Provider configuration and the normalized quote type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::clock::Stamp;
use crate::config::duration_ms;
use crate::market_data::CanonicalSymbol;

/// Unique provider identifier, as named in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Venue protocol family; selects the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "interactive_brokers")]
    InteractiveBrokers,
    #[serde(rename = "exness")]
    Exness,
    #[serde(rename = "oanda")]
    Oanda,
    #[serde(rename = "fxcm")]
    Fxcm,
    #[serde(rename = "metatrader5")]
    MetaTrader5,
    #[serde(rename = "tradingview")]
    TradingView,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProviderKind::InteractiveBrokers => "Interactive Brokers",
            ProviderKind::Exness => "Exness",
            ProviderKind::Oanda => "OANDA",
            ProviderKind::Fxcm => "FXCM",
            ProviderKind::MetaTrader5 => "MetaTrader 5",
            ProviderKind::TradingView => "TradingView",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    #[default]
    None,
    Token,
    BasicCredentials,
}

/// Already-resolved secrets. Where they come from is the caller's business.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub account_id: Option<String>,
    pub server: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("token", &redact(&self.token))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("api_key", &redact(&self.api_key))
            .field("account_id", &self.account_id)
            .field("server", &self.server)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    pub multiplier: f64,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Time a session must stay streaming before the attempt counter resets.
    #[serde(rename = "stable_after_ms", with = "duration_ms")]
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            max_attempts: 10,
            stable_after: Duration::from_secs(60),
        }
    }
}

fn default_heartbeat() -> Duration {
    Duration::from_secs(30)
}

fn default_phase_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: ProviderId,
    #[serde(default)]
    pub name: String,
    pub kind: ProviderKind,
    pub url: String,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(default)]
    pub credentials: Credentials,
    /// Instruments in the provider's native notation.
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(rename = "heartbeat_interval_ms", with = "duration_ms", default = "default_heartbeat")]
    pub heartbeat_interval: Duration,
    #[serde(rename = "connect_timeout_ms", with = "duration_ms", default = "default_phase_timeout")]
    pub connect_timeout: Duration,
    #[serde(rename = "auth_timeout_ms", with = "duration_ms", default = "default_phase_timeout")]
    pub auth_timeout: Duration,
    /// Wait for the venue's auth reply before subscribing. Unset uses the adapter's default.
    #[serde(default)]
    pub await_auth_ack: Option<bool>,
}

impl ProviderConfig {
    pub fn new(id: ProviderId, kind: ProviderKind, url: impl Into<String>) -> Self {
        Self {
            name: kind.to_string(),
            id,
            kind,
            url: url.into(),
            auth: AuthMethod::None,
            credentials: Credentials::default(),
            symbols: Vec::new(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: default_heartbeat(),
            connect_timeout: default_phase_timeout(),
            auth_timeout: default_phase_timeout(),
            await_auth_ack: None,
        }
    }

    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auth(mut self, auth: AuthMethod, credentials: Credentials) -> Self {
        self.auth = auth;
        self.credentials = credentials;
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuoteError {
    #[error("Non-finite price: bid {bid}, ask {ask}")]
    NonFinite { bid: f64, ask: f64 },

    #[error("Non-positive price: bid {bid}, ask {ask}")]
    NonPositive { bid: f64, ask: f64 },

    #[error("Crossed quote: ask {ask} below bid {bid}")]
    Crossed { bid: f64, ask: f64 },

    #[error("Empty symbol")]
    EmptySymbol,
}

/// Normalized top-of-book quote from one provider.
///
/// Fields are private so the `ask >= bid > 0` invariant holds for every value
/// that exists; build one with [`Quote::new`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    symbol: CanonicalSymbol,
    bid: f64,
    ask: f64,
    spread: f64,
    provider: ProviderId,
    timestamp: DateTime<Utc>,
    venue_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    received_at: Instant,
}

impl Quote {
    pub fn new(
        symbol: CanonicalSymbol,
        bid: f64,
        ask: f64,
        provider: ProviderId,
        stamp: Stamp,
    ) -> Result<Self, QuoteError> {
        if symbol.as_str().is_empty() {
            return Err(QuoteError::EmptySymbol);
        }
        if !bid.is_finite() || !ask.is_finite() {
            return Err(QuoteError::NonFinite { bid, ask });
        }
        if bid <= 0.0 || ask <= 0.0 {
            return Err(QuoteError::NonPositive { bid, ask });
        }
        if ask < bid {
            return Err(QuoteError::Crossed { bid, ask });
        }

        Ok(Self {
            symbol,
            bid,
            ask,
            spread: ask - bid,
            provider,
            timestamp: stamp.wall,
            venue_time: None,
            received_at: stamp.instant,
        })
    }

    pub fn with_venue_time(mut self, venue_time: Option<DateTime<Utc>>) -> Self {
        self.venue_time = venue_time;
        self
    }

    pub fn symbol(&self) -> &CanonicalSymbol {
        &self.symbol
    }

    pub fn bid(&self) -> f64 {
        self.bid
    }

    pub fn ask(&self) -> f64 {
        self.ask
    }

    pub fn spread(&self) -> f64 {
        self.spread
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn venue_time(&self) -> Option<DateTime<Utc>> {
        self.venue_time
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn quote(bid: f64, ask: f64) -> Result<Quote, QuoteError> {
        Quote::new(CanonicalSymbol::new("EURUSD"), bid, ask, ProviderId::new("a"), ManualClock::new().stamp())
    }

    #[test]
    fn test_quote_derives_spread() {
        let q = quote(1.1000, 1.1002).unwrap();
        assert!((q.spread() - 0.0002).abs() < 1e-12);
        assert_eq!(q.provider().as_str(), "a");
    }

    #[test]
    fn test_quote_rejects_invalid_prices() {
        assert!(matches!(quote(1.1002, 1.1000), Err(QuoteError::Crossed { .. })));
        assert!(matches!(quote(0.0, 1.1), Err(QuoteError::NonPositive { .. })));
        assert!(matches!(quote(f64::NAN, 1.1), Err(QuoteError::NonFinite { .. })));
        assert!(quote(1.1, 1.1).is_ok());
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials {
            token: Some("secret-token".to_string()),
            username: Some("alice".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("alice"));
    }
}
