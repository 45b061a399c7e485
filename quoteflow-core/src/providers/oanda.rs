//! OANDA v20 pricing stream adapter.
//!
//! Instruments are chosen in the stream URL, so there are no subscription
//! frames; the bearer token goes in the handshake headers.

use serde_json::Value;
use std::sync::Arc;
use url::Url;

use super::{authorization_header, from_rfc3339, price, quote_from};
use super::{ConnectRequest, Decoded, OutboundFrame, ProviderAdapter, ProviderConfig, ProviderError, ProviderId, ProviderKind, ProviderResult};
use crate::clock::Stamp;
use crate::market_data::{CanonicalSymbol, SymbolMapper};

const ACCOUNT_PLACEHOLDER: &str = "{account_id}";

pub struct OandaAdapter {
    provider: ProviderId,
    symbols: Arc<SymbolMapper>,
}

impl OandaAdapter {
    pub fn new(provider: ProviderId, symbols: Arc<SymbolMapper>) -> Self {
        Self { provider, symbols }
    }
}

impl ProviderAdapter for OandaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Oanda
    }

    fn build_connect_request(&self, config: &ProviderConfig) -> ProviderResult<ConnectRequest> {
        let mut raw = config.url.clone();
        if raw.contains(ACCOUNT_PLACEHOLDER) {
            let account = config.credentials.account_id.as_deref().ok_or_else(|| ProviderError::InvalidConfig {
                details: format!("{}: url needs credentials.account_id", config.id),
            })?;
            raw = raw.replace(ACCOUNT_PLACEHOLDER, account);
        }

        let mut url = Url::parse(&raw)?;
        if !config.symbols.is_empty() {
            url.query_pairs_mut().append_pair("instruments", &config.symbols.join(","));
        }

        let request = ConnectRequest::new(url.to_string());
        Ok(match authorization_header(config)? {
            Some(value) => request.with_header("Authorization", value),
            None => request,
        })
    }

    fn build_subscription(&self, _symbols: &[String]) -> Vec<OutboundFrame> {
        Vec::new()
    }

    fn decode(&self, raw: &str, stamp: Stamp) -> Decoded {
        let message: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return Decoded::Unrecognized,
        };

        match message["type"].as_str() {
            Some("PRICE") => {
                let Some(instrument) = message["instrument"].as_str() else {
                    return Decoded::Invalid("price without instrument".to_string());
                };
                let bid = price(&message["bids"][0]["price"]);
                let ask = price(&message["asks"][0]["price"]);
                match (bid, ask) {
                    (Some(bid), Some(ask)) => quote_from(
                        &self.provider,
                        self.normalize_symbol(instrument),
                        bid,
                        ask,
                        stamp,
                        from_rfc3339(&message["time"]),
                    ),
                    _ => Decoded::Invalid(format!("empty book for {}", instrument)),
                }
            }
            Some("HEARTBEAT") => Decoded::Heartbeat,
            _ => Decoded::Unrecognized,
        }
    }

    fn normalize_symbol(&self, native: &str) -> CanonicalSymbol {
        self.symbols.to_canonical(native, ProviderKind::Oanda)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{expect_quote, mapper, stamp};
    use crate::providers::{AuthMethod, Credentials};

    fn adapter() -> OandaAdapter {
        OandaAdapter::new(ProviderId::new("oanda"), mapper())
    }

    #[test]
    fn test_decode_price_with_string_prices() {
        let raw = r#"{"type":"PRICE","instrument":"EUR_USD","time":"2024-03-01T12:00:00.123456789Z",
            "bids":[{"price":"1.08010","liquidity":1000000}],"asks":[{"price":"1.08024","liquidity":1000000}],
            "tradeable":true}"#;
        let quote = expect_quote(adapter().decode(raw, stamp()));
        assert_eq!(quote.symbol().as_str(), "EURUSD");
        assert_eq!(quote.bid(), 1.0801);
        assert_eq!(quote.ask(), 1.08024);
        assert!(quote.venue_time().is_some());
    }

    #[test]
    fn test_decode_heartbeat_and_empty_book() {
        let a = adapter();
        assert_eq!(a.decode(r#"{"type":"HEARTBEAT","time":"2024-03-01T12:00:05Z"}"#, stamp()), Decoded::Heartbeat);
        let empty = r#"{"type":"PRICE","instrument":"EUR_USD","bids":[],"asks":[]}"#;
        assert!(matches!(a.decode(empty, stamp()), Decoded::Invalid(_)));
        let crossed = r#"{"type":"PRICE","instrument":"EUR_USD","bids":[{"price":"1.2"}],"asks":[{"price":"1.1"}]}"#;
        assert!(matches!(a.decode(crossed, stamp()), Decoded::Invalid(_)));
    }

    #[test]
    fn test_connect_request_fills_account_and_instruments() {
        let config = ProviderConfig::new(
            ProviderId::new("oanda"),
            ProviderKind::Oanda,
            "wss://stream-fxtrade.oanda.com/v3/accounts/{account_id}/pricing/stream",
        )
        .with_symbols(["EUR_USD", "GBP_USD"])
        .with_auth(
            AuthMethod::Token,
            Credentials { token: Some("tok".into()), account_id: Some("001-002".into()), ..Default::default() },
        );

        let request = adapter().build_connect_request(&config).unwrap();
        let url = Url::parse(&request.url).unwrap();
        assert_eq!(url.path(), "/v3/accounts/001-002/pricing/stream");
        let instruments: Vec<_> = url.query_pairs().filter(|(k, _)| k == "instruments").map(|(_, v)| v.into_owned()).collect();
        assert_eq!(instruments, vec!["EUR_USD,GBP_USD".to_string()]);
        assert_eq!(request.header("Authorization"), Some("Bearer tok"));
        assert!(adapter().build_subscription(&config.symbols).is_empty());
    }

    #[test]
    fn test_connect_request_requires_account_id() {
        let config = ProviderConfig::new(ProviderId::new("oanda"), ProviderKind::Oanda, "wss://h/v3/accounts/{account_id}/pricing/stream");
        assert!(matches!(adapter().build_connect_request(&config), Err(ProviderError::InvalidConfig { .. })));
    }
}
