//! FXCM price stream adapter

use serde_json::{json, Value};
use std::sync::Arc;

use super::{from_millis, json_text, price, quote_from};
use super::{ConnectRequest, Decoded, OutboundFrame, ProviderAdapter, ProviderConfig, ProviderId, ProviderKind, ProviderResult};
use crate::clock::Stamp;
use crate::market_data::{CanonicalSymbol, SymbolMapper};

pub struct FxcmAdapter {
    provider: ProviderId,
    symbols: Arc<SymbolMapper>,
}

impl FxcmAdapter {
    pub fn new(provider: ProviderId, symbols: Arc<SymbolMapper>) -> Self {
        Self { provider, symbols }
    }
}

impl ProviderAdapter for FxcmAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Fxcm
    }

    // The access token is sent in-band.
    fn build_connect_request(&self, config: &ProviderConfig) -> ProviderResult<ConnectRequest> {
        Ok(ConnectRequest::new(config.url.clone()))
    }

    fn build_auth(&self, config: &ProviderConfig) -> Vec<OutboundFrame> {
        vec![json_text(&json!({
            "action": "authenticate",
            "access_token": config.credentials.token,
        }))]
    }

    // FXCM confirms with `authenticated` before streaming prices
    fn awaits_auth_ack(&self) -> bool {
        true
    }

    fn build_subscription(&self, symbols: &[String]) -> Vec<OutboundFrame> {
        symbols
            .iter()
            .map(|s| json_text(&json!({ "action": "subscribe", "symbol": s })))
            .collect()
    }

    fn decode(&self, raw: &str, stamp: Stamp) -> Decoded {
        let message: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return Decoded::Unrecognized,
        };

        match message["type"].as_str() {
            Some("price_update") => {
                let data = &message["data"];
                let Some(symbol) = data["symbol"].as_str() else {
                    return Decoded::Invalid("price_update without symbol".to_string());
                };
                match (price(&data["bid"]), price(&data["ask"])) {
                    (Some(bid), Some(ask)) => quote_from(
                        &self.provider,
                        self.normalize_symbol(symbol),
                        bid,
                        ask,
                        stamp,
                        from_millis(&data["timestamp"]),
                    ),
                    _ => Decoded::Invalid(format!("unparseable prices for {}", symbol)),
                }
            }
            Some("authenticated") => Decoded::AuthAccepted,
            Some("auth_error") => {
                Decoded::AuthRejected(message["message"].as_str().unwrap_or("access token rejected").to_string())
            }
            // Rate limits, unknown instruments and the like; the session stays up
            Some("error") => Decoded::Invalid(format!(
                "venue error: {}",
                message["message"].as_str().unwrap_or("unspecified")
            )),
            Some("heartbeat") => Decoded::Heartbeat,
            _ => Decoded::Unrecognized,
        }
    }

    fn normalize_symbol(&self, native: &str) -> CanonicalSymbol {
        self.symbols.to_canonical(native, ProviderKind::Fxcm)
    }
}
