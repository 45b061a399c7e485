//! MetaTrader 5 WebSocket bridge adapter

use serde_json::{json, Value};
use std::sync::Arc;

use super::{from_millis, from_secs, json_text, price, quote_from};
use super::{ConnectRequest, Decoded, OutboundFrame, ProviderAdapter, ProviderConfig, ProviderId, ProviderKind, ProviderResult};
use crate::clock::Stamp;
use crate::market_data::{CanonicalSymbol, SymbolMapper};

pub struct MetaTrader5Adapter {
    provider: ProviderId,
    symbols: Arc<SymbolMapper>,
}

impl MetaTrader5Adapter {
    pub fn new(provider: ProviderId, symbols: Arc<SymbolMapper>) -> Self {
        Self { provider, symbols }
    }
}

impl ProviderAdapter for MetaTrader5Adapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MetaTrader5
    }

    fn build_connect_request(&self, config: &ProviderConfig) -> ProviderResult<ConnectRequest> {
        Ok(ConnectRequest::new(config.url.clone()))
    }

    fn build_auth(&self, config: &ProviderConfig) -> Vec<OutboundFrame> {
        let creds = &config.credentials;
        let mut auth = json!({
            "type": "auth",
            "login": creds.username,
            "password": creds.password,
        });
        if let Some(server) = &creds.server {
            auth["server"] = json!(server);
        }
        vec![json_text(&auth)]
    }

    // Assumes an `auth_result` reply; set `await_auth_ack = false` for bridges that never send one
    fn awaits_auth_ack(&self) -> bool {
        true
    }

    fn build_subscription(&self, symbols: &[String]) -> Vec<OutboundFrame> {
        symbols
            .iter()
            .map(|s| json_text(&json!({ "type": "subscribe", "symbol": s, "period": "M1" })))
            .collect()
    }

    fn decode(&self, raw: &str, stamp: Stamp) -> Decoded {
        let message: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return Decoded::Unrecognized,
        };

        match message["type"].as_str() {
            Some("tick") => {
                let data = &message["data"];
                let Some(symbol) = data["symbol"].as_str() else {
                    return Decoded::Invalid("tick without symbol".to_string());
                };
                // time_msc is milliseconds, time is whole seconds
                let venue_time = from_millis(&data["time_msc"]).or_else(|| from_secs(&data["time"]));
                match (price(&data["bid"]), price(&data["ask"])) {
                    (Some(bid), Some(ask)) => {
                        quote_from(&self.provider, self.normalize_symbol(symbol), bid, ask, stamp, venue_time)
                    }
                    _ => Decoded::Invalid(format!("unparseable prices for {}", symbol)),
                }
            }
            Some("auth_result") => {
                if message["success"].as_bool().unwrap_or(false) {
                    Decoded::AuthAccepted
                } else {
                    Decoded::AuthRejected(message["error"].as_str().unwrap_or("login refused").to_string())
                }
            }
            Some("pong") => Decoded::Heartbeat,
            _ => Decoded::Unrecognized,
        }
    }

    fn normalize_symbol(&self, native: &str) -> CanonicalSymbol {
        self.symbols.to_canonical(native, ProviderKind::MetaTrader5)
    }

    fn keepalive(&self) -> OutboundFrame {
        json_text(&json!({ "type": "ping" }))
    }
}
