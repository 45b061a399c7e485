//! Exness quote stream adapter

use serde_json::{json, Value};
use std::sync::Arc;

use super::{from_millis, json_text, price, quote_from, Decoded, OutboundFrame, ProviderAdapter, ProviderConfig, ProviderKind};
use super::{ConnectRequest, ProviderId, ProviderResult};
use crate::clock::Stamp;
use crate::market_data::{CanonicalSymbol, SymbolMapper};

const DEFAULT_SERVER: &str = "Exness-MT5Real8";

pub struct ExnessAdapter {
    provider: ProviderId,
    symbols: Arc<SymbolMapper>,
}

impl ExnessAdapter {
    pub fn new(provider: ProviderId, symbols: Arc<SymbolMapper>) -> Self {
        Self { provider, symbols }
    }
}

impl ProviderAdapter for ExnessAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Exness
    }

    // Credentials travel in the auth frame, not the handshake.
    fn build_connect_request(&self, config: &ProviderConfig) -> ProviderResult<ConnectRequest> {
        Ok(ConnectRequest::new(config.url.clone()))
    }

    fn build_auth(&self, config: &ProviderConfig) -> Vec<OutboundFrame> {
        let creds = &config.credentials;
        vec![json_text(&json!({
            "action": "auth",
            "login": creds.username,
            "password": creds.password,
            "server": creds.server.as_deref().unwrap_or(DEFAULT_SERVER),
        }))]
    }

    // Assumes the bridge answers with an `auth` frame; silent gateways set `await_auth_ack = false`
    fn awaits_auth_ack(&self) -> bool {
        true
    }

    fn build_subscription(&self, symbols: &[String]) -> Vec<OutboundFrame> {
        symbols
            .iter()
            .map(|s| json_text(&json!({ "action": "subscribe", "symbol": s, "type": "quotes" })))
            .collect()
    }

    fn decode(&self, raw: &str, stamp: Stamp) -> Decoded {
        let message: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return Decoded::Unrecognized,
        };

        match message["type"].as_str() {
            Some("quote") => {
                let data = &message["data"];
                let Some(symbol) = data["symbol"].as_str() else {
                    return Decoded::Invalid("quote without symbol".to_string());
                };
                match (price(&data["bid"]), price(&data["ask"])) {
                    (Some(bid), Some(ask)) => quote_from(
                        &self.provider,
                        self.normalize_symbol(symbol),
                        bid,
                        ask,
                        stamp,
                        from_millis(&data["time"]),
                    ),
                    _ => Decoded::Invalid(format!("unparseable prices for {}", symbol)),
                }
            }
            Some("auth") => match message["status"].as_str() {
                Some("ok") | Some("success") => Decoded::AuthAccepted,
                _ => Decoded::AuthRejected(message["message"].as_str().unwrap_or("rejected").to_string()),
            },
            Some("ping") | Some("pong") => Decoded::Heartbeat,
            _ => Decoded::Unrecognized,
        }
    }

    fn normalize_symbol(&self, native: &str) -> CanonicalSymbol {
        self.symbols.to_canonical(native, ProviderKind::Exness)
    }

    fn keepalive(&self) -> OutboundFrame {
        json_text(&json!({ "action": "ping" }))
    }
}
