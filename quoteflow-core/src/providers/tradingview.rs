//! TradingView quote feed over socket.io text framing.
//!
//! Packets are an engine.io type prefix followed by an optional payload:
//! `0{..}` open, `2`/`3` ping/pong, `40` namespace connect, `42[event, data]`.

use serde_json::{json, Value};
use std::sync::Arc;

use super::{price, quote_from};
use super::{Decoded, OutboundFrame, ProviderAdapter, ProviderId, ProviderKind};
use crate::clock::Stamp;
use crate::market_data::{CanonicalSymbol, SymbolMapper};

const EVENT_PREFIX: &str = "42";

pub struct TradingViewAdapter {
    provider: ProviderId,
    symbols: Arc<SymbolMapper>,
}

impl TradingViewAdapter {
    pub fn new(provider: ProviderId, symbols: Arc<SymbolMapper>) -> Self {
        Self { provider, symbols }
    }

    fn decode_event(&self, event: &str, payload: &Value, stamp: Stamp) -> Decoded {
        match event {
            "quote_completed" | "qsd" => {
                let Some(name) = payload["n"].as_str() else {
                    return Decoded::Invalid(format!("{} without symbol", event));
                };
                let values = &payload["v"];
                match (price(&values["bid"]), price(&values["ask"])) {
                    (Some(bid), Some(ask)) => quote_from(&self.provider, self.normalize_symbol(name), bid, ask, stamp, None),
                    // Field-level updates without a full top of book
                    _ => Decoded::Heartbeat,
                }
            }
            _ => Decoded::Unrecognized,
        }
    }
}

impl ProviderAdapter for TradingViewAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::TradingView
    }

    fn build_subscription(&self, symbols: &[String]) -> Vec<OutboundFrame> {
        if symbols.is_empty() {
            return Vec::new();
        }
        vec![OutboundFrame::Text(format!("{}{}", EVENT_PREFIX, json!(["quote_add_symbols", symbols])))]
    }

    fn decode(&self, raw: &str, stamp: Stamp) -> Decoded {
        match raw {
            "2" | "3" | "40" => return Decoded::Heartbeat,
            _ if raw.starts_with('0') => return Decoded::Heartbeat,
            _ => {}
        }

        let Some(body) = raw.strip_prefix(EVENT_PREFIX) else {
            return Decoded::Unrecognized;
        };
        let packet: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => return Decoded::Invalid("malformed socket.io event".to_string()),
        };
        match packet[0].as_str() {
            Some(event) => self.decode_event(event, &packet[1], stamp),
            None => Decoded::Unrecognized,
        }
    }

    fn normalize_symbol(&self, native: &str) -> CanonicalSymbol {
        self.symbols.to_canonical(native, ProviderKind::TradingView)
    }

    fn keepalive(&self) -> OutboundFrame {
        OutboundFrame::Text("2".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{expect_quote, mapper, stamp};

    fn adapter() -> TradingViewAdapter {
        TradingViewAdapter::new(ProviderId::new("tv"), mapper())
    }

    #[test]
    fn test_subscription_frame() {
        let frames = adapter().build_subscription(&["FX:EURUSD".to_string(), "FX:GBPUSD".to_string()]);
        assert_eq!(frames, vec![OutboundFrame::Text(r#"42["quote_add_symbols",["FX:EURUSD","FX:GBPUSD"]]"#.to_string())]);
        assert!(adapter().build_subscription(&[]).is_empty());
    }

    #[test]
    fn test_decode_quote_event() {
        let raw = r#"42["quote_completed",{"n":"FX:EURUSD","v":{"bid":1.0851,"ask":1.0852,"lp":1.08515}}]"#;
        let quote = expect_quote(adapter().decode(raw, stamp()));
        assert_eq!(quote.symbol().as_str(), "EURUSD");
        assert_eq!(quote.ask(), 1.0852);
        assert_eq!(quote.venue_time(), None);
    }

    #[test]
    fn test_decode_framing_packets() {
        let a = adapter();
        assert_eq!(a.decode("2", stamp()), Decoded::Heartbeat);
        assert_eq!(a.decode(r#"0{"sid":"abc","pingInterval":25000}"#, stamp()), Decoded::Heartbeat);
        assert_eq!(a.decode("40", stamp()), Decoded::Heartbeat);
        assert_eq!(a.decode(r#"42["series_loading",{}]"#, stamp()), Decoded::Unrecognized);
        assert!(matches!(a.decode("42[not json", stamp()), Decoded::Invalid(_)));
        assert_eq!(a.decode("hello", stamp()), Decoded::Unrecognized);
    }

    #[test]
    fn test_decode_rejects_crossed_quote() {
        let raw = r#"42["qsd",{"n":"FX:EURUSD","v":{"bid":1.09,"ask":1.08}}]"#;
        assert!(matches!(adapter().decode(raw, stamp()), Decoded::Invalid(_)));
    }
}
