//! Interactive Brokers Client Portal market data stream.
//!
//! IB addresses instruments by contract id. Subscriptions are `smd+<conid>+{...}`
//! text commands and updates arrive as JSON objects with numeric field codes:
//! `84` bid, `86` ask, `_updated` epoch milliseconds.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::{from_millis, price, quote_from};
use super::{Decoded, OutboundFrame, ProviderAdapter, ProviderId, ProviderKind};
use crate::clock::Stamp;
use crate::market_data::{CanonicalSymbol, SymbolMapper};

const FIELD_BID: &str = "84";
const FIELD_ASK: &str = "86";

/// IDEALPRO cash pairs and spot gold.
const CONTRACTS: &[(&str, u64)] = &[
    ("EURUSD", 12087792),
    ("GBPUSD", 12087797),
    ("USDJPY", 12087881),
    ("USDCHF", 12087820),
    ("AUDUSD", 15016062),
    ("USDCAD", 12087802),
    ("NZDUSD", 15016059),
    ("XAUUSD", 69067924),
];

pub struct InteractiveBrokersAdapter {
    provider: ProviderId,
    symbols: Arc<SymbolMapper>,
    by_conid: HashMap<u64, CanonicalSymbol>,
}

impl InteractiveBrokersAdapter {
    pub fn new(provider: ProviderId, symbols: Arc<SymbolMapper>) -> Self {
        let by_conid = CONTRACTS
            .iter()
            .map(|(symbol, conid)| (*conid, CanonicalSymbol::new(*symbol)))
            .collect();
        Self {
            provider,
            symbols,
            by_conid,
        }
    }

    pub fn conid_for(&self, symbol: &CanonicalSymbol) -> Option<u64> {
        self.by_conid.iter().find(|(_, s)| *s == symbol).map(|(conid, _)| *conid)
    }

    fn conid_of(message: &Value) -> Option<u64> {
        if let Some(conid) = message["conid"].as_u64() {
            return Some(conid);
        }
        message["topic"].as_str()?.strip_prefix("smd+")?.parse().ok()
    }
}

/// IB prefixes some values with a status letter (`C1.0850` for a closing price).
fn ib_price(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim_start_matches(|c: char| c.is_ascii_alphabetic()).parse().ok(),
        other => price(other),
    }
}

impl ProviderAdapter for InteractiveBrokersAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::InteractiveBrokers
    }

    fn build_subscription(&self, symbols: &[String]) -> Vec<OutboundFrame> {
        symbols
            .iter()
            .filter_map(|native| {
                let symbol = self.normalize_symbol(native);
                match self.conid_for(&symbol) {
                    Some(conid) => Some(OutboundFrame::Text(format!(
                        "smd+{}+{}",
                        conid,
                        json!({ "fields": [FIELD_BID, FIELD_ASK] })
                    ))),
                    None => {
                        warn!("No IB contract id for {}, skipping subscription", native);
                        None
                    }
                }
            })
            .collect()
    }

    fn decode(&self, raw: &str, stamp: Stamp) -> Decoded {
        let message: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return Decoded::Unrecognized,
        };

        let topic = message["topic"].as_str().unwrap_or_default();
        if topic == "system" || topic == "tic" || message.get("hb").is_some() {
            return Decoded::Heartbeat;
        }
        if !topic.starts_with("smd+") {
            return Decoded::Unrecognized;
        }

        let Some(conid) = Self::conid_of(&message) else {
            return Decoded::Invalid(format!("market data without conid: {}", topic));
        };
        let Some(symbol) = self.by_conid.get(&conid).cloned() else {
            return Decoded::Invalid(format!("unknown conid {}", conid));
        };

        match (ib_price(&message[FIELD_BID]), ib_price(&message[FIELD_ASK])) {
            (Some(bid), Some(ask)) => quote_from(&self.provider, symbol, bid, ask, stamp, from_millis(&message["_updated"])),
            // Partial updates carry only the fields that changed
            _ => Decoded::Heartbeat,
        }
    }

    fn normalize_symbol(&self, native: &str) -> CanonicalSymbol {
        if let Ok(conid) = native.parse::<u64>() {
            if let Some(symbol) = self.by_conid.get(&conid) {
                return symbol.clone();
            }
        }
        self.symbols.to_canonical(native, ProviderKind::InteractiveBrokers)
    }

    fn keepalive(&self) -> OutboundFrame {
        OutboundFrame::Text("tic".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{expect_quote, mapper, stamp};

    fn adapter() -> InteractiveBrokersAdapter {
        InteractiveBrokersAdapter::new(ProviderId::new("ib"), mapper())
    }

    #[test]
    fn test_subscription_uses_conids() {
        let frames = adapter().build_subscription(&["EUR.USD".to_string(), "DOGEUSD".to_string()]);
        assert_eq!(frames, vec![OutboundFrame::Text(r#"smd+12087792+{"fields":["84","86"]}"#.to_string())]);
    }

    #[test]
    fn test_decode_market_data() {
        let raw = r#"{"topic":"smd+12087792","conid":12087792,"84":"1.08512","86":"1.08519","_updated":1700000000000}"#;
        let quote = expect_quote(adapter().decode(raw, stamp()));
        assert_eq!(quote.symbol().as_str(), "EURUSD");
        assert_eq!(quote.bid(), 1.08512);
        assert_eq!(quote.provider().as_str(), "ib");
    }

    #[test]
    fn test_decode_status_prefixed_prices_and_partials() {
        let a = adapter();
        let prefixed = r#"{"topic":"smd+12087881","84":"C149.50","86":"C149.52"}"#;
        assert_eq!(expect_quote(a.decode(prefixed, stamp())).symbol().as_str(), "USDJPY");

        let partial = r#"{"topic":"smd+12087792","conid":12087792,"84":"1.0851"}"#;
        assert_eq!(a.decode(partial, stamp()), Decoded::Heartbeat);

        let crossed = r#"{"topic":"smd+12087792","84":"1.09","86":"1.08"}"#;
        assert!(matches!(a.decode(crossed, stamp()), Decoded::Invalid(_)));

        let unknown = r#"{"topic":"smd+1","84":"1.0","86":"1.1"}"#;
        assert!(matches!(a.decode(unknown, stamp()), Decoded::Invalid(_)));
    }

    #[test]
    fn test_decode_system_heartbeat() {
        let a = adapter();
        assert_eq!(a.decode(r#"{"topic":"system","hb":1700000000000}"#, stamp()), Decoded::Heartbeat);
        assert_eq!(a.decode(r#"{"topic":"sts","args":{"authenticated":true}}"#, stamp()), Decoded::Unrecognized);
    }
}
