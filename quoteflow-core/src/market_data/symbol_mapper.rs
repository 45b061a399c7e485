//! Symbol mapping between provider notations and the canonical form

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::providers::ProviderKind;

/// Canonical instrument name: uppercase, no separators, no venue prefix (`EURUSD`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalSymbol(String);

impl CanonicalSymbol {
    /// Wrap an already-canonical name. Use [`CanonicalSymbol::normalize`] for raw input.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// `"EUR/USD"`, `"EURUSD"`, `"FX:EURUSD"`, `"EUR_USD"` and `"eur-usd"` all map to `EURUSD`.
    pub fn normalize(raw: &str) -> Self {
        let without_venue = raw.rsplit(':').next().unwrap_or(raw);
        let symbol: String = without_venue
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self(symbol)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Minimum price increment used to express spreads in pips.
    pub fn pip_size(&self) -> f64 {
        let s = self.0.as_str();
        if s.ends_with("JPY") || s.starts_with("XAU") || s.starts_with("XAG") {
            0.01
        } else {
            0.0001
        }
    }
}

impl fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CanonicalSymbol {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

/// Translates venue symbols to canonical ones.
///
/// Aliases cover names that cannot be derived from the notation itself
/// (`GOLD` on MT5 bridges). Everything else is inferred per call and never
/// stored, so arbitrary symbols arriving on the wire cannot grow the table.
pub struct SymbolMapper {
    aliases: HashMap<(String, ProviderKind), CanonicalSymbol>,
}

impl SymbolMapper {
    pub fn new() -> Self {
        let mut mapper = Self { aliases: HashMap::new() };
        // Metals quoted under commodity names
        for kind in [ProviderKind::Exness, ProviderKind::MetaTrader5] {
            mapper.add_alias(kind, "GOLD", CanonicalSymbol::new("XAUUSD"));
            mapper.add_alias(kind, "SILVER", CanonicalSymbol::new("XAGUSD"));
        }
        mapper.add_alias(ProviderKind::TradingView, "TVC:GOLD", CanonicalSymbol::new("XAUUSD"));
        mapper.add_alias(ProviderKind::TradingView, "TVC:SILVER", CanonicalSymbol::new("XAGUSD"));
        mapper
    }

    fn add_alias(&mut self, kind: ProviderKind, native: &str, canonical: CanonicalSymbol) {
        self.aliases.insert((native.to_string(), kind), canonical);
    }

    /// Canonical form of a provider's native symbol.
    pub fn to_canonical(&self, native: &str, kind: ProviderKind) -> CanonicalSymbol {
        match self.aliases.get(&(native.to_string(), kind)) {
            Some(alias) => alias.clone(),
            None => Self::infer_canonical(native, kind),
        }
    }

    fn infer_canonical(native: &str, kind: ProviderKind) -> CanonicalSymbol {
        match kind {
            ProviderKind::Exness => {
                // Account-type suffixes: EURUSDm, EURUSDc
                let trimmed = native
                    .strip_suffix('m')
                    .or_else(|| native.strip_suffix('c'))
                    .filter(|base| base.len() >= 6 && base.chars().all(|c| c.is_ascii_uppercase()))
                    .unwrap_or(native);
                CanonicalSymbol::normalize(trimmed)
            }
            _ => CanonicalSymbol::normalize(native),
        }
    }

    #[cfg(test)]
    fn alias_count(&self) -> usize {
        self.aliases.len()
    }
}

impl Default for SymbolMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_notations() {
        for raw in ["EUR/USD", "EURUSD", "FX:EURUSD", "EUR_USD", "eur-usd", "OANDA:EUR_USD"] {
            assert_eq!(CanonicalSymbol::normalize(raw).as_str(), "EURUSD", "{raw}");
        }
    }

    #[test]
    fn test_pip_sizes() {
        assert_eq!(CanonicalSymbol::new("EURUSD").pip_size(), 0.0001);
        assert_eq!(CanonicalSymbol::new("USDJPY").pip_size(), 0.01);
        assert_eq!(CanonicalSymbol::new("XAUUSD").pip_size(), 0.01);
    }

    #[test]
    fn test_mapper_resolves_aliases_without_learning() {
        let mapper = SymbolMapper::new();
        let preloaded = mapper.alias_count();
        assert_eq!(mapper.to_canonical("EURUSDm", ProviderKind::Exness).as_str(), "EURUSD");
        assert_eq!(mapper.to_canonical("EURUSDc", ProviderKind::Exness).as_str(), "EURUSD");
        assert_eq!(mapper.to_canonical("GOLD", ProviderKind::MetaTrader5).as_str(), "XAUUSD");
        assert_eq!(mapper.to_canonical("GOLD", ProviderKind::Oanda).as_str(), "GOLD");

        for i in 0..1000 {
            mapper.to_canonical(&format!("JUNK{i}"), ProviderKind::Fxcm);
        }
        assert_eq!(mapper.alias_count(), preloaded);
    }

    #[test]
    fn test_venue_prefix_is_not_a_suffix_strip() {
        let mapper = SymbolMapper::new();
        // "USDJPYc" style only applies to Exness
        assert_eq!(mapper.to_canonical("EURUSDm", ProviderKind::Fxcm).as_str(), "EURUSDM");
        assert_eq!(mapper.to_canonical("TVC:GOLD", ProviderKind::TradingView).as_str(), "XAUUSD");
    }
}
