//! Latest quote per (symbol, provider).
//!
//! Writes come from every supervisor task, reads from the scanner and the
//! query API. The outer map is a lock-striped `DashMap` keyed by symbol; each
//! shard guards the small per-provider map of that symbol, so a reader of one
//! symbol always sees whole entries.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::clock::SharedClock;
use crate::providers::{ProviderId, Quote};

use super::CanonicalSymbol;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub quote: Quote,
    pub inserted_at: Instant,
}

impl CacheEntry {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }

    pub fn is_stale(&self, now: Instant, window: Duration) -> bool {
        self.age(now) > window
    }
}

pub struct QuoteCache {
    entries: DashMap<CanonicalSymbol, HashMap<ProviderId, CacheEntry>>,
    staleness_window: Duration,
    clock: SharedClock,
    writes: AtomicU64,
}

impl QuoteCache {
    pub fn new(staleness_window: Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            staleness_window,
            clock,
            writes: AtomicU64::new(0),
        }
    }

    /// Insert or overwrite the entry for the quote's (symbol, provider).
    pub fn put(&self, quote: Quote) {
        let inserted_at = self.clock.now();
        self.entries
            .entry(quote.symbol().clone())
            .or_default()
            .insert(quote.provider().clone(), CacheEntry { quote, inserted_at });
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Raw lookup; the entry is returned even when stale.
    pub fn get(&self, symbol: &CanonicalSymbol, provider: &ProviderId) -> Option<CacheEntry> {
        self.entries.get(symbol)?.get(provider).cloned()
    }

    /// Non-stale entries for one symbol.
    pub fn all_for_symbol(&self, symbol: &CanonicalSymbol) -> Vec<CacheEntry> {
        let now = self.clock.now();
        match self.entries.get(symbol) {
            Some(providers) => providers
                .values()
                .filter(|e| !e.is_stale(now, self.staleness_window))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Non-stale quotes, optionally for one symbol, ordered by symbol then provider.
    pub fn current_quotes(&self, symbol: Option<&CanonicalSymbol>) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = match symbol {
            Some(symbol) => self.all_for_symbol(symbol).into_iter().map(|e| e.quote).collect(),
            None => {
                let now = self.clock.now();
                self.entries
                    .iter()
                    .flat_map(|providers| {
                        providers
                            .values()
                            .filter(|e| !e.is_stale(now, self.staleness_window))
                            .map(|e| e.quote.clone())
                            .collect::<Vec<_>>()
                    })
                    .collect()
            }
        };
        quotes.sort_by(|a, b| a.symbol().cmp(b.symbol()).then_with(|| a.provider().cmp(b.provider())));
        quotes
    }

    pub fn symbols(&self) -> Vec<CanonicalSymbol> {
        let mut symbols: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    /// Drop stale entries and symbols left without providers. Returns how many entries went.
    pub fn evict_stale(&self) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;
        self.entries.retain(|_, providers| {
            let before = providers.len();
            providers.retain(|_, e| !e.is_stale(now, self.staleness_window));
            evicted += before - providers.len();
            !providers.is_empty()
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}
