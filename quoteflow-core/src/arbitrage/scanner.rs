//! Cross-provider arbitrage scanner.
//!
//! For every symbol quoted by at least two providers the scanner takes the
//! highest bid and the lowest ask among the fresh cache entries. When the
//! best bid sits above the best ask by at least the symbol's threshold, buying
//! at the ask and selling at the bid locks in the difference, and an
//! [`Opportunity`] is published.
//!
//! Scans run on a fixed tick and whenever a supervisor nudges the scanner
//! with a freshly written symbol.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::ScannerConfig;
use crate::events::EventBus;
use crate::market_data::{CacheEntry, CanonicalSymbol, QuoteCache};
use crate::metrics::MetricsCollector;
use crate::providers::ProviderId;

use super::opportunity::{Opportunity, OpportunityHistory};

type PairKey = (CanonicalSymbol, ProviderId, ProviderId);

#[derive(Debug, Clone, Copy)]
struct Emission {
    spread: f64,
    at: Instant,
}

pub struct ArbitrageScanner {
    cache: Arc<QuoteCache>,
    config: ScannerConfig,
    clock: SharedClock,
    bus: EventBus,
    history: Arc<OpportunityHistory>,
    metrics: Arc<MetricsCollector>,
    last_emitted: Mutex<HashMap<PairKey, Emission>>,
}

/// Higher bid wins; ties go to the fresher quote, then the smaller provider id.
fn bid_rank(a: &CacheEntry, b: &CacheEntry) -> Ordering {
    a.quote
        .bid()
        .total_cmp(&b.quote.bid())
        .then_with(|| a.quote.received_at().cmp(&b.quote.received_at()))
        .then_with(|| b.quote.provider().cmp(a.quote.provider()))
}

/// Lower ask wins; same tie-breaks as [`bid_rank`].
fn ask_rank(a: &CacheEntry, b: &CacheEntry) -> Ordering {
    b.quote
        .ask()
        .total_cmp(&a.quote.ask())
        .then_with(|| a.quote.received_at().cmp(&b.quote.received_at()))
        .then_with(|| b.quote.provider().cmp(a.quote.provider()))
}

impl ArbitrageScanner {
    pub fn new(
        cache: Arc<QuoteCache>,
        config: ScannerConfig,
        clock: SharedClock,
        bus: EventBus,
        history: Arc<OpportunityHistory>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            cache,
            config,
            clock,
            bus,
            history,
            metrics,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold_for(&self, symbol: &CanonicalSymbol) -> f64 {
        self.config
            .symbol_thresholds
            .get(symbol.as_str())
            .copied()
            .unwrap_or(self.config.min_spread)
    }

    pub fn pip_size_for(&self, symbol: &CanonicalSymbol) -> f64 {
        self.config
            .pip_sizes
            .get(symbol.as_str())
            .copied()
            .unwrap_or_else(|| symbol.pip_size())
    }

    /// Best crossing for a symbol, if any clears the threshold. No side effects.
    pub fn evaluate(&self, symbol: &CanonicalSymbol) -> Option<Opportunity> {
        let entries = self.cache.all_for_symbol(symbol);
        if entries.len() < 2 {
            return None;
        }

        let best_bid = entries.iter().max_by(|a, b| bid_rank(a, b))?;
        let best_ask = entries.iter().max_by(|a, b| ask_rank(a, b))?;
        if best_bid.quote.provider() == best_ask.quote.provider() {
            // A single quote is never crossed with itself
            return None;
        }

        let spread = best_bid.quote.bid() - best_ask.quote.ask();
        if spread <= 0.0 || spread < self.threshold_for(symbol) {
            return None;
        }

        Some(Opportunity::new(
            symbol.clone(),
            (best_ask.quote.provider().clone(), best_ask.quote.ask()),
            (best_bid.quote.provider().clone(), best_bid.quote.bid()),
            self.pip_size_for(symbol),
            self.clock.stamp(),
        ))
    }

    /// Evaluate one symbol and publish the result unless it duplicates a
    /// recent emission for the same provider pair.
    pub fn scan_symbol(&self, symbol: &CanonicalSymbol) -> Option<Opportunity> {
        let opportunity = self.evaluate(symbol)?;
        if !self.should_emit(&opportunity) {
            self.metrics.record_suppressed();
            debug!(
                "Suppressed duplicate {} {}->{} spread {:.5}",
                opportunity.symbol, opportunity.buy_provider, opportunity.sell_provider, opportunity.spread
            );
            return None;
        }

        info!(
            "💰 Arbitrage {}: buy {} @ {} sell {} @ {} spread {:.5} ({:.1} pips)",
            opportunity.symbol,
            opportunity.buy_provider,
            opportunity.buy_price,
            opportunity.sell_provider,
            opportunity.sell_price,
            opportunity.spread,
            opportunity.pips
        );
        self.metrics.record_opportunity(&opportunity);
        self.history.record(opportunity.clone());
        self.bus.publish_opportunity(opportunity.clone());
        Some(opportunity)
    }

    /// One pass over every cached symbol.
    pub fn scan_all(&self) -> Vec<Opportunity> {
        self.metrics.record_scan();
        self.forget_expired();
        self.cache
            .symbols()
            .iter()
            .filter_map(|symbol| self.scan_symbol(symbol))
            .collect()
    }

    fn should_emit(&self, opportunity: &Opportunity) -> bool {
        let key = (
            opportunity.symbol.clone(),
            opportunity.buy_provider.clone(),
            opportunity.sell_provider.clone(),
        );
        let now = opportunity.detected_at;
        let mut last_emitted = self.last_emitted.lock();

        let emit = match last_emitted.get(&key) {
            None => true,
            Some(previous) => {
                let elapsed = now.saturating_duration_since(previous.at);
                let change = (opportunity.spread - previous.spread).abs() / previous.spread;
                elapsed >= self.config.dedup_window || change > self.config.material_change
            }
        };
        if emit {
            last_emitted.insert(
                key,
                Emission {
                    spread: opportunity.spread,
                    at: now,
                },
            );
        }
        emit
    }

    fn forget_expired(&self) {
        let now = self.clock.now();
        let window = self.config.dedup_window;
        self.last_emitted
            .lock()
            .retain(|_, e| now.saturating_duration_since(e.at) < window);
    }

    pub fn history(&self) -> &Arc<OpportunityHistory> {
        &self.history
    }

    /// Scanner task: periodic full scans plus per-symbol scans on nudges.
    pub async fn run(self: Arc<Self>, mut nudges: mpsc::Receiver<CanonicalSymbol>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("🔎 Arbitrage scanner running every {:?}", self.config.interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.scan_all();
                }
                Some(symbol) = nudges.recv() => {
                    self.scan_symbol(&symbol);
                }
            }
        }
        debug!("Arbitrage scanner stopped");
    }
}
