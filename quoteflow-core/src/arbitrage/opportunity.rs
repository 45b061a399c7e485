//! Detected opportunities and the bounded recent-history buffer

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::clock::{SharedClock, Stamp};
use crate::market_data::CanonicalSymbol;
use crate::providers::ProviderId;

/// Cross-provider discrepancy: buy at one provider's ask, sell at another's bid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub symbol: CanonicalSymbol,
    pub buy_provider: ProviderId,
    pub sell_provider: ProviderId,
    pub buy_price: f64,
    pub sell_price: f64,
    pub spread: f64,
    pub pips: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub detected_at: Instant,
}

impl Opportunity {
    pub fn new(
        symbol: CanonicalSymbol,
        buy: (ProviderId, f64),
        sell: (ProviderId, f64),
        pip_size: f64,
        stamp: Stamp,
    ) -> Self {
        let spread = sell.1 - buy.1;
        Self {
            id: Uuid::new_v4(),
            symbol,
            buy_provider: buy.0,
            sell_provider: sell.0,
            buy_price: buy.1,
            sell_price: sell.1,
            spread,
            pips: spread / pip_size,
            timestamp: stamp.wall,
            detected_at: stamp.instant,
        }
    }
}

/// Recent opportunities, oldest first. Bounded by count and by age.
pub struct OpportunityHistory {
    entries: RwLock<VecDeque<Opportunity>>,
    capacity: usize,
    max_age: Duration,
    clock: SharedClock,
}

impl OpportunityHistory {
    pub fn new(capacity: usize, max_age: Duration, clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            max_age,
            clock,
        }
    }

    pub fn record(&self, opportunity: Opportunity) {
        let mut entries = self.entries.write();
        entries.push_back(opportunity);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        self.prune_locked(&mut entries);
    }

    /// Retained opportunities with `timestamp >= since`, oldest first.
    pub fn since(&self, since: Option<DateTime<Utc>>) -> Vec<Opportunity> {
        let now = self.clock.now();
        self.entries
            .read()
            .iter()
            .filter(|o| now.saturating_duration_since(o.detected_at) <= self.max_age)
            .filter(|o| since.map_or(true, |t| o.timestamp >= t))
            .cloned()
            .collect()
    }

    pub fn prune(&self) {
        let mut entries = self.entries.write();
        self.prune_locked(&mut entries);
    }

    fn prune_locked(&self, entries: &mut VecDeque<Opportunity>) {
        let now = self.clock.now();
        while let Some(front) = entries.front() {
            if now.saturating_duration_since(front.detected_at) > self.max_age {
                entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::Arc;

    fn opportunity(clock: &ManualClock) -> Opportunity {
        Opportunity::new(
            CanonicalSymbol::new("EURUSD"),
            (ProviderId::new("a"), 1.1002),
            (ProviderId::new("b"), 1.1010),
            0.0001,
            clock.stamp(),
        )
    }

    #[test]
    fn test_opportunity_derives_spread_and_pips() {
        let clock = ManualClock::new();
        let o = opportunity(&clock);
        assert!((o.spread - 0.0008).abs() < 1e-9);
        assert!((o.pips - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_history_bounded_by_capacity_and_age() {
        let clock = Arc::new(ManualClock::new());
        let history = OpportunityHistory::new(3, Duration::from_secs(60), clock.clone());

        for _ in 0..5 {
            history.record(opportunity(&clock));
            clock.advance(Duration::from_secs(10));
        }
        assert_eq!(history.len(), 3);

        let cutoff = history.since(None)[1].timestamp;
        assert_eq!(history.since(Some(cutoff)).len(), 2);

        clock.advance(Duration::from_secs(35));
        // Oldest retained was recorded 65s ago
        assert_eq!(history.since(None).len(), 2);
        history.prune();
        assert_eq!(history.len(), 2);
    }
}
