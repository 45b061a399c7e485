//! Metrics collection for feeds and the scanner
//!
//! Counters are updated from the supervisor and scanner tasks and read as a
//! serializable snapshot through the engine.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::arbitrage::Opportunity;
use crate::providers::{ErrorKind, ProviderError, ProviderId};
use crate::supervisor::ConnectionState;

/// Per-provider feed statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedStatistics {
    pub state: ConnectionState,
    pub frames_received: u64,
    pub quotes_accepted: u64,
    pub quotes_rejected: u64,
    pub unrecognized_frames: u64,
    pub connection_failures: u64,
    pub auth_failures: u64,
    /// Consecutive failures in the current streak.
    pub reconnect_attempts: u32,
    pub last_frame: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerStatistics {
    pub scans: u64,
    pub opportunities: u64,
    pub suppressed_duplicates: u64,
    pub best_pips: f64,
    pub last_opportunity: Option<DateTime<Utc>>,
}

/// Point-in-time view of everything the collector tracks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub providers: BTreeMap<ProviderId, FeedStatistics>,
    pub scanner: ScannerStatistics,
    pub cached_quotes: usize,
}

pub struct MetricsCollector {
    feeds: DashMap<ProviderId, FeedStatistics>,
    scanner: Arc<RwLock<ScannerStatistics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            feeds: DashMap::new(),
            scanner: Arc::new(RwLock::new(ScannerStatistics::default())),
        }
    }

    pub fn register_provider(&self, provider: &ProviderId) {
        self.feeds.entry(provider.clone()).or_default();
    }

    pub fn record_frame(&self, provider: &ProviderId, at: DateTime<Utc>) {
        let mut feed = self.feeds.entry(provider.clone()).or_default();
        feed.frames_received += 1;
        feed.last_frame = Some(at);
    }

    pub fn record_quote(&self, provider: &ProviderId) {
        self.feeds.entry(provider.clone()).or_default().quotes_accepted += 1;
    }

    pub fn record_rejected(&self, provider: &ProviderId) {
        self.feeds.entry(provider.clone()).or_default().quotes_rejected += 1;
    }

    pub fn record_unrecognized(&self, provider: &ProviderId) {
        self.feeds.entry(provider.clone()).or_default().unrecognized_frames += 1;
    }

    pub fn record_failure(&self, provider: &ProviderId, error: &ProviderError, attempts: u32) {
        let mut feed = self.feeds.entry(provider.clone()).or_default();
        feed.connection_failures += 1;
        if error.kind() == ErrorKind::Authentication {
            feed.auth_failures += 1;
        }
        feed.reconnect_attempts = attempts;
        feed.last_error = Some(error.to_string());
    }

    pub fn record_state(&self, provider: &ProviderId, state: ConnectionState) {
        self.feeds.entry(provider.clone()).or_default().state = state;
    }

    pub fn reset_attempts(&self, provider: &ProviderId) {
        self.feeds.entry(provider.clone()).or_default().reconnect_attempts = 0;
    }

    pub fn record_scan(&self) {
        self.scanner.write().scans += 1;
    }

    pub fn record_opportunity(&self, opportunity: &Opportunity) {
        let mut scanner = self.scanner.write();
        scanner.opportunities += 1;
        scanner.best_pips = scanner.best_pips.max(opportunity.pips);
        scanner.last_opportunity = Some(opportunity.timestamp);
    }

    pub fn record_suppressed(&self) {
        self.scanner.write().suppressed_duplicates += 1;
    }

    pub fn feed(&self, provider: &ProviderId) -> Option<FeedStatistics> {
        self.feeds.get(provider).map(|f| f.clone())
    }

    pub fn snapshot(&self, cached_quotes: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            providers: self.feeds.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
            scanner: self.scanner.read().clone(),
            cached_quotes,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
