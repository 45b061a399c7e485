//! Time sources for ingestion stamps, staleness checks and heartbeat tracking.
//!
//! Everything in the engine that compares ages asks a [`Clock`] instead of
//! calling `Instant::now()` directly, so tests can drive time by hand.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ingestion stamp: a monotonic instant for ordering plus wall time for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub instant: Instant,
    pub wall: DateTime<Utc>,
}

pub trait Clock: Send + Sync {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Wall-clock now, only used for reporting.
    fn wall(&self) -> DateTime<Utc>;

    fn stamp(&self) -> Stamp {
        Stamp {
            instant: self.now(),
            wall: self.wall(),
        }
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Production clock. Reads tokio's time driver so a paused test runtime
/// controls it; outside a runtime it falls back to the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl TokioClock {
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock. Starts at construction time and only moves on `advance`.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + offset
    }
}
