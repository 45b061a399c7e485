//! Quoteflow core library
//!
//! Connects to several FX quote providers, normalizes their feeds into a
//! common [`Quote`], keeps the latest quote per (symbol, provider) and scans
//! for cross-provider price discrepancies. Construct an [`Engine`] from an
//! [`EngineConfig`], start it, and read results through its query methods or
//! the event stream.

pub mod arbitrage;
pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod market_data;
pub mod metrics;
pub mod providers;
pub mod supervisor;

// Re-export main types for easy access
pub use arbitrage::{ArbitrageScanner, Opportunity, OpportunityHistory};
pub use clock::{Clock, ManualClock, SharedClock, Stamp, TokioClock};
pub use config::{CacheConfig, ConfigError, EngineConfig, ScannerConfig};
pub use engine::{Engine, ProviderStatus};
pub use events::{EngineEvent, EventBus, OpportunityConsumer};
pub use market_data::{CacheEntry, CanonicalSymbol, QuoteCache, SymbolMapper};
pub use metrics::{FeedStatistics, MetricsCollector, MetricsSnapshot};
pub use providers::{
    AuthMethod, Credentials, ProviderAdapter, ProviderConfig, ProviderError, ProviderId, ProviderKind, Quote,
    ReconnectPolicy,
};
pub use supervisor::ConnectionState;
