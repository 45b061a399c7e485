//! Engine configuration.
//!
//! All durations are carried as milliseconds on the wire (`*_ms` keys) and as
//! [`Duration`] in memory. Every struct has a `Default` so a config file only
//! needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::providers::{AuthMethod, ProviderConfig};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("No providers configured")]
    NoProviders,

    #[error("Duplicate provider id: {id}")]
    DuplicateProvider { id: String },

    #[error("Provider {id}: {reason}")]
    InvalidProvider { id: String, reason: String },

    #[error("Invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Serde adapter for `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "staleness_window_ms", with = "duration_ms")]
    pub staleness_window: Duration,
    #[serde(rename = "sweep_interval_ms", with = "duration_ms")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness_window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    /// Minimum `best_bid - best_ask` worth reporting, in price units.
    pub min_spread: f64,
    /// Per-symbol overrides of `min_spread`, keyed by canonical symbol.
    pub symbol_thresholds: HashMap<String, f64>,
    /// Per-symbol overrides of the pip size used for reporting.
    pub pip_sizes: HashMap<String, f64>,
    #[serde(rename = "dedup_window_ms", with = "duration_ms")]
    pub dedup_window: Duration,
    /// Relative spread change that lets a duplicate through the dedup window.
    pub material_change: f64,
    pub history_capacity: usize,
    #[serde(rename = "history_max_age_ms", with = "duration_ms")]
    pub history_max_age: Duration,
    /// Capacity of the quote-update nudge channel feeding the scanner.
    pub trigger_buffer: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            min_spread: 0.0003,
            symbol_thresholds: HashMap::new(),
            pip_sizes: HashMap::new(),
            dedup_window: Duration::from_secs(5),
            material_change: 0.10,
            history_capacity: 1000,
            history_max_age: Duration::from_secs(3600),
            trigger_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub providers: Vec<ProviderConfig>,
    pub cache: CacheConfig,
    pub scanner: ScannerConfig,
    /// Capacity of the broadcast event bus.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            cache: CacheConfig::default(),
            scanner: ScannerConfig::default(),
            event_buffer: 4096,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.clone()) {
                return Err(ConfigError::DuplicateProvider {
                    id: provider.id.to_string(),
                });
            }
            validate_provider(provider)?;
        }

        positive_duration("cache.staleness_window_ms", self.cache.staleness_window)?;
        positive_duration("cache.sweep_interval_ms", self.cache.sweep_interval)?;
        positive_duration("scanner.interval_ms", self.scanner.interval)?;

        if !self.scanner.min_spread.is_finite() || self.scanner.min_spread < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "scanner.min_spread",
                reason: format!("must be a non-negative number, got {}", self.scanner.min_spread),
            });
        }
        for (symbol, threshold) in &self.scanner.symbol_thresholds {
            if !threshold.is_finite() || *threshold < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "scanner.symbol_thresholds",
                    reason: format!("{symbol}: must be a non-negative number"),
                });
            }
        }
        for (symbol, pip) in &self.scanner.pip_sizes {
            if !pip.is_finite() || *pip <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "scanner.pip_sizes",
                    reason: format!("{symbol}: must be positive"),
                });
            }
        }
        if self.scanner.trigger_buffer == 0 || self.event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffers",
                reason: "channel capacities must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_provider(provider: &ProviderConfig) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidProvider {
        id: provider.id.to_string(),
        reason,
    };

    if provider.id.as_str().trim().is_empty() {
        return Err(invalid("id must not be empty".to_string()));
    }
    url::Url::parse(&provider.url).map_err(|e| invalid(format!("bad url {}: {e}", provider.url)))?;

    match provider.auth {
        AuthMethod::None => {}
        AuthMethod::Token if provider.credentials.token.is_none() => {
            return Err(invalid("token auth requires credentials.token".to_string()));
        }
        AuthMethod::BasicCredentials
            if provider.credentials.username.is_none() || provider.credentials.password.is_none() =>
        {
            return Err(invalid("basic-credentials auth requires username and password".to_string()));
        }
        _ => {}
    }

    let policy = &provider.reconnect;
    if policy.max_attempts == 0 {
        return Err(invalid("reconnect.max_attempts must be at least 1".to_string()));
    }
    if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
        return Err(invalid("reconnect.multiplier must be >= 1.0".to_string()));
    }
    if policy.initial_delay > policy.max_delay {
        return Err(invalid("reconnect.initial_delay_ms exceeds max_delay_ms".to_string()));
    }
    if provider.heartbeat_interval.is_zero() {
        return Err(invalid("heartbeat_interval_ms must be positive".to_string()));
    }

    Ok(())
}

fn positive_duration(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}
