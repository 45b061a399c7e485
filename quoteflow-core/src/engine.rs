//! Quote aggregation engine
//!
//! Owns every component: one supervisor per configured provider, the shared
//! quote cache, the arbitrage scanner and the event bus. Nothing is global;
//! two engines in one process do not share state.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::arbitrage::{ArbitrageScanner, Opportunity, OpportunityHistory};
use crate::clock::{SharedClock, TokioClock};
use crate::config::EngineConfig;
use crate::events::{dispatch_opportunities, EngineEvent, EventBus, OpportunityConsumer};
use crate::market_data::{CanonicalSymbol, QuoteCache, SymbolMapper};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::providers::{adapter_for, Connector, ProviderAdapter, ProviderConfig, ProviderId, ProviderKind, Quote, WsConnector};
use crate::supervisor::{ConnectionState, ConnectionSupervisor, SupervisorContext};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

struct ProviderSlot {
    config: Arc<ProviderConfig>,
    adapter: Arc<dyn ProviderAdapter>,
    state: Arc<RwLock<ConnectionState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Connection status of one provider, with its current failure streak.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub id: ProviderId,
    pub name: String,
    pub kind: ProviderKind,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

pub struct Engine {
    config: EngineConfig,
    clock: SharedClock,
    connector: Arc<dyn Connector>,
    cache: Arc<QuoteCache>,
    bus: EventBus,
    metrics: Arc<MetricsCollector>,
    history: Arc<OpportunityHistory>,
    scanner: Arc<ArbitrageScanner>,
    providers: Vec<ProviderSlot>,
    consumers: Mutex<Vec<Arc<dyn OpportunityConsumer>>>,
    nudge_tx: mpsc::Sender<CanonicalSymbol>,
    nudge_rx: Mutex<Option<mpsc::Receiver<CanonicalSymbol>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl Engine {
    /// Engine with WebSocket transport and the runtime clock.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        Self::new(config, Arc::new(WsConnector), TokioClock::shared())
    }

    pub fn new(config: EngineConfig, connector: Arc<dyn Connector>, clock: SharedClock) -> Result<Self> {
        config.validate()?;

        let symbols = Arc::new(SymbolMapper::new());
        let cache = Arc::new(QuoteCache::new(config.cache.staleness_window, clock.clone()));
        let bus = EventBus::new(config.event_buffer);
        let metrics = Arc::new(MetricsCollector::new());
        let history = Arc::new(OpportunityHistory::new(
            config.scanner.history_capacity,
            config.scanner.history_max_age,
            clock.clone(),
        ));
        let scanner = Arc::new(ArbitrageScanner::new(
            cache.clone(),
            config.scanner.clone(),
            clock.clone(),
            bus.clone(),
            history.clone(),
            metrics.clone(),
        ));

        let providers = config
            .providers
            .iter()
            .map(|provider| {
                metrics.register_provider(&provider.id);
                ProviderSlot {
                    adapter: adapter_for(provider, symbols.clone()),
                    config: Arc::new(provider.clone()),
                    state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
                    task: Mutex::new(None),
                }
            })
            .collect();

        let (nudge_tx, nudge_rx) = mpsc::channel(config.scanner.trigger_buffer);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            clock,
            connector,
            cache,
            bus,
            metrics,
            history,
            scanner,
            providers,
            consumers: Mutex::new(Vec::new()),
            nudge_tx,
            nudge_rx: Mutex::new(Some(nudge_rx)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Add an opportunity consumer. Only allowed before `start`.
    pub fn register_consumer(&self, consumer: Arc<dyn OpportunityConsumer>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            bail!("consumers must be registered before the engine starts");
        }
        info!("Registered opportunity consumer {}", consumer.name());
        self.consumers.lock().push(consumer);
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            bail!("engine has been shut down");
        }
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("engine already running");
        }

        info!("🚀 Starting quote engine with {} providers", self.providers.len());

        self.spawn_dispatcher();
        self.spawn_scanner()?;
        self.spawn_sweeper();
        for slot in &self.providers {
            self.spawn_supervisor(slot);
        }

        Ok(())
    }

    fn supervisor_context(&self) -> SupervisorContext {
        SupervisorContext {
            connector: self.connector.clone(),
            cache: self.cache.clone(),
            bus: self.bus.clone(),
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
            nudges: self.nudge_tx.clone(),
        }
    }

    fn spawn_supervisor(&self, slot: &ProviderSlot) {
        let supervisor = ConnectionSupervisor::new(
            slot.config.clone(),
            slot.adapter.clone(),
            slot.state.clone(),
            self.supervisor_context(),
        );
        let handle = tokio::spawn(supervisor.run(self.shutdown_tx.subscribe()));
        *slot.task.lock() = Some(handle);
    }

    fn spawn_scanner(&self) -> Result<()> {
        let nudges = self
            .nudge_rx
            .lock()
            .take()
            .ok_or_else(|| anyhow!("scanner already started"))?;
        let handle = tokio::spawn(self.scanner.clone().run(nudges, self.shutdown_tx.subscribe()));
        self.tasks.lock().push(handle);
        Ok(())
    }

    fn spawn_sweeper(&self) {
        let cache = self.cache.clone();
        let history = self.history.clone();
        let every = self.config.cache.sweep_interval;
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let evicted = cache.evict_stale();
                        if evicted > 0 {
                            tracing::debug!("Evicted {} stale quotes", evicted);
                        }
                        history.prune();
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    fn spawn_dispatcher(&self) {
        let consumers = self.consumers.lock().clone();
        if consumers.is_empty() {
            return;
        }
        let handle = tokio::spawn(dispatch_opportunities(
            consumers,
            self.bus.subscribe_opportunities(),
            self.shutdown_tx.subscribe(),
        ));
        self.tasks.lock().push(handle);
    }

    /// Restart a provider that exhausted its retries. Other states are refused.
    pub fn restart_provider(&self, id: &ProviderId) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            bail!("engine is not running");
        }
        let slot = self
            .providers
            .iter()
            .find(|slot| &slot.config.id == id)
            .ok_or_else(|| anyhow!("unknown provider {}", id))?;

        let state = *slot.state.read();
        if !state.is_failed() {
            bail!("provider {} is {}, only failed providers can be restarted", id, state);
        }

        info!(provider = %id, "Manual restart requested");
        self.metrics.reset_attempts(id);
        *slot.state.write() = ConnectionState::Disconnected;
        self.spawn_supervisor(slot);
        Ok(())
    }

    /// Signal every task to stop, wait up to one second, abort stragglers.
    /// Afterwards every provider reports `Disconnected` and the cache is no
    /// longer written.
    pub async fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("🛑 Shutting down quote engine");
        let _ = self.shutdown_tx.send(true);

        let mut handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        handles.extend(self.providers.iter().filter_map(|slot| slot.task.lock().take()));
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        if tokio::time::timeout(SHUTDOWN_GRACE, futures_util::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("Tasks still running after {:?}, aborting", SHUTDOWN_GRACE);
            for abort in &aborts {
                abort.abort();
            }
        }

        for slot in &self.providers {
            *slot.state.write() = ConnectionState::Disconnected;
            self.metrics.record_state(&slot.config.id, ConnectionState::Disconnected);
        }
        self.running.store(false, Ordering::SeqCst);
        info!("✅ Quote engine stopped");
        Ok(())
    }

    /// Fresh quotes, optionally for one symbol in any notation.
    pub fn list_current_quotes(&self, symbol: Option<&str>) -> Vec<Quote> {
        let symbol = symbol.map(CanonicalSymbol::normalize);
        self.cache.current_quotes(symbol.as_ref())
    }

    /// Retained opportunities detected at or after `since`, oldest first.
    pub fn list_opportunities(&self, since: Option<DateTime<Utc>>) -> Vec<Opportunity> {
        self.history.since(since)
    }

    pub fn connection_status(&self) -> BTreeMap<ProviderId, ConnectionState> {
        self.providers
            .iter()
            .map(|slot| (slot.config.id.clone(), *slot.state.read()))
            .collect()
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.providers
            .iter()
            .map(|slot| {
                let feed = self.metrics.feed(&slot.config.id).unwrap_or_default();
                ProviderStatus {
                    id: slot.config.id.clone(),
                    name: slot.config.name.clone(),
                    kind: slot.config.kind,
                    state: *slot.state.read(),
                    reconnect_attempts: feed.reconnect_attempts,
                    last_error: feed.last_error,
                }
            })
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.cache.len())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::transport::mock::ScriptedConnector;
    use crate::providers::ReconnectPolicy;
    use async_trait::async_trait;

    struct Collector {
        seen: Mutex<Vec<Opportunity>>,
    }

    #[async_trait]
    impl OpportunityConsumer for Collector {
        fn name(&self) -> &str {
            "collector"
        }

        async fn on_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
            self.seen.lock().push(opportunity.clone());
            Ok(())
        }
    }

    fn provider(id: &str, max_attempts: u32) -> ProviderConfig {
        let mut config = ProviderConfig::new(ProviderId::new(id), ProviderKind::Fxcm, "wss://example.test/fxcm")
            .with_symbols(["EUR/USD"]);
        config.reconnect = ReconnectPolicy {
            initial_delay: Duration::from_millis(50),
            max_attempts,
            ..Default::default()
        };
        config
    }

    fn engine_config(providers: Vec<ProviderConfig>) -> EngineConfig {
        let mut config = EngineConfig {
            providers,
            ..Default::default()
        };
        config.scanner.min_spread = 0.0005;
        config
    }

    fn tick(bid: f64, ask: f64) -> String {
        format!(r#"{{"type":"price_update","data":{{"symbol":"EUR/USD","bid":{},"ask":{}}}}}"#, bid, ask)
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let connector = ScriptedConnector::new();
        assert!(Engine::new(EngineConfig::default(), connector, TokioClock::shared()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_arbitrage_and_shutdown() {
        let connector = ScriptedConnector::new();
        let venue_a = connector.accept();
        let venue_b = connector.accept();
        let engine = Engine::new(
            engine_config(vec![provider("A", 5), provider("B", 5)]),
            connector.clone(),
            TokioClock::shared(),
        )
        .unwrap();
        let collector = Arc::new(Collector { seen: Mutex::new(Vec::new()) });
        engine.register_consumer(collector.clone()).unwrap();

        assert!(engine.connection_status().values().all(|s| *s == ConnectionState::Disconnected));
        engine.start().await.unwrap();
        assert!(engine.start().await.is_err());
        wait_until(|| engine.connection_status().values().all(|s| s.is_streaming())).await;

        // Which scripted peer serves which provider depends on task order
        venue_a.push_text(&tick(1.1000, 1.1002));
        venue_b.push_text(&tick(1.1010, 1.1012));
        wait_until(|| !collector.seen.lock().is_empty()).await;

        let quotes = engine.list_current_quotes(Some("EUR/USD"));
        assert_eq!(quotes.len(), 2);
        let opportunities = engine.list_opportunities(None);
        assert_eq!(opportunities.len(), 1);
        let o = &opportunities[0];
        assert_eq!(o.buy_price, 1.1002);
        assert_eq!(o.sell_price, 1.1010);
        assert_ne!(o.buy_provider, o.sell_provider);
        assert!((o.spread - 0.0008).abs() < 1e-9);
        assert_eq!(collector.seen.lock()[0].id, o.id);

        let later = o.timestamp + chrono::Duration::seconds(1);
        assert!(engine.list_opportunities(Some(later)).is_empty());
        assert!(engine.register_consumer(collector.clone()).is_err());

        engine.shutdown().await.unwrap();
        assert!(engine.connection_status().values().all(|s| *s == ConnectionState::Disconnected));
        let writes = engine.cache.write_count();
        venue_a.push_text(&tick(1.1003, 1.1004));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(engine.cache.write_count(), writes);
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_only_failed_providers() {
        let connector = ScriptedConnector::new();
        let engine = Engine::new(engine_config(vec![provider("A", 2)]), connector.clone(), TokioClock::shared()).unwrap();
        let id = ProviderId::new("A");
        assert!(engine.restart_provider(&id).is_err());

        engine.start().await.unwrap();
        wait_until(|| engine.connection_status()[&id].is_failed()).await;
        let status = &engine.provider_status()[0];
        assert_eq!(status.reconnect_attempts, 2);
        assert!(status.last_error.is_some());
        assert_eq!(connector.connect_count(), 2);

        let _peer = connector.accept();
        engine.restart_provider(&id).unwrap();
        wait_until(|| engine.connection_status()[&id].is_streaming()).await;
        assert_eq!(connector.connect_count(), 3);
        assert!(engine.restart_provider(&id).is_err());
        assert!(engine.restart_provider(&ProviderId::new("missing")).is_err());

        let snapshot = engine.metrics();
        assert_eq!(snapshot.providers[&id].connection_failures, 2);

        engine.shutdown().await.unwrap();
    }
}
