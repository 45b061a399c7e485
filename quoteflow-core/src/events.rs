//! Engine event bus and the opportunity consumer seam.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::arbitrage::Opportunity;
use crate::providers::{ProviderId, Quote};
use crate::supervisor::ConnectionState;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    QuoteUpdate(Quote),
    Opportunity(Opportunity),
    StateChanged {
        provider: ProviderId,
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Terminal: the provider exhausted its retries.
    ProviderFailed {
        provider: ProviderId,
        attempts: u32,
        last_error: String,
    },
}

/// Fan-out of engine events. Publishing never blocks; slow subscribers lag
/// and see `RecvError::Lagged`.
///
/// Opportunities also travel on a channel of their own, so consumers are
/// not overrun by the quote traffic on the main event stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    opportunities: broadcast::Sender<Opportunity>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (opportunities, _) = broadcast::channel(capacity.max(1));
        Self { sender, opportunities }
    }

    pub fn publish(&self, event: EngineEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn publish_opportunity(&self, opportunity: Opportunity) {
        let _ = self.opportunities.send(opportunity.clone());
        self.publish(EngineEvent::Opportunity(opportunity));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Opportunities only.
    pub fn subscribe_opportunities(&self) -> broadcast::Receiver<Opportunity> {
        self.opportunities.subscribe()
    }
}

/// Downstream collaborator that acts on opportunities (execution, alerting,
/// persistence). The engine only reports; what happens next is up to the consumer.
#[async_trait]
pub trait OpportunityConsumer: Send + Sync {
    fn name(&self) -> &str;

    async fn on_opportunity(&self, opportunity: &Opportunity) -> anyhow::Result<()>;
}

/// Hands every published opportunity to each consumer in registration order.
pub(crate) async fn dispatch_opportunities(
    consumers: Vec<Arc<dyn OpportunityConsumer>>,
    mut opportunities: broadcast::Receiver<Opportunity>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = opportunities.recv() => received,
        };

        match received {
            Ok(opportunity) => {
                for consumer in &consumers {
                    if let Err(e) = consumer.on_opportunity(&opportunity).await {
                        warn!("Opportunity consumer {} failed on {}: {}", consumer.name(), opportunity.id, e);
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Opportunity dispatch lagged, {} opportunities skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Opportunity dispatch stopped");
}
