//! Per-provider connection supervisor.
//!
//! One supervisor task owns one provider connection for its whole life:
//! connect, authenticate, subscribe, stream, and on any failure back off and
//! start over until the retry budget is spent. Frames are handled one at a
//! time on the task, so a provider's quotes reach the cache in arrival order.

pub mod backoff;
pub mod state;

pub use backoff::Backoff;
pub use state::ConnectionState;

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::events::{EngineEvent, EventBus};
use crate::market_data::{CanonicalSymbol, QuoteCache};
use crate::metrics::MetricsCollector;
use crate::providers::{
    AuthMethod, Connector, Decoded, InboundFrame, ProviderAdapter, ProviderConfig, ProviderError, ProviderResult, Quote,
    Transport,
};

/// Handles shared by every supervisor of an engine.
#[derive(Clone)]
pub struct SupervisorContext {
    pub connector: Arc<dyn Connector>,
    pub cache: Arc<QuoteCache>,
    pub bus: EventBus,
    pub clock: SharedClock,
    pub metrics: Arc<MetricsCollector>,
    /// Symbols written to the cache, for the scanner. Dropped when full.
    pub nudges: mpsc::Sender<CanonicalSymbol>,
}

enum SessionEnd {
    Shutdown,
    Failed {
        error: ProviderError,
        streamed_for: Option<Duration>,
    },
}

enum StreamEvent {
    Shutdown,
    Frame(Option<ProviderResult<InboundFrame>>),
    HeartbeatDue,
    Silent,
}

pub struct ConnectionSupervisor {
    config: Arc<ProviderConfig>,
    adapter: Arc<dyn ProviderAdapter>,
    state: Arc<RwLock<ConnectionState>>,
    ctx: SupervisorContext,
}

impl ConnectionSupervisor {
    pub fn new(
        config: Arc<ProviderConfig>,
        adapter: Arc<dyn ProviderAdapter>,
        state: Arc<RwLock<ConnectionState>>,
        ctx: SupervisorContext,
    ) -> Self {
        Self {
            config,
            adapter,
            state,
            ctx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Drive the connection until shutdown or until retries are exhausted.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let id = &self.config.id;
        let mut backoff = Backoff::new(self.config.reconnect.clone());
        info!(provider = %id, "Starting {} feed ({} symbols)", self.config.kind, self.config.symbols.len());

        loop {
            if *shutdown.borrow() {
                break;
            }

            let (error, streamed_for) = match self.session(&mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed { error, streamed_for } => (error, streamed_for),
            };

            if let Some(streamed_for) = streamed_for {
                backoff.on_session_end(streamed_for);
            }
            let delay = backoff.on_failure();
            self.ctx.metrics.record_failure(id, &error, backoff.attempts());

            let Some(delay) = delay else {
                error!(
                    provider = %id,
                    "Giving up after {} consecutive failures, last error: {}",
                    backoff.attempts(),
                    error
                );
                self.transition(ConnectionState::Failed);
                self.ctx.bus.publish(EngineEvent::ProviderFailed {
                    provider: id.clone(),
                    attempts: backoff.attempts(),
                    last_error: error.to_string(),
                });
                return;
            };

            warn!(
                provider = %id,
                "Connection lost ({}), retrying in {:?} (attempt {}/{})",
                error,
                delay,
                backoff.attempts(),
                self.config.reconnect.max_attempts
            );
            self.transition(ConnectionState::Reconnecting);

            let interrupted = tokio::select! {
                _ = shutdown.changed() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if interrupted {
                break;
            }
        }

        self.transition(ConnectionState::Disconnected);
        info!(provider = %id, "Feed stopped");
    }

    async fn session(&self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let failed = |error: ProviderError| SessionEnd::Failed {
            error,
            streamed_for: None,
        };

        self.transition(ConnectionState::Connecting);
        let request = match self.adapter.build_connect_request(&self.config) {
            Ok(request) => request,
            Err(e) => return failed(e),
        };

        let connect_timeout = self.config.connect_timeout;
        let connected = tokio::select! {
            _ = shutdown.changed() => return SessionEnd::Shutdown,
            result = tokio::time::timeout(connect_timeout, self.ctx.connector.connect(&request)) => result,
        };
        let mut transport = match connected {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => return failed(e),
            Err(_) => return failed(ProviderError::timeout("connecting", connect_timeout)),
        };

        let handshake = tokio::select! {
            _ = shutdown.changed() => None,
            result = self.handshake(transport.as_mut()) => Some(result),
        };
        match handshake {
            None => {
                self.close(transport.as_mut()).await;
                return SessionEnd::Shutdown;
            }
            Some(Err(e)) => {
                let _ = transport.close().await;
                return failed(e);
            }
            Some(Ok(())) => {}
        }

        self.transition(ConnectionState::Streaming);
        let started = self.ctx.clock.now();
        let result = self.stream(transport.as_mut(), shutdown).await;
        let streamed_for = self.ctx.clock.now().saturating_duration_since(started);

        match result {
            Ok(()) => {
                self.close(transport.as_mut()).await;
                SessionEnd::Shutdown
            }
            Err(error) => {
                let _ = transport.close().await;
                SessionEnd::Failed {
                    error,
                    streamed_for: Some(streamed_for),
                }
            }
        }
    }

    async fn handshake(&self, transport: &mut dyn Transport) -> ProviderResult<()> {
        if self.config.auth != AuthMethod::None {
            self.transition(ConnectionState::Authenticating);
            for frame in self.adapter.build_auth(&self.config) {
                transport.send(frame).await?;
            }
            let await_ack = self.config.await_auth_ack.unwrap_or_else(|| self.adapter.awaits_auth_ack());
            if await_ack {
                let auth_timeout = self.config.auth_timeout;
                tokio::time::timeout(auth_timeout, self.await_auth_ack(transport))
                    .await
                    .map_err(|_| ProviderError::timeout("authenticating", auth_timeout))??;
            }
        }

        self.transition(ConnectionState::Subscribing);
        for frame in self.adapter.build_subscription(&self.config.symbols) {
            transport.send(frame).await?;
        }
        Ok(())
    }

    async fn await_auth_ack(&self, transport: &mut dyn Transport) -> ProviderResult<()> {
        loop {
            let frame = match transport.recv().await {
                Some(frame) => frame?,
                None => return Err(ProviderError::Closed),
            };
            self.ctx.metrics.record_frame(&self.config.id, self.ctx.clock.wall());

            let Some(text) = self.frame_text(frame)? else {
                continue;
            };
            match self.adapter.decode(&text, self.ctx.clock.stamp()) {
                Decoded::AuthAccepted => {
                    debug!(provider = %self.config.id, "Authentication accepted");
                    return Ok(());
                }
                Decoded::AuthRejected(reason) => return Err(ProviderError::Authentication { reason }),
                other => self.handle_decoded(other),
            }
        }
    }

    /// Streaming loop. `Ok` means shutdown was requested; any error ends the session.
    ///
    /// Keepalives go out every heartbeat interval. The watchdog deadline sits
    /// two intervals after the last inbound frame and is pushed back by every
    /// frame, so a silent peer is dropped exactly at `2 × heartbeat_interval`.
    async fn stream(&self, transport: &mut dyn Transport, shutdown: &mut watch::Receiver<bool>) -> ProviderResult<()> {
        let interval = self.config.heartbeat_interval;
        let dead_after = interval * 2;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        let watchdog = tokio::time::sleep(dead_after);
        tokio::pin!(watchdog);

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => StreamEvent::Shutdown,
                frame = transport.recv() => StreamEvent::Frame(frame),
                _ = &mut watchdog => StreamEvent::Silent,
                _ = heartbeat.tick() => StreamEvent::HeartbeatDue,
            };

            match event {
                StreamEvent::Shutdown => return Ok(()),
                StreamEvent::Frame(None) => return Err(ProviderError::Closed),
                StreamEvent::Frame(Some(frame)) => {
                    let frame = frame?;
                    watchdog.as_mut().reset(tokio::time::Instant::now() + dead_after);
                    self.ctx.metrics.record_frame(&self.config.id, self.ctx.clock.wall());
                    if let Some(text) = self.frame_text(frame)? {
                        let decoded = self.adapter.decode(&text, self.ctx.clock.stamp());
                        self.handle_decoded(decoded);
                    }
                }
                StreamEvent::Silent => return Err(ProviderError::timeout("waiting for heartbeat", dead_after)),
                StreamEvent::HeartbeatDue => transport.send(self.adapter.keepalive()).await?,
            }
        }
    }

    /// Decode problems are counted and the frame is dropped; none of them ends a session.
    fn handle_decoded(&self, decoded: Decoded) {
        let id = &self.config.id;
        match decoded {
            Decoded::Quote(quote) => self.accept_quote(quote),
            Decoded::Heartbeat | Decoded::AuthAccepted => {}
            Decoded::AuthRejected(reason) => {
                self.ctx.metrics.record_rejected(id);
                warn!(provider = %id, "Ignoring auth rejection outside the handshake: {}", reason);
            }
            Decoded::Invalid(reason) => {
                self.ctx.metrics.record_rejected(id);
                debug!(provider = %id, "Dropped invalid frame: {}", reason);
            }
            Decoded::Unrecognized => {
                self.ctx.metrics.record_unrecognized(id);
                debug!(provider = %id, "Ignored unrecognized frame");
            }
        }
    }

    /// Text payload of a data frame. Control frames yield `None`; a close frame ends the session.
    fn frame_text(&self, frame: InboundFrame) -> ProviderResult<Option<String>> {
        match frame {
            InboundFrame::Text(text) => Ok(Some(text)),
            InboundFrame::Binary(data) => match String::from_utf8(data) {
                Ok(text) => Ok(Some(text)),
                Err(_) => {
                    self.ctx.metrics.record_unrecognized(&self.config.id);
                    debug!(provider = %self.config.id, "Ignored non-UTF-8 binary frame");
                    Ok(None)
                }
            },
            InboundFrame::Ping | InboundFrame::Pong => Ok(None),
            InboundFrame::Close => Err(ProviderError::Closed),
        }
    }

    fn accept_quote(&self, quote: Quote) {
        let symbol = quote.symbol().clone();
        self.ctx.metrics.record_quote(&self.config.id);
        self.ctx.cache.put(quote.clone());
        self.ctx.bus.publish(EngineEvent::QuoteUpdate(quote));
        // A full channel only delays detection until the next periodic scan
        let _ = self.ctx.nudges.try_send(symbol);
    }

    async fn close(&self, transport: &mut dyn Transport) {
        self.transition(ConnectionState::Closing);
        if let Err(e) = transport.close().await {
            debug!(provider = %self.config.id, "Close failed: {}", e);
        }
    }

    fn transition(&self, to: ConnectionState) {
        let from = std::mem::replace(&mut *self.state.write(), to);
        if from == to {
            return;
        }

        let id = &self.config.id;
        self.ctx.metrics.record_state(id, to);
        match to {
            ConnectionState::Failed => error!(provider = %id, "{} -> {}", from, to),
            ConnectionState::Reconnecting => warn!(provider = %id, "{} -> {}", from, to),
            _ => info!(provider = %id, "{} -> {}", from, to),
        }
        self.ctx.bus.publish(EngineEvent::StateChanged {
            provider: id.clone(),
            from,
            to,
        });
    }
}
