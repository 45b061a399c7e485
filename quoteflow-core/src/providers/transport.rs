//! Transport seam between supervisors and the network.
//!
//! Supervisors only see [`Connector`] and [`Transport`]; the WebSocket client
//! lives behind them so the state machine can be driven by a scripted peer.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::errors::{ProviderError, ProviderResult};

/// Everything needed to open a provider connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    /// Protocol-level ping.
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: OutboundFrame) -> ProviderResult<()>;

    /// Next inbound frame, or `None` once the peer is gone.
    async fn recv(&mut self) -> Option<ProviderResult<InboundFrame>>;

    async fn close(&mut self) -> ProviderResult<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> ProviderResult<Box<dyn Transport>>;
}

/// WebSocket connector over tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: &ConnectRequest) -> ProviderResult<Box<dyn Transport>> {
        url::Url::parse(&request.url)?;

        let mut http = request.url.as_str().into_client_request()?;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ProviderError::InvalidConfig {
                details: format!("header name {name}: {e}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| ProviderError::InvalidConfig {
                details: format!("header value for {name}: {e}"),
            })?;
            http.headers_mut().insert(name, value);
        }

        let (stream, response) = connect_async(http).await?;
        debug!("WebSocket handshake completed with status {}", response.status());

        Ok(Box::new(WsTransport { stream }))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: OutboundFrame) -> ProviderResult<()> {
        let message = match frame {
            OutboundFrame::Text(text) => Message::Text(text),
            OutboundFrame::Ping => Message::Ping(Vec::new()),
        };
        self.stream.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<ProviderResult<InboundFrame>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(Message::Text(text)) => InboundFrame::Text(text),
                Ok(Message::Binary(data)) => InboundFrame::Binary(data),
                Ok(Message::Ping(_)) => InboundFrame::Ping,
                Ok(Message::Pong(_)) => InboundFrame::Pong,
                Ok(Message::Close(_)) => InboundFrame::Close,
                Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(e.into())),
            };
            return Some(Ok(frame));
        }
    }

    async fn close(&mut self) -> ProviderResult<()> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(e) => match ProviderError::from(e) {
                ProviderError::Closed => Ok(()),
                other => Err(other),
            },
        }
    }
}

/// Scripted in-memory transport for supervisor and engine tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    enum Script {
        Refuse(ProviderError),
        Accept(MockTransport),
        Hang,
    }

    /// The test's end of one accepted connection.
    pub(crate) struct MockPeer {
        to_client: Option<mpsc::UnboundedSender<ProviderResult<InboundFrame>>>,
        from_client: mpsc::UnboundedReceiver<OutboundFrame>,
    }

    impl MockPeer {
        pub(crate) fn push_text(&self, text: &str) {
            self.push(InboundFrame::Text(text.to_string()));
        }

        pub(crate) fn push(&self, frame: InboundFrame) {
            if let Some(tx) = &self.to_client {
                let _ = tx.send(Ok(frame));
            }
        }

        /// Drop the client-bound channel so the transport reports the peer gone.
        pub(crate) fn hang_up(&mut self) {
            self.to_client = None;
        }

        /// Everything the client has sent so far.
        pub(crate) fn drain_sent(&mut self) -> Vec<OutboundFrame> {
            let mut sent = Vec::new();
            while let Ok(frame) = self.from_client.try_recv() {
                sent.push(frame);
            }
            sent
        }
    }

    pub(crate) struct MockTransport {
        inbound: mpsc::UnboundedReceiver<ProviderResult<InboundFrame>>,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, frame: OutboundFrame) -> ProviderResult<()> {
            self.outbound.send(frame).map_err(|_| ProviderError::Closed)
        }

        async fn recv(&mut self) -> Option<ProviderResult<InboundFrame>> {
            self.inbound.recv().await
        }

        async fn close(&mut self) -> ProviderResult<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Connector that plays back scripted outcomes in order. Once the script
    /// runs out every further connect is refused.
    #[derive(Default)]
    pub(crate) struct ScriptedConnector {
        script: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<ConnectRequest>>,
        closed: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn refuse(&self, error: ProviderError) {
            self.script.lock().push_back(Script::Refuse(error));
        }

        /// Never completes the connect, for timeout tests.
        pub(crate) fn hang(&self) {
            self.script.lock().push_back(Script::Hang);
        }

        pub(crate) fn accept(&self) -> MockPeer {
            let (to_client, inbound) = mpsc::unbounded_channel();
            let (outbound, from_client) = mpsc::unbounded_channel();
            self.script.lock().push_back(Script::Accept(MockTransport {
                inbound,
                outbound,
                closed: self.closed.clone(),
            }));
            MockPeer {
                to_client: Some(to_client),
                from_client,
            }
        }

        pub(crate) fn connect_count(&self) -> usize {
            self.requests.lock().len()
        }

        pub(crate) fn requests(&self) -> Vec<ConnectRequest> {
            self.requests.lock().clone()
        }

        pub(crate) fn close_count(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, request: &ConnectRequest) -> ProviderResult<Box<dyn Transport>> {
            self.requests.lock().push(request.clone());
            let next = self.script.lock().pop_front();
            match next {
                Some(Script::Accept(transport)) => Ok(Box::new(transport)),
                Some(Script::Refuse(error)) => Err(error),
                Some(Script::Hang) => std::future::pending().await,
                None => Err(ProviderError::Connection {
                    message: "connection refused".to_string(),
                }),
            }
        }
    }
}
