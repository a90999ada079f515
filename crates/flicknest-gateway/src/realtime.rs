//! [`RealtimeServer`] – WebSocket push of symbol changes.
//!
//! Listens on `0.0.0.0:5001` (configurable via [`RealtimeServer::with_addr`]).
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`:
//!
//! | Direction | Event | Data |
//! |---|---|---|
//! | server → client | `status` | `{"message": "Connected to server"}`, sent on connect |
//! | server → client | `all_symbols` | every symbol, keyed by id |
//! | server → client | `update` | `{id: Symbol}` after every successful mutation |
//! | client → server | `request_all_symbols` | none |
//!
//! Unknown client frames are ignored.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use flicknest_memory::SymbolStore;
use flicknest_middleware::UpdateBus;
use flicknest_types::{HubError, Symbol};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default TCP port for the realtime WebSocket server.
pub const DEFAULT_PORT: u16 = 5001;

const GREETING: &str = "Connected to server";

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    Status { message: String },
    AllSymbols(BTreeMap<String, Symbol>),
    Update(BTreeMap<String, Symbol>),
}

impl ServerFrame {
    fn to_message(&self) -> Result<Message, HubError> {
        serde_json::to_string(self)
            .map(|json| Message::Text(json.into()))
            .map_err(|e| HubError::MalformedMessage(format!("cannot encode frame: {e}")))
    }
}

/// Client → server frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    RequestAllSymbols,
}

impl ClientFrame {
    /// Parse a client text frame. Unknown or malformed frames yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let json = serde_json::from_str::<Value>(text).ok()?;
        match json.get("event").and_then(Value::as_str)? {
            "request_all_symbols" => Some(ClientFrame::RequestAllSymbols),
            _ => None,
        }
    }
}

pub struct RealtimeServer {
    store: Arc<SymbolStore>,
    bus: UpdateBus,
    addr: SocketAddr,
}

impl RealtimeServer {
    pub fn new(store: Arc<SymbolStore>, bus: UpdateBus) -> Self {
        Self {
            store,
            bus,
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), HubError> {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            HubError::TransportUnavailable(format!("cannot bind realtime server on {}: {e}", self.addr))
        })?;
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accept connections on an already-bound listener.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "realtime server listening");
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let store = Arc::clone(&self.store);
                    let bus = self.bus.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_ws(stream, peer, store, bus, shutdown).await {
                            warn!(peer = %peer, error = %e, "realtime client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            }
        }
        info!("realtime server stopped");
    }
}

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<SymbolStore>,
    bus: UpdateBus,
    shutdown: CancellationToken,
) -> Result<(), HubError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| HubError::TransportUnavailable(format!("WebSocket handshake: {e}")))?;
    info!(peer = %peer, "realtime client connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut updates = bus.subscribe();

    let greeting = ServerFrame::Status {
        message: GREETING.to_string(),
    };
    if ws_tx.send(greeting.to_message()?).await.is_err() {
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            update = updates.recv() => {
                let Some(update) = update else { break };
                let frame = ServerFrame::Update(update.as_entry());
                if ws_tx.send(frame.to_message()?).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match ClientFrame::parse(text.as_str()) {
                        Some(ClientFrame::RequestAllSymbols) => {
                            let frame = ServerFrame::AllSymbols(store.snapshot());
                            if ws_tx.send(frame.to_message()?).await.is_err() {
                                break;
                            }
                        }
                        None => debug!(peer = %peer, "ignoring unknown client frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(peer = %peer, error = %e, "realtime read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(peer = %peer, "realtime client disconnected");
    Ok(())
}
