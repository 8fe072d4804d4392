//! WebSocket server implementation
//!
//! One listener serves the WebSocket endpoint (`/ws`) and the HTTP control
//! interface (`/state`, `/push`, `/broadcast`).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::{any, get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::dispatcher::Dispatcher;
use super::http;
use crate::registry::{outbound_channel, ConnectionId};

/// Configuration for the relay server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Include recipient counts in push/broadcast replies
    pub report_delivery: bool,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            report_delivery: false,
        }
    }

    /// Enable or disable delivery counts in HTTP replies
    pub fn with_report_delivery(mut self, report_delivery: bool) -> Self {
        self.report_delivery = report_delivery;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// State shared by every route
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub report_delivery: bool,
    shutdown_tx: broadcast::Sender<()>,
}

/// Relay server owning the dispatcher and the shutdown fan-out
pub struct RelayServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server with an empty registry
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new()),
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// State handed to every route
    pub fn state(&self) -> AppState {
        AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            report_delivery: self.config.report_delivery,
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Build the router for all endpoints
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/state", any(http::state))
            .route("/push", post(http::push).fallback(http::invalid_request))
            .route(
                "/broadcast",
                post(http::broadcast).fallback(http::invalid_request),
            )
            .with_state(self.state())
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let addr = listener.local_addr()?;
        info!("Relay server listening on {}", addr);
        info!("  /ws         websocket endpoint");
        info!("  /state      registry snapshot");
        info!("  /push       push a message to one connection");
        info!("  /broadcast  broadcast a message to a room");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutdown signal received, stopping server");
            })
            .await?;

        let remaining = self.dispatcher.connection_count().await;
        if remaining > 0 {
            info!(
                "{} connection(s) in {} room(s) still closing",
                remaining,
                self.dispatcher.room_count().await
            );
        }
        Ok(())
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let dispatcher = Arc::clone(&state.dispatcher);
        let id = dispatcher.next_connection_id();
        let shutdown_rx = state.shutdown_tx.subscribe();

        if let Err(e) = handle_connection(socket, id, &dispatcher, shutdown_rx).await {
            error!("Connection {} error: {}", id, e);
        }
        dispatcher.on_disconnect(id).await;
    })
}

/// Drive a single WebSocket session until either side closes it
async fn handle_connection(
    socket: WebSocket,
    id: ConnectionId,
    dispatcher: &Dispatcher,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = outbound_channel();
    dispatcher.on_connect(id, outbound_tx).await;

    loop {
        tokio::select! {
            // Frames from the client
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = dispatcher.on_text_message(id, text.as_str()).await {
                            ws_sender.send(Message::Text(reply.to_json()?.into())).await?;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Received binary message from connection {} ({} bytes), ignoring", id, data.len());
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Keep-alive is answered by the transport
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Connection {} requested close", id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error on connection {}: {}", id, e);
                        break;
                    }
                    None => {
                        debug!("Connection {} dropped", id);
                        break;
                    }
                }
            }
            // Pushes and broadcasts routed to this connection
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(text) => ws_sender.send(Message::Text(text.into())).await?,
                    None => break,
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}
