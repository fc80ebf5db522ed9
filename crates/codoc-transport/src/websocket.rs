//! WebSocket transport for codoc
//!
//! Text messages carry the control channel (JSON events), Binary
//! messages the sync channel (binary frames). The session token rides
//! the upgrade URL as a `token` query parameter; the literal token
//! `guest` yields a guest identity.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use codoc_core::{Hub, Payload};
use codoc_protocol::ServerEvent;

use crate::auth::{AuthError, TokenResolver};
use crate::session::SessionHandler;

/// WebSocket server for codoc
pub struct WebSocketServer {
    hub: Arc<Hub>,
    resolver: Arc<dyn TokenResolver>,
    addr: SocketAddr,
}

impl WebSocketServer {
    pub fn new(hub: Arc<Hub>, resolver: Arc<dyn TokenResolver>, addr: SocketAddr) -> Self {
        Self {
            hub,
            resolver,
            addr,
        }
    }

    /// Start the WebSocket server
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "codoc WebSocket server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let hub = self.hub.clone();
                    let resolver = self.resolver.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, hub, resolver).await {
                            error!(peer = %peer_addr, error = %e, "WebSocket connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

async fn handle_connection(
    stream: TcpStream,
    hub: Arc<Hub>,
    resolver: Arc<dyn TokenResolver>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut token: Option<String> = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        token = req.uri().query().and_then(|q| query_param(q, "token"));
        Ok(resp)
    })
    .await?;
    let (mut write, mut read) = ws_stream.split();

    // Resolve the token before any session state exists
    let resolved = match token {
        Some(token) => resolver.resolve(&token).await,
        None => Err(AuthError::MissingToken),
    };
    let identity = match resolved {
        Ok(resolved) => resolved.into_identity(),
        Err(e) => {
            warn!(error = %e, "WebSocket authentication failed");
            let event = ServerEvent::error("AUTH_FAILED", e.to_string());
            let _ = write.send(Message::Text(event.to_json())).await;
            let _ = write.send(Message::Close(None)).await;
            return Ok(());
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handler = SessionHandler::new(hub, identity, tx);
    let client = handler.connection_id();
    info!(client = %client, "WebSocket client connected");

    loop {
        tokio::select! {
            // Inbound frames from the client
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handler.handle_text(&text).await,
                    Some(Ok(Message::Binary(data))) => handler.handle_binary(&data).await,
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(client = %client, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ignore other message types
                    }
                    Some(Err(e)) => {
                        error!(client = %client, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }

            // Outbound queue: replies and room broadcasts
            out = rx.recv() => {
                match out {
                    Some(Payload::Text(text)) => {
                        if write.send(Message::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Payload::Binary(data)) => {
                        if write.send(Message::Binary(data.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    handler.close();
    Ok(())
}
