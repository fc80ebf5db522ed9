//! TCP transport for codoc
//!
//! Frames are length-prefixed: `[u32 length][u8 kind][payload]`, where
//! length counts the kind byte plus the payload. Kind 0 carries the
//! control channel (JSON events), kind 1 the sync channel (binary
//! frames). The first frame must be a control `hello` naming the
//! session token:
//!
//! ```json
//! {"event": "hello", "data": {"token": "..."}}
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use codoc_core::{Hub, Payload};
use codoc_protocol::{ServerEvent, MAX_FRAME_SIZE};

use crate::auth::{AuthError, TokenResolver};
use crate::session::SessionHandler;

/// Channel marker for control frames (JSON events).
pub const KIND_CONTROL: u8 = 0;
/// Channel marker for sync frames (binary CRDT protocol).
pub const KIND_SYNC: u8 = 1;

/// TCP server for codoc
pub struct TcpServer {
    hub: Arc<Hub>,
    resolver: Arc<dyn TokenResolver>,
    addr: SocketAddr,
}

impl TcpServer {
    pub fn new(hub: Arc<Hub>, resolver: Arc<dyn TokenResolver>, addr: SocketAddr) -> Self {
        Self {
            hub,
            resolver,
            addr,
        }
    }

    /// Start the TCP server
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "codoc TCP server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let hub = self.hub.clone();
                    let resolver = self.resolver.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, hub, resolver).await {
                            error!(peer = %peer_addr, error = %e, "TCP connection error");
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

#[derive(Deserialize)]
struct HelloEnvelope {
    event: String,
    data: HelloData,
}

#[derive(Deserialize)]
struct HelloData {
    token: String,
}

fn parse_hello(payload: &[u8]) -> Option<String> {
    let envelope: HelloEnvelope = serde_json::from_slice(payload).ok()?;
    (envelope.event == "hello").then_some(envelope.data.token)
}

async fn handle_connection(
    stream: TcpStream,
    hub: Arc<Hub>,
    resolver: Arc<dyn TokenResolver>,
) -> io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    // The first frame must carry the token
    let token = match read_frame(&mut reader).await? {
        Some((KIND_CONTROL, payload)) => parse_hello(&payload),
        _ => None,
    };
    let resolved = match token {
        Some(token) => resolver.resolve(&token).await,
        None => Err(AuthError::MissingToken),
    };
    let identity = match resolved {
        Ok(resolved) => resolved.into_identity(),
        Err(e) => {
            warn!(error = %e, "TCP authentication failed");
            let event = ServerEvent::error("AUTH_FAILED", e.to_string());
            let _ = write_frame(&mut writer, &Payload::text(event.to_json())).await;
            return Ok(());
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handler = SessionHandler::new(hub, identity, tx);
    let client = handler.connection_id();
    info!(client = %client, "TCP client connected");

    // Writer task drains the outbound queue; it ends once the session
    // is torn down and the registry drops the sender
    let writer_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if write_frame(&mut writer, &payload).await.is_err() {
                break;
            }
        }
    });

    loop {
        match read_frame(&mut reader).await {
            Ok(Some((KIND_CONTROL, payload))) => {
                let text = String::from_utf8_lossy(&payload);
                handler.handle_text(&text).await;
            }
            Ok(Some((KIND_SYNC, payload))) => handler.handle_binary(&payload).await,
            Ok(Some((kind, _))) => {
                debug!(client = %client, kind, "Ignoring frame with unknown channel marker");
            }
            Ok(None) => {
                info!(client = %client, "TCP client disconnected");
                break;
            }
            Err(e) => {
                error!(client = %client, error = %e, "TCP read error");
                break;
            }
        }
    }

    handler.close();
    let _ = writer_task.await;
    Ok(())
}

/// Read one `[u32 length][u8 kind][payload]` frame. `Ok(None)` on a
/// clean EOF at a frame boundary.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf).await {
        return if e.kind() == io::ErrorKind::UnexpectedEof {
            Ok(None)
        } else {
            Err(e)
        };
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_SIZE + 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame length out of range",
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let payload = buf.split_off(1);
    Ok(Some((buf[0], payload)))
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &Payload) -> io::Result<()> {
    let (kind, bytes): (u8, &[u8]) = match payload {
        Payload::Text(text) => (KIND_CONTROL, text.as_bytes()),
        Payload::Binary(data) => (KIND_SYNC, data),
    };

    writer.write_u32((bytes.len() + 1) as u32).await?;
    writer.write_u8(kind).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}
