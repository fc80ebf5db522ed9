//! codoc transport layer
//!
//! Transport adapters over the session core:
//! - WebSocket: Text messages carry the control channel, Binary
//!   messages the sync channel
//! - TCP: length-prefixed frames with a one-byte channel marker
//!
//! Both adapters drive the same [`SessionHandler`] state machine; the
//! protocol itself is transport-agnostic.

pub mod auth;
pub mod session;
pub mod sweeper;
#[cfg(feature = "tcp")]
pub mod tcp;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use auth::{AuthError, ResolvedToken, StaticTokenResolver, TokenResolver, UserProfile};
pub use session::SessionHandler;
pub use sweeper::LivenessSweeper;
#[cfg(feature = "tcp")]
pub use tcp::TcpServer;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketServer;
