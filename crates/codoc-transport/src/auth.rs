//! Token resolution - the consumed authentication capability
//!
//! Session tokens are issued elsewhere; this layer only resolves them
//! to an identity. The literal token `guest` yields a guest identity
//! with a fresh sequence number.

use async_trait::async_trait;
use codoc_core::Identity;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Token value that always resolves to a guest identity.
pub const GUEST_TOKEN: &str = "guest";

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Token table error: {0}")]
    Table(String),
}

/// Profile behind an authenticated token.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub display_name: String,
    pub avatar_color: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Outcome of resolving a token.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedToken {
    User(UserProfile),
    Guest,
}

impl ResolvedToken {
    /// Turn the resolution into a connection identity. Each guest
    /// resolution mints a fresh guest id.
    pub fn into_identity(self) -> Identity {
        match self {
            ResolvedToken::User(profile) => Identity::User {
                id: profile.user_id,
                display_name: profile.display_name,
                avatar_color: profile.avatar_color,
                is_admin: profile.is_admin,
            },
            ResolvedToken::Guest => Identity::guest(),
        }
    }
}

/// Token resolution capability, injected into every transport adapter.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<ResolvedToken, AuthError>;
}

#[derive(Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: HashMap<String, UserProfile>,
}

/// Resolver backed by a static token table, loadable from a TOML file:
///
/// ```toml
/// [tokens.alpha-session-token]
/// user_id = 1
/// display_name = "Alice"
/// avatar_color = "#3B82F6"
/// is_admin = true
/// ```
#[derive(Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, UserProfile>,
}

impl StaticTokenResolver {
    /// Empty table: only guests can connect.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, profile: UserProfile) -> Self {
        self.tokens.insert(token.into(), profile);
        self
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AuthError> {
        let file: TokenFile = toml::from_str(raw).map_err(|e| AuthError::Table(e.to_string()))?;
        Ok(Self { tokens: file.tokens })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path).map_err(|e| AuthError::Table(e.to_string()))?;
        Self::from_toml_str(&raw)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Result<ResolvedToken, AuthError> {
        if token == GUEST_TOKEN {
            return Ok(ResolvedToken::Guest);
        }
        self.tokens
            .get(token)
            .cloned()
            .map(ResolvedToken::User)
            .ok_or(AuthError::InvalidToken)
    }
}
