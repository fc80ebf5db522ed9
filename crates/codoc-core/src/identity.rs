//! Connection identities and presence-map keys

use std::sync::atomic::{AtomicU64, Ordering};

/// Avatar color assigned to every guest.
pub const GUEST_AVATAR_COLOR: &str = "#6B7280";

static GUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Allocate the next process-unique guest sequence number.
pub fn next_guest_id() -> u64 {
    GUEST_SEQ.fetch_add(1, Ordering::Relaxed) + 1
}

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Authenticated user, resolved from a session token.
    User {
        id: i64,
        display_name: String,
        avatar_color: String,
        is_admin: bool,
    },
    /// Anonymous guest with a process-unique sequence number.
    Guest { id: u64 },
}

impl Identity {
    /// Create a fresh guest identity.
    pub fn guest() -> Self {
        Identity::Guest { id: next_guest_id() }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest { .. })
    }

    /// The stable key this identity uses in presence maps.
    ///
    /// Authenticated users key by user id, so multiple connections from
    /// the same user collapse to one presence entry; guests key by
    /// their synthetic id.
    pub fn participant_key(&self) -> ParticipantKey {
        match self {
            Identity::User { id, .. } => ParticipantKey::User(*id),
            Identity::Guest { id } => ParticipantKey::Guest(*id),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Identity::User { display_name, .. } => display_name.clone(),
            Identity::Guest { id } => format!("Guest {}", id),
        }
    }

    pub fn avatar_color(&self) -> &str {
        match self {
            Identity::User { avatar_color, .. } => avatar_color,
            Identity::Guest { .. } => GUEST_AVATAR_COLOR,
        }
    }

    /// Admin flag; only meaningful for authenticated users.
    pub fn is_admin(&self) -> Option<bool> {
        match self {
            Identity::User { is_admin, .. } => Some(*is_admin),
            Identity::Guest { .. } => None,
        }
    }
}

/// Stable presence-map key: user id for authenticated users, synthetic
/// guest id for guests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantKey {
    User(i64),
    Guest(u64),
}

impl ParticipantKey {
    pub fn is_guest(&self) -> bool {
        matches!(self, ParticipantKey::Guest(_))
    }
}

impl std::fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantKey::User(id) => write!(f, "{}", id),
            ParticipantKey::Guest(id) => write!(f, "guest_{}", id),
        }
    }
}
