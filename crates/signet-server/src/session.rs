//! Cookie-keyed server-side session store.
//!
//! The handshake context encodes the association MAC key, so session
//! contents stay server-side; the client only ever holds an opaque
//! session id cookie.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use signet_openid::HandshakeContext;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Session id cookie name
pub const SESSION_COOKIE: &str = "signet_session";

/// Value of `openid_status` after a verified callback
pub const STATUS_VERIFIED: &str = "verified";

/// Initial `connection_status` written alongside a verified profile
pub const STATUS_NOT_AUTHORIZED: &str = "not_authorized";

/// Per-session state.
///
/// Field names are a contract with downstream pages; the profile
/// fields are written only by the callback handler, all at once,
/// after verification has passed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    /// Handshake state awaiting the provider callback
    pub handshake_context: Option<HandshakeContext>,
    pub identity: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub realm_id: Option<String>,
    /// `"verified"` once a callback has been verified, unset before
    pub openid_status: Option<String>,
    /// `"not_authorized"` until the application connects the account
    pub connection_status: Option<String>,
    /// Boolean-as-string set by the linking flow, read at callback
    pub is_linking_required: Option<String>,
}

#[derive(Debug)]
struct SessionEntry {
    data: SessionData,
    expires_at: DateTime<Utc>,
}

/// In-memory session store with TTL-based expiry.
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds as i64),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create an empty session and return its id.
    pub async fn create(&self) -> String {
        let id = new_session_id();
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id.clone(),
            SessionEntry {
                data: SessionData::default(),
                expires_at: Utc::now() + self.ttl,
            },
        );
        id
    }

    /// Load a session's data; expired sessions read as absent.
    pub async fn load(&self, id: &str) -> Option<SessionData> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(id)?;
        if entry.expires_at <= Utc::now() {
            return None;
        }
        Some(entry.data.clone())
    }

    /// Mutate a session's data in place, refreshing its expiry.
    ///
    /// Returns false when the session does not exist or has expired;
    /// the mutation is not applied in that case.
    pub async fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut SessionData),
    {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(id) else {
            return false;
        };
        if entry.expires_at <= Utc::now() {
            return false;
        }
        f(&mut entry.data);
        entry.expires_at = Utc::now() + self.ttl;
        true
    }

    /// Drop expired sessions; returns the number removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let now = Utc::now();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }
}

/// Spawn the periodic expired-session sweeper.
pub fn spawn_cleanup_task(store: Arc<SessionStore>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            let removed = store.cleanup_expired().await;
            if removed > 0 {
                tracing::debug!(removed, "Cleaned up expired sessions");
            }
        }
    });
}

/// 256-bit random session id, hex-encoded.
fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
