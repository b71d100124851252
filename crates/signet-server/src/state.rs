use signet_openid::Consumer;
use std::sync::Arc;

use crate::config::Config;
use crate::session::SessionStore;

/// Application state shared across all handlers
pub struct AppState {
    pub config: Config,
    /// OpenID consumer: stateless transport plus the process-wide
    /// nonce replay store. Per-handshake state lives in the session.
    pub consumer: Consumer,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let sessions = Arc::new(SessionStore::new(config.session_ttl_seconds));
        AppState {
            config,
            consumer: Consumer::new(),
            sessions,
        }
    }
}
