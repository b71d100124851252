//! OpenID 2.0 relying-party sign-in service.
//!
//! Two handlers compose the redirect flow: `/auth/openid/initiate`
//! associates with the identity provider and sends the browser there
//! with an attribute-exchange request; `/auth/openid/verify` checks
//! the provider's signed callback and writes the verified profile into
//! the session.

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

pub mod api;
pub mod config;
pub mod error;
pub mod session;
pub mod state;

pub use config::Config;
pub use state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        // OpenID handshake
        .route("/auth/openid/initiate", get(api::auth::initiate))
        .route("/auth/openid/verify", get(api::auth::verify))
        // Middleware
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(state)
}
