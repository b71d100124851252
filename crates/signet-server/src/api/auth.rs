use axum::{
    extract::{Query, State},
    response::Redirect,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use signet_openid::{DiscoveryInfo, FetchRequest, OpenIdError, VerifiedResponse};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    error::ApiError,
    session::{SESSION_COOKIE, STATUS_NOT_AUTHORIZED, STATUS_VERIFIED},
    state::AppState,
};

// ============================================================================
// Attribute schema
// ============================================================================

const AX_FIRST_NAME: &str = "http://axschema.org/namePerson/first";
const AX_LAST_NAME: &str = "http://axschema.org/namePerson/last";
const AX_EMAIL: &str = "http://axschema.org/contact/email";
const AX_REALM_ID: &str = "http://axschema.org/intuit/realmId";

/// The fixed profile fetch request: four required attributes, with up
/// to `email_count` email values.
///
/// A rejected declaration is logged and left out of the request rather
/// than aborting the flow; the provider then simply omits that field.
fn profile_fetch_request(email_count: u32) -> FetchRequest {
    let mut fetch = FetchRequest::new();
    for (alias, type_uri) in [
        ("first_name", AX_FIRST_NAME),
        ("last_name", AX_LAST_NAME),
        ("email", AX_EMAIL),
        ("realm_id", AX_REALM_ID),
    ] {
        if let Err(e) = fetch.add_attribute(alias, type_uri, true) {
            tracing::warn!(alias, error = %e, "Attribute not requested");
        }
    }
    if let Err(e) = fetch.set_count("email", email_count) {
        tracing::warn!(error = %e, "Email count not requested");
    }
    fetch
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /auth/openid/initiate
///
/// Associates with the provider, stores the handshake context in the
/// session, and redirects the browser to the provider's endpoint. Any
/// discovery, association or request-build failure aborts with an
/// explicit error before a redirect is issued.
pub async fn initiate(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ApiError> {
    let discovery = DiscoveryInfo::resolve(&state.config.provider_url)?;

    let context = state
        .consumer
        .associate(&discovery, &state.config.return_url)
        .await?;

    let fetch = profile_fetch_request(state.config.email_fetch_count);
    let request = state.consumer.authenticate(&context, &fetch)?;

    let (jar, session_id) = ensure_session(&state, jar).await;
    let stored = state
        .sessions
        .update(&session_id, |data| {
            data.handshake_context = Some(context);
        })
        .await;
    if !stored {
        return Err(ApiError::Internal(anyhow::anyhow!(
            "session expired before the handshake state was stored"
        )));
    }

    tracing::info!(
        destination = %request.destination_url(),
        "Redirecting to identity provider"
    );
    Ok((jar, Redirect::to(request.destination_url())))
}

/// GET /auth/openid/verify
///
/// Verifies the provider's signed callback against the handshake
/// context stored at initiation. On success the profile is written
/// into the session in one step; any failure redirects to the re-auth
/// target with no session profile writes.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<HashMap<String, String>>,
) -> Redirect {
    let reauth = Redirect::to(&state.config.reauth_redirect);

    let Some(session_id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
        tracing::warn!("Callback without a session cookie");
        return reauth;
    };
    let Some(session) = state.sessions.load(&session_id).await else {
        tracing::warn!("Callback for unknown or expired session");
        return reauth;
    };
    let Some(context) = session.handshake_context else {
        tracing::warn!("Callback without a stored handshake context");
        return reauth;
    };

    let verified = match state.consumer.verify_response(&context, &params) {
        Ok(verified) => verified,
        Err(OpenIdError::Cancelled) => {
            tracing::info!("User cancelled authentication at the provider");
            return reauth;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Callback verification failed");
            return reauth;
        }
    };

    tracing::info!(identity = %verified.identity, "Authentication verified");

    let linking_required = session.is_linking_required.as_deref() == Some("true");
    finish_sign_in(&state, &session_id, linking_required, &verified).await
}

/// Write the verified profile into the session and pick the
/// post-sign-in redirect.
///
/// The session can lapse between the callback's load and this write;
/// when the write does not land the user is not signed in and is
/// routed to re-auth, never to the home view.
async fn finish_sign_in(
    state: &AppState,
    session_id: &str,
    linking_required: bool,
    verified: &VerifiedResponse,
) -> Redirect {
    let attributes = &verified.attributes;
    let first_name = attributes.get_single(AX_FIRST_NAME).map(String::from);
    let last_name = attributes.get_single(AX_LAST_NAME).map(String::from);
    let email = attributes.get_single(AX_EMAIL).map(String::from);
    let realm_id = attributes.get_single(AX_REALM_ID).map(String::from);

    let wrote = state
        .sessions
        .update(session_id, |data| {
            // Context is single-use; a replayed callback must not find it
            data.handshake_context = None;
            data.identity = Some(verified.identity.clone());
            data.first_name = first_name;
            data.last_name = last_name;
            data.email = email;
            data.realm_id = realm_id;
            data.openid_status = Some(STATUS_VERIFIED.to_string());
            data.connection_status = Some(STATUS_NOT_AUTHORIZED.to_string());
        })
        .await;
    if !wrote {
        tracing::warn!("Session expired before the profile write");
        return Redirect::to(&state.config.reauth_redirect);
    }

    if linking_required {
        Redirect::to(&state.config.linking_redirect)
    } else {
        Redirect::to(&state.config.home_redirect)
    }
}

/// Reuse the session named by the cookie, or create a fresh one.
async fn ensure_session(state: &AppState, jar: CookieJar) -> (CookieJar, String) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let id = cookie.value().to_string();
        if state.sessions.load(&id).await.is_some() {
            return (jar, id);
        }
    }

    let id = state.sessions.create().await;
    let cookie = Cookie::build((SESSION_COOKIE, id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    (jar.add(cookie), id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_fetch_request_declares_all_fields() {
        let fetch = profile_fetch_request(3);
        let params: HashMap<_, _> = fetch.to_params("ax").into_iter().collect();

        assert_eq!(params.get("openid.ax.type.first_name").unwrap(), AX_FIRST_NAME);
        assert_eq!(params.get("openid.ax.type.last_name").unwrap(), AX_LAST_NAME);
        assert_eq!(params.get("openid.ax.type.email").unwrap(), AX_EMAIL);
        assert_eq!(params.get("openid.ax.type.realm_id").unwrap(), AX_REALM_ID);
        assert_eq!(
            params.get("openid.ax.required").unwrap(),
            "first_name,last_name,email,realm_id"
        );
        assert_eq!(params.get("openid.ax.count.email").unwrap(), "3");
    }

    #[tokio::test]
    async fn test_lapsed_session_write_routes_to_reauth() {
        use axum::response::IntoResponse;
        use signet_openid::FetchResponse;

        let config = crate::config::Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            provider_url: "https://op.example.com/auth".to_string(),
            return_url: "https://rp.example.com/auth/openid/verify"
                .parse()
                .unwrap(),
            home_redirect: "/".to_string(),
            linking_redirect: "/account/link".to_string(),
            reauth_redirect: "/login".to_string(),
            email_fetch_count: 3,
            session_ttl_seconds: 0,
        };
        let state = AppState::new(config);
        // With a zero TTL the session lapses as soon as it is created
        let session_id = state.sessions.create().await;

        let verified = VerifiedResponse {
            identity: "https://op.example.com/user/1".to_string(),
            claimed_id: "https://op.example.com/user/1".to_string(),
            attributes: FetchResponse::default(),
        };

        let response = finish_sign_in(&state, &session_id, false, &verified)
            .await
            .into_response();
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::LOCATION)
                .unwrap(),
            "/login"
        );
    }
}
