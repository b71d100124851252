//! The relying-party consumer capability.
//!
//! Ties the pieces together: [`Consumer::associate`] performs the
//! discovery/association step and yields a [`HandshakeContext`] the
//! caller must keep server-side, [`Consumer::authenticate`] builds the
//! redirect destination for the browser, and
//! [`Consumer::verify_response`] checks the provider's signed callback
//! against the stored context.

use crate::association::{establish_association, unix_now, Association};
use crate::ax::{FetchRequest, FetchResponse};
use crate::discovery::DiscoveryInfo;
use crate::errors::*;
use crate::message::{require, IDENTIFIER_SELECT, OPENID2_NS};
use crate::nonce::NonceVerifier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Extension alias used for the AX fetch request
const AX_ALIAS: &str = "ax";

/// Assertion fields that must be covered by the signature
const REQUIRED_SIGNED_FIELDS: &[&str] =
    &["op_endpoint", "return_to", "response_nonce", "assoc_handle"];

/// State created at initiation and required to verify the callback.
///
/// Owned by the user's session. Encodes the association secret; must
/// never leave the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeContext {
    /// Resolved provider endpoint
    pub discovery: DiscoveryInfo,
    /// Negotiated association
    pub association: Association,
    /// Return URL registered for this handshake
    pub return_to: Url,
}

/// A built authentication request, ready to redirect the browser to.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Provider destination URL carrying the request parameters
    pub destination: Url,
}

impl AuthRequest {
    /// The destination URL as a string.
    pub fn destination_url(&self) -> &str {
        self.destination.as_str()
    }
}

/// Outcome of a successful callback verification.
#[derive(Debug, Clone)]
pub struct VerifiedResponse {
    /// Provider-asserted identity URL
    pub identity: String,
    /// Claimed identifier (falls back to the identity when absent)
    pub claimed_id: String,
    /// Attribute-exchange values from the assertion
    pub attributes: FetchResponse,
}

/// OpenID 2.0 relying-party consumer.
///
/// Holds the stateless pieces shared across handshakes: the HTTP client
/// used for the associate exchange and the process-wide nonce replay
/// store. Per-handshake state lives in the [`HandshakeContext`].
pub struct Consumer {
    http: reqwest::Client,
    nonces: NonceVerifier,
}

impl Consumer {
    /// Create a consumer with a default HTTP client and nonce window.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            nonces: NonceVerifier::default(),
        }
    }

    /// Perform the discovery/association step.
    ///
    /// Requests a DH-SHA256 association from the provider and binds the
    /// result to the registered return URL.
    pub async fn associate(
        &self,
        discovery: &DiscoveryInfo,
        return_to: &Url,
    ) -> Result<HandshakeContext> {
        let association = establish_association(&self.http, discovery).await?;
        Ok(HandshakeContext {
            discovery: discovery.clone(),
            association,
            return_to: return_to.clone(),
        })
    }

    /// Build the authentication request for a handshake.
    ///
    /// The destination URL addresses the provider endpoint with a
    /// `checkid_setup` request referencing the association handle, so
    /// the provider signs its response with the negotiated key. The
    /// fetch request, when non-empty, rides along as an AX extension.
    pub fn authenticate(
        &self,
        ctx: &HandshakeContext,
        fetch: &FetchRequest,
    ) -> Result<AuthRequest> {
        if ctx.association.is_expired(unix_now()) {
            return Err(OpenIdError::AssociationExpired(
                ctx.association.handle.clone(),
            ));
        }

        let realm = realm_for(&ctx.return_to)?;
        let mut destination = ctx.discovery.op_endpoint.clone();
        {
            let mut query = destination.query_pairs_mut();
            query
                .append_pair("openid.ns", OPENID2_NS)
                .append_pair("openid.mode", "checkid_setup")
                .append_pair("openid.claimed_id", IDENTIFIER_SELECT)
                .append_pair("openid.identity", IDENTIFIER_SELECT)
                .append_pair("openid.assoc_handle", &ctx.association.handle)
                .append_pair("openid.return_to", ctx.return_to.as_str())
                .append_pair("openid.realm", &realm);
            if !fetch.is_empty() {
                for (key, value) in fetch.to_params(AX_ALIAS) {
                    query.append_pair(&key, &value);
                }
            }
        }

        Ok(AuthRequest { destination })
    }

    /// Verify a positive assertion against the stored handshake context.
    ///
    /// Checks, in order: protocol namespace, mode, asserting endpoint,
    /// return URL, association handle and expiry, signature coverage,
    /// signature, nonce. Any failure is terminal; nothing about the
    /// response is trusted until every check has passed.
    pub fn verify_response(
        &self,
        ctx: &HandshakeContext,
        params: &HashMap<String, String>,
    ) -> Result<VerifiedResponse> {
        if require(params, "openid.ns")? != OPENID2_NS {
            return Err(OpenIdError::VerificationFailed(
                "unexpected protocol namespace".to_string(),
            ));
        }

        match require(params, "openid.mode")? {
            "id_res" => {}
            "cancel" => return Err(OpenIdError::Cancelled),
            other => {
                return Err(OpenIdError::VerificationFailed(format!(
                    "unexpected mode {:?}",
                    other
                )))
            }
        }

        let op_endpoint = require(params, "openid.op_endpoint")?;
        let asserted_endpoint = Url::parse(op_endpoint).map_err(|e| {
            OpenIdError::VerificationFailed(format!("bad op_endpoint: {}", e))
        })?;
        if asserted_endpoint != ctx.discovery.op_endpoint {
            return Err(OpenIdError::VerificationFailed(format!(
                "asserting endpoint {} does not match discovered endpoint",
                op_endpoint
            )));
        }

        let return_to = Url::parse(require(params, "openid.return_to")?).map_err(|e| {
            OpenIdError::VerificationFailed(format!("bad return_to: {}", e))
        })?;
        if return_to.scheme() != ctx.return_to.scheme()
            || return_to.host_str() != ctx.return_to.host_str()
            || return_to.port_or_known_default() != ctx.return_to.port_or_known_default()
            || return_to.path() != ctx.return_to.path()
        {
            return Err(OpenIdError::VerificationFailed(
                "return_to does not match the registered return URL".to_string(),
            ));
        }

        if require(params, "openid.assoc_handle")? != ctx.association.handle {
            return Err(OpenIdError::VerificationFailed(
                "association handle mismatch".to_string(),
            ));
        }
        let now = unix_now();
        if ctx.association.is_expired(now) {
            return Err(OpenIdError::AssociationExpired(
                ctx.association.handle.clone(),
            ));
        }

        let signed = require(params, "openid.signed")?;
        let signed_fields: Vec<&str> = signed.split(',').collect();
        for field in REQUIRED_SIGNED_FIELDS {
            if !signed_fields.contains(field) {
                return Err(OpenIdError::VerificationFailed(format!(
                    "signature does not cover {}",
                    field
                )));
            }
        }
        if params.contains_key("openid.identity") && !signed_fields.contains(&"identity") {
            return Err(OpenIdError::VerificationFailed(
                "signature does not cover identity".to_string(),
            ));
        }

        ctx.association.verify_signature(params)?;

        let nonce = require(params, "openid.response_nonce")?;
        self.nonces.accept(op_endpoint, nonce, now)?;

        // The callback transits the browser, so any parameter outside
        // openid.signed may have been rewritten by the user. Attribute
        // extraction only sees signature-covered parameters.
        let signed_params: HashMap<String, String> = signed_fields
            .iter()
            .filter_map(|field| {
                let key = format!("openid.{}", field);
                params.get(&key).map(|value| (key, value.clone()))
            })
            .collect();

        let identity = require(params, "openid.identity")
            .map_err(|_| {
                OpenIdError::VerificationFailed("assertion carries no identity".to_string())
            })?
            .to_string();
        let claimed_id = params
            .get("openid.claimed_id")
            .cloned()
            .unwrap_or_else(|| identity.clone());

        Ok(VerifiedResponse {
            identity,
            claimed_id,
            attributes: FetchResponse::from_params(&signed_params),
        })
    }
}

impl Default for Consumer {
    fn default() -> Self {
        Self::new()
    }
}

/// Realm covering the return URL (its origin plus a trailing slash).
fn realm_for(return_to: &Url) -> Result<String> {
    let origin = return_to.origin();
    if !origin.is_tuple() {
        return Err(OpenIdError::ConfigInvalid(
            "return URL has no usable origin".to_string(),
        ));
    }
    Ok(format!("{}/", origin.ascii_serialization()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::ASSOC_TYPE_HMAC_SHA256;

    const OP: &str = "https://op.example.com/auth";
    const RETURN_TO: &str = "https://rp.example.com/auth/openid/verify";
    const FIRST: &str = "http://axschema.org/namePerson/first";

    fn test_context() -> HandshakeContext {
        HandshakeContext {
            discovery: DiscoveryInfo::resolve(OP).unwrap(),
            association: Association {
                handle: "h-ctx".to_string(),
                mac_key: vec![0x17; 32],
                assoc_type: ASSOC_TYPE_HMAC_SHA256.to_string(),
                expires_at: unix_now() + 3600,
            },
            return_to: Url::parse(RETURN_TO).unwrap(),
        }
    }

    fn fresh_nonce(salt: &str) -> String {
        let ts = chrono::DateTime::from_timestamp(unix_now() as i64, 0).unwrap();
        format!("{}{}", ts.format("%Y-%m-%dT%H:%M:%SZ"), salt)
    }

    fn signed_assertion(ctx: &HandshakeContext, salt: &str) -> HashMap<String, String> {
        let mut params: HashMap<String, String> = [
            ("openid.ns", OPENID2_NS),
            ("openid.mode", "id_res"),
            ("openid.op_endpoint", OP),
            ("openid.return_to", RETURN_TO),
            ("openid.assoc_handle", "h-ctx"),
            ("openid.identity", "https://op.example.com/user/42"),
            ("openid.claimed_id", "https://op.example.com/user/42"),
            ("openid.ns.ext1", crate::ax::AX_NS),
            ("openid.ext1.mode", "fetch_response"),
            ("openid.ext1.type.fn", FIRST),
            ("openid.ext1.value.fn", "Grace"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        params.insert("openid.response_nonce".to_string(), fresh_nonce(salt));

        let signed = "op_endpoint,return_to,response_nonce,assoc_handle,identity,claimed_id,\
                      ns.ext1,ext1.mode,ext1.type.fn,ext1.value.fn";
        let fields: Vec<&str> = signed.split(',').collect();
        let sig = ctx.association.sign(&fields, &params).unwrap();
        params.insert("openid.signed".to_string(), signed.to_string());
        params.insert("openid.sig".to_string(), sig);
        params
    }

    #[test]
    fn test_authenticate_builds_destination() {
        let consumer = Consumer::new();
        let ctx = test_context();

        let mut fetch = FetchRequest::new();
        fetch.add_attribute("first_name", FIRST, true).unwrap();

        let request = consumer.authenticate(&ctx, &fetch).unwrap();
        let url = request.destination_url();

        assert!(url.starts_with(OP));
        assert!(url.contains("openid.mode=checkid_setup"));
        assert!(url.contains("openid.assoc_handle=h-ctx"));
        assert!(url.contains("openid.ns.ax="));
        assert!(url.contains("openid.realm=https%3A%2F%2Frp.example.com%2F"));
    }

    #[test]
    fn test_authenticate_rejects_expired_association() {
        let consumer = Consumer::new();
        let mut ctx = test_context();
        ctx.association.expires_at = unix_now().saturating_sub(1);

        assert!(matches!(
            consumer.authenticate(&ctx, &FetchRequest::new()),
            Err(OpenIdError::AssociationExpired(_))
        ));
    }

    #[test]
    fn test_verify_accepts_valid_assertion() {
        let consumer = Consumer::new();
        let ctx = test_context();
        let params = signed_assertion(&ctx, "a1");

        let verified = consumer.verify_response(&ctx, &params).unwrap();
        assert_eq!(verified.identity, "https://op.example.com/user/42");
        assert_eq!(verified.attributes.get_single(FIRST), Some("Grace"));
    }

    #[test]
    fn test_verify_ignores_unsigned_attributes() {
        let consumer = Consumer::new();
        let ctx = test_context();
        let mut params = signed_assertion(&ctx, "a9");

        // Attribute pair added after signing, as a user editing the
        // callback URL would
        let email = "http://axschema.org/contact/email";
        params.insert("openid.ext1.type.mail".to_string(), email.to_string());
        params.insert(
            "openid.ext1.value.mail".to_string(),
            "forged@example.com".to_string(),
        );

        let verified = consumer.verify_response(&ctx, &params).unwrap();
        assert_eq!(verified.attributes.get_single(FIRST), Some("Grace"));
        assert_eq!(verified.attributes.get_single(email), None);
    }

    #[test]
    fn test_verify_rejects_replay() {
        let consumer = Consumer::new();
        let ctx = test_context();
        let params = signed_assertion(&ctx, "a2");

        assert!(consumer.verify_response(&ctx, &params).is_ok());
        assert!(matches!(
            consumer.verify_response(&ctx, &params),
            Err(OpenIdError::NonceReplayed(_))
        ));
    }

    #[test]
    fn test_verify_rejects_handle_mismatch() {
        let consumer = Consumer::new();
        let ctx = test_context();
        let mut params = signed_assertion(&ctx, "a3");
        params.insert("openid.assoc_handle".to_string(), "h-other".to_string());

        assert!(matches!(
            consumer.verify_response(&ctx, &params),
            Err(OpenIdError::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_attribute() {
        let consumer = Consumer::new();
        let ctx = test_context();
        let mut params = signed_assertion(&ctx, "a4");
        params.insert(
            "openid.identity".to_string(),
            "https://op.example.com/user/666".to_string(),
        );

        assert!(matches!(
            consumer.verify_response(&ctx, &params),
            Err(OpenIdError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_verify_rejects_foreign_endpoint() {
        let consumer = Consumer::new();
        let ctx = test_context();
        let mut params = signed_assertion(&ctx, "a5");
        params.insert(
            "openid.op_endpoint".to_string(),
            "https://evil.example.com/auth".to_string(),
        );

        assert!(matches!(
            consumer.verify_response(&ctx, &params),
            Err(OpenIdError::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_verify_rejects_return_to_mismatch() {
        let consumer = Consumer::new();
        let ctx = test_context();
        let mut params = signed_assertion(&ctx, "a6");
        params.insert(
            "openid.return_to".to_string(),
            "https://rp.example.com/other".to_string(),
        );

        assert!(matches!(
            consumer.verify_response(&ctx, &params),
            Err(OpenIdError::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_verify_maps_cancel_mode() {
        let consumer = Consumer::new();
        let ctx = test_context();
        let mut params = signed_assertion(&ctx, "a7");
        params.insert("openid.mode".to_string(), "cancel".to_string());

        assert!(matches!(
            consumer.verify_response(&ctx, &params),
            Err(OpenIdError::Cancelled)
        ));
    }
}
