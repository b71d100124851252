//! Association establishment and assertion signing.
//!
//! An association is a shared MAC key negotiated with the provider up
//! front so that later positive assertions can be verified locally,
//! without a direct check_authentication round trip.

use crate::dh::{btwoc, from_btwoc, xor_secret, DhKeyPair, DhParams};
use crate::discovery::DiscoveryInfo;
use crate::errors::*;
use crate::message::{parse_key_value, OPENID2_NS};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Association type requested and required from the provider
pub const ASSOC_TYPE_HMAC_SHA256: &str = "HMAC-SHA256";

/// DH-SHA256 session type (the minimum strength accepted)
pub const SESSION_TYPE_DH_SHA256: &str = "DH-SHA256";

/// Cleartext session type, acceptable only over TLS
pub const SESSION_TYPE_NO_ENCRYPTION: &str = "no-encryption";

/// A negotiated association: the provider-issued handle plus the shared
/// MAC key used to verify signed assertions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Association {
    /// Provider-issued association handle
    pub handle: String,
    /// Shared HMAC-SHA256 key
    pub mac_key: Vec<u8>,
    /// Association type negotiated (always HMAC-SHA256)
    pub assoc_type: String,
    /// Unix timestamp after which the association is unusable
    pub expires_at: u64,
}

/// Current unix timestamp
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Association {
    /// Whether the association has passed its expiry time.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Sign the named fields of an indirect message.
    ///
    /// The signature base string is the key-value form of the signed
    /// fields, in list order, with the `openid.` prefix stripped from
    /// the keys. Returns the base64-encoded HMAC-SHA256 tag.
    pub fn sign(&self, signed_fields: &[&str], params: &HashMap<String, String>) -> Result<String> {
        let base = signature_base(signed_fields, params)?;
        let mut mac = HmacSha256::new_from_slice(&self.mac_key)
            .map_err(|e| OpenIdError::AssociationFailed(format!("bad MAC key: {}", e)))?;
        mac.update(base.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Verify the signature of a positive assertion.
    ///
    /// Reads `openid.signed` and `openid.sig` from the message and
    /// checks the tag in constant time.
    pub fn verify_signature(&self, params: &HashMap<String, String>) -> Result<()> {
        let signed = crate::message::require(params, "openid.signed")?;
        let sig = crate::message::require(params, "openid.sig")?;

        let signed_fields: Vec<&str> = signed.split(',').collect();
        let base = signature_base(&signed_fields, params)?;

        let tag = BASE64
            .decode(sig)
            .map_err(|_| OpenIdError::SignatureMismatch)?;

        let mut mac = HmacSha256::new_from_slice(&self.mac_key)
            .map_err(|e| OpenIdError::AssociationFailed(format!("bad MAC key: {}", e)))?;
        mac.update(base.as_bytes());
        mac.verify_slice(&tag)
            .map_err(|_| OpenIdError::SignatureMismatch)
    }
}

fn signature_base(signed_fields: &[&str], params: &HashMap<String, String>) -> Result<String> {
    let mut pairs = Vec::with_capacity(signed_fields.len());
    for field in signed_fields {
        let value = crate::message::require(params, &format!("openid.{}", field))?;
        pairs.push((field.to_string(), value.to_string()));
    }
    Ok(crate::message::format_key_value(&pairs))
}

/// Establish an association with the provider, requesting DH-SHA256.
///
/// The provider may answer with `no-encryption`, which is accepted only
/// when the endpoint is reached over TLS; anything else fails. All
/// failures abort with an explicit error; there is no unauthenticated
/// fallback.
pub async fn establish_association(
    http: &reqwest::Client,
    discovery: &DiscoveryInfo,
) -> Result<Association> {
    let params = DhParams::default();
    let keypair = DhKeyPair::generate(params.clone());

    let form = [
        ("openid.ns", OPENID2_NS.to_string()),
        ("openid.mode", "associate".to_string()),
        ("openid.assoc_type", ASSOC_TYPE_HMAC_SHA256.to_string()),
        ("openid.session_type", SESSION_TYPE_DH_SHA256.to_string()),
        ("openid.dh_modulus", BASE64.encode(btwoc(&params.modulus))),
        ("openid.dh_gen", BASE64.encode(btwoc(&params.generator))),
        (
            "openid.dh_consumer_public",
            BASE64.encode(btwoc(&keypair.public)),
        ),
    ];

    let response = http
        .post(discovery.op_endpoint.clone())
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(OpenIdError::AssociationFailed(format!(
            "provider returned status {}: {}",
            status, body
        )));
    }

    let fields = parse_key_value(&body)?;
    if let Some(error) = fields.get("error") {
        return Err(OpenIdError::AssociationFailed(format!(
            "provider error: {}",
            error
        )));
    }

    let get = |key: &str| -> Result<&str> {
        fields
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| OpenIdError::AssociationFailed(format!("response missing {}", key)))
    };

    let assoc_type = get("assoc_type")?;
    if assoc_type != ASSOC_TYPE_HMAC_SHA256 {
        return Err(OpenIdError::AssociationFailed(format!(
            "unsupported assoc_type {:?}",
            assoc_type
        )));
    }

    let handle = get("assoc_handle")?.to_string();
    let expires_in: u64 = get("expires_in")?
        .parse()
        .map_err(|_| OpenIdError::AssociationFailed("non-numeric expires_in".to_string()))?;

    let mac_key = match get("session_type")? {
        SESSION_TYPE_DH_SHA256 => {
            let server_public = BASE64
                .decode(get("dh_server_public")?)
                .map_err(|_| OpenIdError::AssociationFailed("bad dh_server_public".to_string()))?;
            let enc_mac_key = BASE64
                .decode(get("enc_mac_key")?)
                .map_err(|_| OpenIdError::AssociationFailed("bad enc_mac_key".to_string()))?;
            let shared = keypair.shared_secret(&from_btwoc(&server_public));
            xor_secret(&shared, &enc_mac_key)?
        }
        SESSION_TYPE_NO_ENCRYPTION => {
            if !discovery.is_https() {
                return Err(OpenIdError::AssociationFailed(
                    "provider offered no-encryption session over plain http".to_string(),
                ));
            }
            BASE64
                .decode(get("mac_key")?)
                .map_err(|_| OpenIdError::AssociationFailed("bad mac_key".to_string()))?
        }
        other => {
            return Err(OpenIdError::AssociationFailed(format!(
                "unsupported session_type {:?}",
                other
            )))
        }
    };

    tracing::debug!(
        handle = %handle,
        expires_in,
        "association established"
    );

    Ok(Association {
        handle,
        mac_key,
        assoc_type: assoc_type.to_string(),
        expires_at: unix_now() + expires_in,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_association() -> Association {
        Association {
            handle: "h-test".to_string(),
            mac_key: vec![0x42; 32],
            assoc_type: ASSOC_TYPE_HMAC_SHA256.to_string(),
            expires_at: unix_now() + 3600,
        }
    }

    fn signed_params(assoc: &Association) -> HashMap<String, String> {
        let mut params: HashMap<String, String> = [
            ("openid.op_endpoint", "https://op.example.com/auth"),
            ("openid.return_to", "https://rp.example.com/verify"),
            ("openid.response_nonce", "2026-01-01T00:00:00Zabc"),
            ("openid.assoc_handle", "h-test"),
            ("openid.identity", "https://op.example.com/user/1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let signed = "op_endpoint,return_to,response_nonce,assoc_handle,identity";
        let fields: Vec<&str> = signed.split(',').collect();
        let sig = assoc.sign(&fields, &params).unwrap();
        params.insert("openid.signed".to_string(), signed.to_string());
        params.insert("openid.sig".to_string(), sig);
        params
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let assoc = test_association();
        let params = signed_params(&assoc);
        assert!(assoc.verify_signature(&params).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampered_field() {
        let assoc = test_association();
        let mut params = signed_params(&assoc);
        params.insert(
            "openid.identity".to_string(),
            "https://op.example.com/user/2".to_string(),
        );
        assert!(matches!(
            assoc.verify_signature(&params),
            Err(OpenIdError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let assoc = test_association();
        let params = signed_params(&assoc);

        let other = Association {
            mac_key: vec![0x43; 32],
            ..assoc
        };
        assert!(matches!(
            other.verify_signature(&params),
            Err(OpenIdError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_verify_requires_signed_fields_present() {
        let assoc = test_association();
        let mut params = signed_params(&assoc);
        params.remove("openid.response_nonce");
        assert!(matches!(
            assoc.verify_signature(&params),
            Err(OpenIdError::MessageInvalid(_))
        ));
    }

    #[test]
    fn test_expiry() {
        let assoc = test_association();
        assert!(!assoc.is_expired(unix_now()));
        assert!(assoc.is_expired(assoc.expires_at));
    }
}
