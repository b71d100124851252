//! Provider endpoint resolution.
//!
//! The deployment targets a single, known provider, so discovery wraps
//! the configured endpoint URL rather than performing XRDS/Yadis
//! resolution. A URL that does not parse, or that uses a non-HTTP
//! scheme, is a configuration error surfaced to the caller. The flow
//! must not proceed with an unusable endpoint.

use crate::errors::*;
use serde::{Deserialize, Serialize};
use url::Url;

/// Resolved provider endpoint information.
///
/// Created at initiation and carried inside the handshake context so the
/// callback can check the asserting endpoint against what was discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    /// The provider's authentication endpoint
    pub op_endpoint: Url,
}

impl DiscoveryInfo {
    /// Resolve the provider endpoint from a configured URL.
    pub fn resolve(provider_url: &str) -> Result<Self> {
        let op_endpoint = Url::parse(provider_url)
            .map_err(|e| OpenIdError::ConfigInvalid(format!("provider URL: {}", e)))?;

        match op_endpoint.scheme() {
            "http" | "https" => {}
            other => {
                return Err(OpenIdError::ConfigInvalid(format!(
                    "provider URL scheme must be http or https, got {:?}",
                    other
                )))
            }
        }

        Ok(Self { op_endpoint })
    }

    /// Whether the endpoint is reached over TLS.
    ///
    /// Unencrypted association sessions are only acceptable when the
    /// transport itself is encrypted (OpenID 2.0 §8.4.1).
    pub fn is_https(&self) -> bool {
        self.op_endpoint.scheme() == "https"
    }
}
