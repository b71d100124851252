use anyhow::{Context, Result};
use std::net::SocketAddr;
use url::Url;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the server to
    pub bind_address: SocketAddr,

    /// Identity provider endpoint URL
    pub provider_url: String,

    /// Return URL registered with the provider (the callback route)
    pub return_url: Url,

    /// Redirect target after a successful sign-in
    pub home_redirect: String,

    /// Redirect target when the session requires account linking
    pub linking_redirect: String,

    /// Redirect target when verification fails
    pub reauth_redirect: String,

    /// How many email values to request from the provider
    pub email_fetch_count: u32,

    /// Session lifetime in seconds
    pub session_ttl_seconds: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let bind_address = std::env::var("BIND_ADDRESS")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let provider_url = std::env::var("OPENID_PROVIDER_URL")
            .context("OPENID_PROVIDER_URL environment variable required")?;

        let return_url = std::env::var("OPENID_RETURN_URL")
            .context("OPENID_RETURN_URL environment variable required")?
            .parse()
            .context("OPENID_RETURN_URL must be a valid URL")?;

        let home_redirect = std::env::var("HOME_REDIRECT").unwrap_or_else(|_| "/".to_string());

        let linking_redirect = std::env::var("LINKING_REDIRECT")
            .unwrap_or_else(|_| "/account/link".to_string());

        let reauth_redirect =
            std::env::var("REAUTH_REDIRECT").unwrap_or_else(|_| "/login".to_string());

        let email_fetch_count = std::env::var("EMAIL_FETCH_COUNT")
            .unwrap_or_else(|_| "3".to_string())
            .parse()?;

        let session_ttl_seconds = std::env::var("SESSION_TTL_SECONDS")
            .unwrap_or_else(|_| "1800".to_string()) // 30 minutes
            .parse()?;

        Ok(Config {
            bind_address,
            provider_url,
            return_url,
            home_redirect,
            linking_redirect,
            reauth_redirect,
            email_fetch_count,
            session_ttl_seconds,
        })
    }
}
