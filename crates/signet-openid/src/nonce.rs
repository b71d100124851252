//! Response-nonce replay prevention.
//!
//! A positive assertion carries a `response_nonce` of the form
//! `2026-01-01T00:00:00Z<salt>`. Each nonce may be accepted once; the
//! timestamp must fall inside the verifier's age window, which also
//! bounds how long accepted nonces must be remembered.

use crate::errors::*;
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::sync::Mutex;

/// Default maximum accepted nonce age, in seconds
pub const DEFAULT_MAX_AGE_SECS: u64 = 300;

/// Tolerated forward clock skew, in seconds
const FUTURE_SKEW_SECS: u64 = 300;

/// Upper bound on remembered nonces
const MAX_ENTRIES: usize = 5000;

/// In-memory nonce replay store.
///
/// Process-wide: nonces are scoped by provider endpoint, so a single
/// verifier serves every concurrent handshake.
#[derive(Debug)]
pub struct NonceVerifier {
    max_age_secs: u64,
    seen: Mutex<HashMap<String, u64>>,
}

impl Default for NonceVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE_SECS)
    }
}

impl NonceVerifier {
    /// Create a verifier with the given maximum nonce age.
    pub fn new(max_age_secs: u64) -> Self {
        Self {
            max_age_secs,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Accept a nonce, failing on malformed timestamps, stale or
    /// far-future timestamps, and replays.
    pub fn accept(&self, op_endpoint: &str, nonce: &str, now: u64) -> Result<()> {
        let timestamp = parse_timestamp(nonce)?;

        if timestamp + self.max_age_secs < now {
            return Err(OpenIdError::NonceInvalid(format!(
                "nonce timestamp too old: {}",
                nonce
            )));
        }
        if timestamp > now + FUTURE_SKEW_SECS {
            return Err(OpenIdError::NonceInvalid(format!(
                "nonce timestamp in the future: {}",
                nonce
            )));
        }

        let key = format!("{}#{}", op_endpoint, nonce);
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Drop entries that have aged out of the window before checking
        // capacity; replays of those would fail the age check anyway.
        if seen.len() >= MAX_ENTRIES {
            let cutoff = now.saturating_sub(self.max_age_secs);
            seen.retain(|_, ts| *ts >= cutoff);
        }
        if seen.len() >= MAX_ENTRIES {
            return Err(OpenIdError::NonceInvalid(
                "nonce store full".to_string(),
            ));
        }

        if seen.insert(key, timestamp).is_some() {
            return Err(OpenIdError::NonceReplayed(nonce.to_string()));
        }
        Ok(())
    }
}

fn parse_timestamp(nonce: &str) -> Result<u64> {
    // get() rather than slicing: the 20th byte may fall inside a
    // multi-byte character in a hostile nonce
    let prefix = nonce.get(..20).ok_or_else(|| {
        OpenIdError::NonceInvalid(format!("bad timestamp prefix: {:?}", nonce))
    })?;
    let ts: DateTime<FixedOffset> = DateTime::parse_from_rfc3339(prefix)
        .map_err(|e| OpenIdError::NonceInvalid(format!("bad timestamp: {}", e)))?;
    u64::try_from(ts.timestamp())
        .map_err(|_| OpenIdError::NonceInvalid("timestamp before epoch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OP: &str = "https://op.example.com/auth";

    fn nonce_at(now: u64, salt: &str) -> String {
        let ts = chrono::DateTime::from_timestamp(now as i64, 0).unwrap();
        format!("{}{}", ts.format("%Y-%m-%dT%H:%M:%SZ"), salt)
    }

    #[test]
    fn test_accepts_fresh_nonce_once() {
        let verifier = NonceVerifier::default();
        let now = 1_700_000_000;
        let nonce = nonce_at(now, "abc");

        assert!(verifier.accept(OP, &nonce, now).is_ok());
        assert!(matches!(
            verifier.accept(OP, &nonce, now),
            Err(OpenIdError::NonceReplayed(_))
        ));
    }

    #[test]
    fn test_same_salt_different_endpoint_is_distinct() {
        let verifier = NonceVerifier::default();
        let now = 1_700_000_000;
        let nonce = nonce_at(now, "abc");

        assert!(verifier.accept(OP, &nonce, now).is_ok());
        assert!(verifier
            .accept("https://other.example.com/auth", &nonce, now)
            .is_ok());
    }

    #[test]
    fn test_rejects_stale_nonce() {
        let verifier = NonceVerifier::new(60);
        let now = 1_700_000_000;
        let nonce = nonce_at(now - 120, "abc");

        assert!(matches!(
            verifier.accept(OP, &nonce, now),
            Err(OpenIdError::NonceInvalid(_))
        ));
    }

    #[test]
    fn test_rejects_far_future_nonce() {
        let verifier = NonceVerifier::default();
        let now = 1_700_000_000;
        let nonce = nonce_at(now + 3600, "abc");

        assert!(matches!(
            verifier.accept(OP, &nonce, now),
            Err(OpenIdError::NonceInvalid(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_nonce() {
        let verifier = NonceVerifier::default();
        assert!(matches!(
            verifier.accept(OP, "garbage", 1_700_000_000),
            Err(OpenIdError::NonceInvalid(_))
        ));
    }

    #[test]
    fn test_rejects_multibyte_char_at_timestamp_boundary() {
        // 19 ASCII bytes then a 3-byte character straddling offset 20
        let verifier = NonceVerifier::default();
        assert!(matches!(
            verifier.accept(OP, "aaaaaaaaaaaaaaaaaaa\u{20ac}x", 1_700_000_000),
            Err(OpenIdError::NonceInvalid(_))
        ));
    }
}
