//! OpenID 2.0 message encodings.
//!
//! Direct responses (associate) use the key-value form: one `key:value`
//! pair per line. Indirect messages (auth request, positive assertion)
//! travel as query parameters on a redirect URL.

use crate::errors::*;
use std::collections::HashMap;

/// OpenID 2.0 protocol namespace
pub const OPENID2_NS: &str = "http://specs.openid.net/auth/2.0";

/// Identifier-select sentinel for directed identity
pub const IDENTIFIER_SELECT: &str = "http://specs.openid.net/auth/2.0/identifier_select";

/// Parse a key-value form response body into a map.
///
/// Rejects lines without a colon; blank trailing lines are tolerated.
pub fn parse_key_value(body: &str) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for line in body.lines() {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| {
            OpenIdError::MessageInvalid(format!("malformed key-value line: {:?}", line))
        })?;
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}

/// Serialize pairs into key-value form, preserving order.
///
/// Used as the signature base string for signed assertions; keys and
/// values must not contain newlines (enforced by the caller's parameter
/// validation).
pub fn format_key_value(pairs: &[(String, String)]) -> String {
    let mut out = String::new();
    for (key, value) in pairs {
        out.push_str(key);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Fetch a required parameter from an indirect message.
pub fn require<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| OpenIdError::MessageInvalid(format!("missing parameter: {}", key)))
}
