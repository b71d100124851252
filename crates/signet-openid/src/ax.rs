//! Attribute Exchange (AX 1.0) fetch requests and responses.
//!
//! The fetch response is parsed by the provider's declared alias
//! mapping: the extension alias comes from the `openid.ns.<alias>`
//! declaration and each attribute alias from `openid.<alias>.type.<a>`.
//! Nothing assumes a fixed alias ordering, so a provider reshuffling
//! its aliases cannot misassign fields.

use crate::errors::*;
use std::collections::HashMap;
use url::Url;

/// AX 1.0 extension namespace
pub const AX_NS: &str = "http://openid.net/srv/ax/1.0";

/// One requested attribute
#[derive(Debug, Clone)]
pub struct AttributeSpec {
    /// Request-side alias (the provider may answer with different aliases)
    pub alias: String,
    /// Attribute type URI
    pub type_uri: String,
    /// Whether the provider is told the attribute is required
    pub required: bool,
}

/// An AX fetch request attached to an authentication request.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    attributes: Vec<AttributeSpec>,
    counts: HashMap<String, u32>,
}

impl FetchRequest {
    /// Create an empty fetch request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an attribute to fetch.
    ///
    /// The alias must be ASCII alphanumeric (plus underscore) and
    /// unique; the type must be a valid URI. A rejected declaration
    /// leaves the request unchanged.
    pub fn add_attribute(&mut self, alias: &str, type_uri: &str, required: bool) -> Result<()> {
        if alias.is_empty()
            || !alias
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(OpenIdError::AttributeInvalid(format!(
                "bad alias {:?}",
                alias
            )));
        }
        if self.attributes.iter().any(|a| a.alias == alias) {
            return Err(OpenIdError::AttributeInvalid(format!(
                "duplicate alias {:?}",
                alias
            )));
        }
        Url::parse(type_uri)
            .map_err(|e| OpenIdError::AttributeInvalid(format!("bad type URI: {}", e)))?;

        self.attributes.push(AttributeSpec {
            alias: alias.to_string(),
            type_uri: type_uri.to_string(),
            required,
        });
        Ok(())
    }

    /// Ask the provider to return up to `count` values for an alias.
    pub fn set_count(&mut self, alias: &str, count: u32) -> Result<()> {
        if !self.attributes.iter().any(|a| a.alias == alias) {
            return Err(OpenIdError::AttributeInvalid(format!(
                "count for undeclared alias {:?}",
                alias
            )));
        }
        self.counts.insert(alias.to_string(), count);
        Ok(())
    }

    /// Whether any attribute was declared.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Render the extension parameters under the given extension alias.
    pub fn to_params(&self, ext_alias: &str) -> Vec<(String, String)> {
        let mut params = vec![
            (format!("openid.ns.{}", ext_alias), AX_NS.to_string()),
            (
                format!("openid.{}.mode", ext_alias),
                "fetch_request".to_string(),
            ),
        ];

        let mut required = Vec::new();
        let mut if_available = Vec::new();
        for attr in &self.attributes {
            params.push((
                format!("openid.{}.type.{}", ext_alias, attr.alias),
                attr.type_uri.clone(),
            ));
            if attr.required {
                required.push(attr.alias.as_str());
            } else {
                if_available.push(attr.alias.as_str());
            }
        }
        if !required.is_empty() {
            params.push((
                format!("openid.{}.required", ext_alias),
                required.join(","),
            ));
        }
        if !if_available.is_empty() {
            params.push((
                format!("openid.{}.if_available", ext_alias),
                if_available.join(","),
            ));
        }
        for (alias, count) in &self.counts {
            params.push((
                format!("openid.{}.count.{}", ext_alias, alias),
                count.to_string(),
            ));
        }
        params
    }
}

/// Attribute values returned by the provider, keyed by type URI.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    values: HashMap<String, Vec<String>>,
}

impl FetchResponse {
    /// Parse the AX extension out of a positive assertion.
    ///
    /// Returns an empty response when the assertion carries no AX
    /// extension at all.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        // Locate the extension alias the provider declared for AX.
        let ext_alias = params.iter().find_map(|(key, value)| {
            let alias = key.strip_prefix("openid.ns.")?;
            (value == AX_NS).then(|| alias.to_string())
        });
        let Some(ext) = ext_alias else {
            return Self::default();
        };

        if let Some(mode) = params.get(&format!("openid.{}.mode", ext)) {
            if mode != "fetch_response" {
                return Self::default();
            }
        }

        let type_prefix = format!("openid.{}.type.", ext);
        let mut values: HashMap<String, Vec<String>> = HashMap::new();

        for (key, type_uri) in params {
            let Some(attr_alias) = key.strip_prefix(&type_prefix) else {
                continue;
            };

            let count_key = format!("openid.{}.count.{}", ext, attr_alias);
            let attr_values: Vec<String> = if let Some(count) = params.get(&count_key) {
                let count: u32 = count.parse().unwrap_or(0);
                (1..=count)
                    .filter_map(|i| {
                        params
                            .get(&format!("openid.{}.value.{}.{}", ext, attr_alias, i))
                            .cloned()
                    })
                    .collect()
            } else {
                params
                    .get(&format!("openid.{}.value.{}", ext, attr_alias))
                    .cloned()
                    .into_iter()
                    .collect()
            };

            values
                .entry(type_uri.clone())
                .or_default()
                .extend(attr_values);
        }

        Self { values }
    }

    /// First value for a type URI, if any.
    pub fn get_single(&self, type_uri: &str) -> Option<&str> {
        self.values
            .get(type_uri)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// All values for a type URI.
    pub fn get_all(&self, type_uri: &str) -> &[String] {
        self.values.get(type_uri).map(|v| v.as_slice()).unwrap_or(&[])
    }
}
