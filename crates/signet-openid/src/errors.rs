//! Consumer error types.

use thiserror::Error;

/// Errors produced by the OpenID consumer
#[derive(Debug, Error)]
pub enum OpenIdError {
    /// Provider configuration is unusable (malformed URL, bad scheme)
    #[error("Invalid provider configuration: {0}")]
    ConfigInvalid(String),

    /// The associate exchange with the provider failed
    #[error("Association failed: {0}")]
    AssociationFailed(String),

    /// A direct or indirect message could not be parsed or built
    #[error("Invalid OpenID message: {0}")]
    MessageInvalid(String),

    /// An attribute-exchange declaration was rejected
    #[error("Invalid attribute declaration: {0}")]
    AttributeInvalid(String),

    /// The positive assertion failed a verification check
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Signature did not match the association MAC key
    #[error("Response signature mismatch")]
    SignatureMismatch,

    /// Response nonce was already accepted (replay attack detected)
    #[error("Response nonce already seen: {0}")]
    NonceReplayed(String),

    /// Response nonce is malformed or outside the clock-skew window
    #[error("Invalid response nonce: {0}")]
    NonceInvalid(String),

    /// Stored association has expired
    #[error("Association expired: {0}")]
    AssociationExpired(String),

    /// The user cancelled authentication at the provider
    #[error("Authentication cancelled by user")]
    Cancelled,

    /// Transport-level failure talking to the provider
    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for consumer operations
pub type Result<T> = std::result::Result<T, OpenIdError>;
