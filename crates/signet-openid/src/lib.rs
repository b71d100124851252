//! OpenID 2.0 relying-party consumer.
//!
//! This crate implements the relying-party half of the OpenID 2.0
//! authentication protocol at the message level:
//! - Endpoint resolution from a configured provider URL
//! - Association establishment (Diffie-Hellman SHA-256 key exchange)
//! - Attribute Exchange (AX 1.0) fetch requests and responses
//! - Positive-assertion verification (return URL, association handle,
//!   nonce replay window, HMAC-SHA256 signature)
//!
//! # Security Note
//! The association MAC key is a shared secret between relying party and
//! provider. The [`HandshakeContext`] that carries it must be stored
//! server-side (e.g. in a session store) and never sent to the client.
//!
//! Cryptographic primitives come from `hmac`, `sha2` and `num-bigint`;
//! nothing here rolls its own.

#![warn(missing_docs)]

pub mod association;
pub mod ax;
pub mod consumer;
pub mod dh;
pub mod discovery;
pub mod errors;
pub mod message;
pub mod nonce;

// Re-export commonly used items
pub use association::Association;
pub use ax::{FetchRequest, FetchResponse, AX_NS};
pub use consumer::{AuthRequest, Consumer, HandshakeContext, VerifiedResponse};
pub use discovery::DiscoveryInfo;
pub use errors::{OpenIdError, Result};
pub use message::{IDENTIFIER_SELECT, OPENID2_NS};
pub use nonce::NonceVerifier;
