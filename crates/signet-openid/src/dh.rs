//! Diffie-Hellman key exchange for association sessions.
//!
//! Implements the DH-SHA256 session type: the relying party sends its
//! public key with the associate request, and the provider returns the
//! MAC key XOR-masked with SHA-256 of the shared secret. Numbers travel
//! base64-encoded in btwoc form (big-endian two's complement).

use crate::errors::*;
use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Default 1536-bit modulus from the OpenID 2.0 specification (appendix B)
pub const DEFAULT_MODULUS_HEX: &str = "DCF93A0B883972EC0E19989AC5A2CE310E1D37717E8D9571BB7623731866E61E\
F75A2E27898B057F9891C2E27A639C3F29B60814581CD3B2CA3986D268370557\
7D45C2E7E52DC81C7A171876E5CEA74B1448BFDFAF18828EFD2519F14E45E382\
6634AF1949E5B535CC829A483B8A76223E5D490A257F05BDFF16F2FB22C583AB";

/// Modulus and generator for a DH session
#[derive(Debug, Clone)]
pub struct DhParams {
    /// Prime modulus p
    pub modulus: BigUint,
    /// Generator g
    pub generator: BigUint,
}

impl Default for DhParams {
    fn default() -> Self {
        Self {
            modulus: BigUint::parse_bytes(DEFAULT_MODULUS_HEX.as_bytes(), 16)
                .expect("default modulus constant parses"),
            generator: BigUint::from(2u32),
        }
    }
}

/// One side's DH key pair
#[derive(Debug, Clone)]
pub struct DhKeyPair {
    params: DhParams,
    private: BigUint,
    /// Public key g^x mod p
    pub public: BigUint,
}

impl DhKeyPair {
    /// Generate a key pair with a fresh 256-bit private exponent.
    pub fn generate(params: DhParams) -> Self {
        let mut buf = [0u8; 32];
        let mut private = BigUint::default();
        while private == BigUint::default() {
            rand::rngs::OsRng.fill_bytes(&mut buf);
            private = BigUint::from_bytes_be(&buf);
        }
        let public = params.generator.modpow(&private, &params.modulus);
        Self {
            params,
            private,
            public,
        }
    }

    /// Compute the shared secret from the other side's public key.
    pub fn shared_secret(&self, other_public: &BigUint) -> BigUint {
        other_public.modpow(&self.private, &self.params.modulus)
    }
}

/// Encode a number in big-endian two's complement (btwoc) form.
///
/// A leading zero byte is prepended when the high bit is set, so the
/// value is never interpreted as negative.
pub fn btwoc(n: &BigUint) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    if bytes[0] & 0x80 != 0 {
        let mut padded = Vec::with_capacity(bytes.len() + 1);
        padded.push(0);
        padded.extend_from_slice(&bytes);
        padded
    } else {
        bytes
    }
}

/// Decode a btwoc-encoded number.
pub fn from_btwoc(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Mask or unmask a MAC key with SHA-256 of the shared secret.
///
/// The operation is symmetric: the provider XORs the MAC key to produce
/// `enc_mac_key`, and the relying party XORs again to recover it.
pub fn xor_secret(shared: &BigUint, key: &[u8]) -> Result<Vec<u8>> {
    let digest = Sha256::digest(btwoc(shared));
    if key.len() != digest.len() {
        return Err(OpenIdError::AssociationFailed(format!(
            "enc_mac_key length {} does not match digest length {}",
            key.len(),
            digest.len()
        )));
    }
    Ok(digest.iter().zip(key).map(|(d, k)| d ^ k).collect())
}
