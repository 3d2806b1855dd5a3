//! Signatures and public keys.
//!
//! The engine never verifies signatures itself; that happens before sections
//! reach it. What it does care about is the validity window every signature
//! carries, because cached material must not outlive the signatures that
//! vouch for it, and the public keys conveyed by delegation assertions,
//! because later sections of the delegated zone will be verified against
//! them.

use bytes::Bytes;
use std::fmt;

//------------ KeySpace ------------------------------------------------------

/// The key space a signature was made in.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum KeySpace {
    /// The regular RAINS key space.
    #[default]
    Rains,
}

impl fmt::Display for KeySpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeySpace::Rains => f.write_str("rains"),
        }
    }
}

//------------ SignatureAlgorithm --------------------------------------------

/// The algorithm a signature or public key belongs to.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
pub enum SignatureAlgorithm {
    /// Ed25519 as specified in RFC 8032.
    #[default]
    Ed25519,

    /// Ed448 as specified in RFC 8032.
    Ed448,

    /// ECDSA over P-256.
    EcdsaP256,

    /// ECDSA over P-384.
    EcdsaP384,
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignatureAlgorithm::Ed25519 => f.write_str("ed25519"),
            SignatureAlgorithm::Ed448 => f.write_str("ed448"),
            SignatureAlgorithm::EcdsaP256 => f.write_str("ecdsa-p256"),
            SignatureAlgorithm::EcdsaP384 => f.write_str("ecdsa-p384"),
        }
    }
}

//------------ Signature -----------------------------------------------------

/// A signature over a section.
///
/// The validity window is in unix seconds. A section's own validity is
/// derived from the windows of all its signatures, see
/// [`Signed`][crate::base::section::Signed].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Signature {
    /// The key space the signing key lives in.
    pub key_space: KeySpace,

    /// The signing algorithm.
    pub algorithm: SignatureAlgorithm,

    /// The phase of the signing key within its rollover schedule.
    pub key_phase: u8,

    /// First second at which the signature is valid.
    pub valid_since: i64,

    /// Last second at which the signature is valid.
    pub valid_until: i64,

    /// The raw signature data.
    pub data: Bytes,
}

impl Signature {
    /// Returns whether the signature is valid at `now`.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.valid_since <= now && now < self.valid_until
    }
}

//------------ PublicKey -----------------------------------------------------

/// A public key conveyed by a delegation object.
///
/// When a delegation assertion is cached, the key inherits the assertion's
/// validity window so the zone key cache can expire it together with the
/// assertion that delivered it.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PublicKey {
    /// The key space the key belongs to.
    pub key_space: KeySpace,

    /// The algorithm the key is used with.
    pub algorithm: SignatureAlgorithm,

    /// The phase of the key within its rollover schedule.
    pub key_phase: u8,

    /// First second at which the key may be used.
    pub valid_since: i64,

    /// Last second at which the key may be used.
    pub valid_until: i64,

    /// The raw key material.
    pub key: Bytes,
}

impl PublicKey {
    /// Returns a copy of the key restamped with the given validity window.
    pub fn with_validity(&self, valid_since: i64, valid_until: i64) -> Self {
        PublicKey {
            valid_since,
            valid_until,
            ..self.clone()
        }
    }
}
