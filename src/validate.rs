//! Signature verification.
//!
//! Verifies the RRSIGs carried in request and response bundles against the
//! DNSKEY RRset of their bundle. Nothing here consults policy: callers
//! decide which signatures must verify and what a failure means.

use crate::base::wire::{self, RsaPublicKey};
use crate::base::{Key, SecAlg, Signature};
use ring::signature;
use std::fmt;

//------------ Verification --------------------------------------------------

/// Verifies a bundle signature against the key it references.
///
/// `keys` is the full DNSKEY RRset of the bundle; the canonical signed
/// data is reconstructed from it and the signature's own RRSIG fields.
pub fn verify_signature(
    key: &Key,
    sig: &Signature,
    keys: &[Key],
) -> Result<(), AlgorithmError> {
    // The caller resolved the key identifier; the algorithms still have
    // to agree.
    if sig.algorithm() != key.algorithm() {
        return Err(AlgorithmError::InvalidData);
    }
    let signed_data =
        wire::signed_data(sig, keys).map_err(|_| AlgorithmError::InvalidData)?;
    verify_raw(key, &signed_data, sig.signature())
}

/// Verifies a raw signature over a message with a key's public key.
pub fn verify_raw(
    key: &Key,
    message: &[u8],
    signature_data: &[u8],
) -> Result<(), AlgorithmError> {
    match SecAlg::from_int(key.algorithm().to_int()) {
        SecAlg::RsaSha1
        | SecAlg::RsaSha1Nsec3Sha1
        | SecAlg::RsaSha256
        | SecAlg::RsaSha512 => {
            let (algorithm, min_bytes) = match key.algorithm() {
                SecAlg::RsaSha1 | SecAlg::RsaSha1Nsec3Sha1 => (
                    &signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY,
                    1024 / 8,
                ),
                SecAlg::RsaSha256 => (
                    &signature::RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY,
                    1024 / 8,
                ),
                SecAlg::RsaSha512 => (
                    &signature::RSA_PKCS1_1024_8192_SHA512_FOR_LEGACY_USE_ONLY,
                    1024 / 8,
                ),
                _ => unreachable!(),
            };

            // The key is in neither PEM nor DER, so use the component
            // verifier directly.
            let (e, n) = RsaPublicKey::split(key.public_key())
                .map_err(|_| AlgorithmError::InvalidData)?;
            if n.len() < min_bytes {
                return Err(AlgorithmError::Unsupported);
            }
            let public_key = signature::RsaPublicKeyComponents { n, e };
            public_key
                .verify(algorithm, message, signature_data)
                .map_err(|_| AlgorithmError::BadSig)
        }
        SecAlg::EcdsaP256Sha256 | SecAlg::EcdsaP384Sha384 => {
            let algorithm = match key.algorithm() {
                SecAlg::EcdsaP256Sha256 => &signature::ECDSA_P256_SHA256_FIXED,
                SecAlg::EcdsaP384Sha384 => &signature::ECDSA_P384_SHA384_FIXED,
                _ => unreachable!(),
            };

            // Add the 0x04 uncompressed point marker the DNSKEY field
            // leaves out.
            let mut point = Vec::with_capacity(key.public_key().len() + 1);
            point.push(0x04);
            point.extend_from_slice(key.public_key());

            signature::UnparsedPublicKey::new(algorithm, &point)
                .verify(message, signature_data)
                .map_err(|_| AlgorithmError::BadSig)
        }
        _ => Err(AlgorithmError::Unsupported),
    }
}

//============ Error Types ===================================================

//------------ AlgorithmError ------------------------------------------------

/// An algorithm error during verification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlgorithmError {
    Unsupported,
    BadSig,
    InvalidData,
}

//--- Display and Error

impl fmt::Display for AlgorithmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AlgorithmError::Unsupported => {
                f.write_str("unsupported algorithm")
            }
            AlgorithmError::BadSig => f.write_str("bad signature"),
            AlgorithmError::InvalidData => f.write_str("invalid data"),
        }
    }
}

impl std::error::Error for AlgorithmError {}

//============ Test ==========================================================
