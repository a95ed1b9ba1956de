//! The signer capability.
//!
//! The ceremony reaches private KSKs only through the [`Hsm`] trait:
//! enumerate handles by label, fetch public key material, sign a message.
//! The trait makes no policy decisions; everything above it decides which
//! keys sign what. A PKCS#11 device, a KMIP keystore and the bundled
//! [`SoftHsm`] are all the same thing from the ceremony's point of view.

pub mod softhsm;

use crate::base::wire::RsaPublicKey;
use crate::base::SecAlg;
use bytes::Bytes;
use std::fmt;

pub use self::softhsm::SoftHsm;

//------------ Hsm -----------------------------------------------------------

/// Access to keys held in a hardware security module.
pub trait Hsm {
    /// Returns the handles stored under a label.
    ///
    /// A present key pair yields two handles, one public and one private.
    /// An absent label yields an empty vector, not an error.
    fn find_keys(&self, label: &str) -> Result<Vec<KeyHandle>, HsmError>;

    /// Returns the public key material behind a handle.
    fn public_key(&self, handle: &KeyHandle) -> Result<PublicKey, HsmError>;

    /// Signs a message with the private key behind a handle.
    ///
    /// For RSA the signature is PKCS#1 v1.5 with the hash the algorithm
    /// number prescribes. For ECDSA P-256 it is the fixed-width
    /// `r || s` concatenation, 64 octets.
    fn sign(
        &self,
        handle: &KeyHandle,
        algorithm: SecAlg,
        message: &[u8],
    ) -> Result<Bytes, HsmError>;
}

impl<T: Hsm + ?Sized> Hsm for &T {
    fn find_keys(&self, label: &str) -> Result<Vec<KeyHandle>, HsmError> {
        (*self).find_keys(label)
    }

    fn public_key(&self, handle: &KeyHandle) -> Result<PublicKey, HsmError> {
        (*self).public_key(handle)
    }

    fn sign(
        &self,
        handle: &KeyHandle,
        algorithm: SecAlg,
        message: &[u8],
    ) -> Result<Bytes, HsmError> {
        (*self).sign(handle, algorithm, message)
    }
}

//------------ KeyHandle -----------------------------------------------------

/// A reference to one object in the HSM.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct KeyHandle {
    label: String,
    class: KeyClass,
}

impl KeyHandle {
    pub fn new(label: String, class: KeyClass) -> Self {
        KeyHandle { label, class }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn class(&self) -> KeyClass {
        self.class
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.class)
    }
}

//------------ KeyClass ------------------------------------------------------

/// Whether a handle references the public or the private half of a pair.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyClass {
    Public,
    Private,
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            KeyClass::Public => f.write_str("public"),
            KeyClass::Private => f.write_str("private"),
        }
    }
}

//------------ PublicKey -----------------------------------------------------

/// Public key material retrieved from the HSM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublicKey {
    Rsa {
        algorithm: SecAlg,
        key: RsaPublicKey,
    },
    Ecdsa {
        algorithm: SecAlg,
        /// The uncompressed point without the 0x04 marker, `x || y`.
        point: Bytes,
    },
}

impl PublicKey {
    pub fn algorithm(&self) -> SecAlg {
        match *self {
            PublicKey::Rsa { algorithm, .. } => algorithm,
            PublicKey::Ecdsa { algorithm, .. } => algorithm,
        }
    }

    /// The key size in bits.
    pub fn bits(&self) -> u16 {
        match self {
            PublicKey::Rsa { key, .. } => key.bits(),
            PublicKey::Ecdsa { point, .. } => {
                crate::base::wire::ecdsa_point_bits(point)
            }
        }
    }

    /// The DNSKEY public key field for this key.
    pub fn to_dnskey(&self) -> Bytes {
        match self {
            PublicKey::Rsa { key, .. } => key.encode(),
            PublicKey::Ecdsa { point, .. } => point.clone(),
        }
    }
}

//============ Error Types ===================================================

//------------ HsmError ------------------------------------------------------

/// An error talking to the HSM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HsmError {
    /// The module cannot be reached or refused the session.
    Unavailable(String),

    /// No object exists for the given handle.
    KeyNotFound(String),

    /// The key behind the handle uses a different algorithm.
    AlgorithmMismatch {
        requested: SecAlg,
        actual: SecAlg,
    },

    /// The signing operation itself failed.
    SigningFailed,
}

//--- Display and Error

impl fmt::Display for HsmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HsmError::Unavailable(reason) => {
                write!(f, "HSM unavailable: {}", reason)
            }
            HsmError::KeyNotFound(label) => {
                write!(f, "no key for handle '{}'", label)
            }
            HsmError::AlgorithmMismatch { requested, actual } => {
                write!(
                    f,
                    "algorithm mismatch: requested {}, key is {}",
                    requested, actual
                )
            }
            HsmError::SigningFailed => f.write_str("signing failed"),
        }
    }
}

impl std::error::Error for HsmError {}
