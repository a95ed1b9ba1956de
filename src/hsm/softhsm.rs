//! A file backed software signer.
//!
//! Holds PKCS#8 key pairs in memory and signs through `ring`. Ceremony
//! rehearsals and the test suite run against this implementation; the
//! interface is the same one a PKCS#11 device sits behind in production.

use super::{Hsm, HsmError, KeyClass, KeyHandle, PublicKey};
use crate::base::wire::RsaPublicKey;
use crate::base::SecAlg;
use bytes::Bytes;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair as _, RsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
    RSA_PKCS1_SHA256,
};
use secrecy::{ExposeSecret, SecretBox};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

//------------ SoftHsm -------------------------------------------------------

/// A software stand-in for the hardware signer.
pub struct SoftHsm {
    keys: HashMap<String, SoftKey>,
    rng: SystemRandom,
}

struct SoftKey {
    algorithm: SecAlg,
    pair: SoftKeyPair,
}

enum SoftKeyPair {
    Rsa(RsaKeyPair),
    EcdsaP256(EcdsaKeyPair),
}

impl SoftHsm {
    /// Creates an empty keystore.
    pub fn new() -> Self {
        SoftHsm {
            keys: HashMap::new(),
            rng: SystemRandom::new(),
        }
    }

    /// Loads every key pair found in a directory.
    ///
    /// Files are named `<label>.<algorithm>.pkcs8` with the algorithm
    /// mnemonic in lower case, e.g. `kjqmt7v.rsasha256.pkcs8`.
    pub fn load_dir(path: &Path) -> Result<Self, HsmError> {
        let mut res = Self::new();
        let entries = fs::read_dir(path)
            .map_err(|err| HsmError::Unavailable(err.to_string()))?;
        for entry in entries {
            let entry = entry
                .map_err(|err| HsmError::Unavailable(err.to_string()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".pkcs8") else { continue };
            let Some((label, alg)) = stem.rsplit_once('.') else {
                continue;
            };
            let Ok(algorithm) = alg.parse::<SecAlg>() else {
                return Err(HsmError::Unavailable(format!(
                    "unrecognized algorithm in key file '{}'",
                    name
                )));
            };
            let der = fs::read(entry.path())
                .map_err(|err| HsmError::Unavailable(err.to_string()))?;
            let der = SecretBox::new(Box::new(der));
            res.add_key(label, algorithm, &der)?;
        }
        Ok(res)
    }

    /// Adds a key pair from PKCS#8 DER.
    pub fn add_key(
        &mut self,
        label: &str,
        algorithm: SecAlg,
        pkcs8: &SecretBox<Vec<u8>>,
    ) -> Result<(), HsmError> {
        let pair = match algorithm {
            SecAlg::RsaSha256 => {
                let pair = RsaKeyPair::from_pkcs8(pkcs8.expose_secret())
                    .map_err(|err| {
                        HsmError::Unavailable(format!(
                            "rejected RSA key '{}': {}",
                            label, err
                        ))
                    })?;
                SoftKeyPair::Rsa(pair)
            }
            SecAlg::EcdsaP256Sha256 => {
                let pair = EcdsaKeyPair::from_pkcs8(
                    &ECDSA_P256_SHA256_FIXED_SIGNING,
                    pkcs8.expose_secret(),
                    &self.rng,
                )
                .map_err(|err| {
                    HsmError::Unavailable(format!(
                        "rejected ECDSA key '{}': {}",
                        label, err
                    ))
                })?;
                SoftKeyPair::EcdsaP256(pair)
            }
            other => {
                return Err(HsmError::Unavailable(format!(
                    "no backend for algorithm {}",
                    other
                )))
            }
        };
        self.keys.insert(
            label.to_string(),
            SoftKey { algorithm, pair },
        );
        Ok(())
    }

    /// Generates a fresh ECDSA P-256 pair under the given label.
    pub fn generate_ecdsa_p256(&mut self, label: &str) -> Result<(), HsmError> {
        let document =
            EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &self.rng)
                .map_err(|_| {
                    HsmError::Unavailable("key generation failed".to_string())
                })?;
        let der = SecretBox::new(Box::new(document.as_ref().to_vec()));
        self.add_key(label, SecAlg::EcdsaP256Sha256, &der)
    }

    fn key(&self, handle: &KeyHandle) -> Result<&SoftKey, HsmError> {
        self.keys
            .get(handle.label())
            .ok_or_else(|| HsmError::KeyNotFound(handle.label().to_string()))
    }
}

impl Default for SoftHsm {
    fn default() -> Self {
        Self::new()
    }
}

//--- Hsm

impl Hsm for SoftHsm {
    fn find_keys(&self, label: &str) -> Result<Vec<KeyHandle>, HsmError> {
        if !self.keys.contains_key(label) {
            return Ok(Vec::new());
        }
        Ok(vec![
            KeyHandle::new(label.to_string(), KeyClass::Public),
            KeyHandle::new(label.to_string(), KeyClass::Private),
        ])
    }

    fn public_key(&self, handle: &KeyHandle) -> Result<PublicKey, HsmError> {
        let key = self.key(handle)?;
        match &key.pair {
            SoftKeyPair::Rsa(pair) => {
                let components: ring::rsa::PublicKeyComponents<Vec<u8>> =
                    pair.public().into();
                let mut exponent: u64 = 0;
                for &byte in &components.e {
                    if exponent > u64::MAX >> 8 {
                        return Err(HsmError::Unavailable(
                            "RSA exponent too large".to_string(),
                        ));
                    }
                    exponent = exponent << 8 | u64::from(byte);
                }
                Ok(PublicKey::Rsa {
                    algorithm: key.algorithm,
                    key: RsaPublicKey::new(
                        exponent,
                        Bytes::from(components.n),
                    ),
                })
            }
            SoftKeyPair::EcdsaP256(pair) => {
                // ring hands out the 0x04-prefixed uncompressed point;
                // DNSKEY wants the bare x || y.
                let point = pair.public_key().as_ref();
                Ok(PublicKey::Ecdsa {
                    algorithm: key.algorithm,
                    point: Bytes::copy_from_slice(&point[1..]),
                })
            }
        }
    }

    fn sign(
        &self,
        handle: &KeyHandle,
        algorithm: SecAlg,
        message: &[u8],
    ) -> Result<Bytes, HsmError> {
        if handle.class() != KeyClass::Private {
            return Err(HsmError::KeyNotFound(handle.label().to_string()));
        }
        let key = self.key(handle)?;
        if key.algorithm != algorithm {
            return Err(HsmError::AlgorithmMismatch {
                requested: algorithm,
                actual: key.algorithm,
            });
        }
        match &key.pair {
            SoftKeyPair::Rsa(pair) => {
                let mut buf = vec![0u8; pair.public().modulus_len()];
                pair.sign(&RSA_PKCS1_SHA256, &self.rng, message, &mut buf)
                    .map_err(|_| HsmError::SigningFailed)?;
                Ok(buf.into())
            }
            SoftKeyPair::EcdsaP256(pair) => {
                let sig = pair
                    .sign(&self.rng, message)
                    .map_err(|_| HsmError::SigningFailed)?;
                Ok(Bytes::copy_from_slice(sig.as_ref()))
            }
        }
    }
}

//============ Test ==========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::time::Timestamp;
    use crate::base::wire;
    use crate::base::{Key, FLAG_SEP, FLAG_ZONE, PROTOCOL_DNSSEC};
    use crate::validate;

    #[test]
    fn generated_key_signs_and_verifies() {
        let mut hsm = SoftHsm::new();
        hsm.generate_ecdsa_p256("test").unwrap();

        let handles = hsm.find_keys("test").unwrap();
        assert_eq!(handles.len(), 2);
        let public = &handles[0];
        let private = &handles[1];
        assert_eq!(public.class(), KeyClass::Public);
        assert_eq!(private.class(), KeyClass::Private);

        let pubkey = hsm.public_key(public).unwrap();
        assert_eq!(pubkey.algorithm(), SecAlg::EcdsaP256Sha256);
        assert_eq!(pubkey.bits(), 256);

        let key = Key::new(
            "k1".to_string(),
            0,
            3600,
            FLAG_ZONE | FLAG_SEP,
            PROTOCOL_DNSSEC,
            SecAlg::EcdsaP256Sha256,
            pubkey.to_dnskey(),
        );
        let key = Key::new(
            "k1".to_string(),
            wire::key_tag(&key),
            3600,
            FLAG_ZONE | FLAG_SEP,
            PROTOCOL_DNSSEC,
            SecAlg::EcdsaP256Sha256,
            pubkey.to_dnskey(),
        );

        let sig = crate::base::Signature::new(
            "k1".to_string(),
            3600,
            SecAlg::EcdsaP256Sha256,
            0,
            3600,
            Timestamp::from_unix(1_000_000),
            Timestamp::from_unix(2_000_000),
            key.key_tag(),
            ".".to_string(),
            Bytes::new(),
        );
        let signed_data =
            wire::signed_data(&sig, std::slice::from_ref(&key)).unwrap();
        let raw = hsm
            .sign(private, SecAlg::EcdsaP256Sha256, &signed_data)
            .unwrap();
        assert_eq!(raw.len(), 64);

        assert_eq!(
            validate::verify_raw(&key, &signed_data, &raw),
            Ok(())
        );
    }

    #[test]
    fn sign_requires_private_handle_and_matching_algorithm() {
        let mut hsm = SoftHsm::new();
        hsm.generate_ecdsa_p256("test").unwrap();
        let handles = hsm.find_keys("test").unwrap();

        assert!(matches!(
            hsm.sign(&handles[0], SecAlg::EcdsaP256Sha256, b"msg"),
            Err(HsmError::KeyNotFound(_))
        ));
        assert!(matches!(
            hsm.sign(&handles[1], SecAlg::RsaSha256, b"msg"),
            Err(HsmError::AlgorithmMismatch { .. })
        ));

        let missing = KeyHandle::new("other".to_string(), KeyClass::Private);
        assert!(matches!(
            hsm.sign(&missing, SecAlg::EcdsaP256Sha256, b"msg"),
            Err(HsmError::KeyNotFound(_))
        ));
    }

    #[test]
    fn absent_label_yields_no_handles() {
        let hsm = SoftHsm::new();
        assert!(hsm.find_keys("nothing").unwrap().is_empty());
    }
}
