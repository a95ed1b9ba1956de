//! The configured KSK inventory.
//!
//! The configuration names every KSK a schema may reference: its HSM
//! label, algorithm, expected key tag and DS digest, and the window it is
//! valid in. Before any ceremony work, the inventory is reconciled with
//! what the HSM actually holds: the public key is fetched and key tag and
//! DS digest are recomputed and compared against the configured values.
//! Any disagreement aborts the ceremony: a wrong inventory entry means
//! signing with a key nobody verified.

use crate::base::time::Timestamp;
use crate::base::wire;
use crate::base::{Key, SecAlg, FLAG_SEP, FLAG_ZONE, PROTOCOL_DNSSEC};
use crate::hsm::{Hsm, HsmError, KeyClass, KeyHandle, PublicKey};
use crate::utils::base16;
use bytes::Bytes;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

//------------ KskKey --------------------------------------------------------

/// One entry of the `keys` section of the configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct KskKey {
    #[serde(default)]
    pub description: String,

    /// The label the key pair is stored under in the HSM.
    pub label: String,

    /// The expected key tag, computed over the unrevoked DNSKEY RDATA.
    pub key_tag: u16,

    pub algorithm: SecAlg,

    #[serde(default)]
    pub rsa_size: Option<u16>,

    #[serde(default)]
    pub rsa_exponent: Option<u64>,

    pub valid_from: Timestamp,

    #[serde(default)]
    pub valid_until: Option<Timestamp>,

    /// The expected SHA-256 DS digest in hex.
    #[serde(default)]
    pub ds_sha256: Option<String>,
}

impl KskKey {
    /// Whether the validity window contains `now`.
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        if now < self.valid_from {
            return false;
        }
        match self.valid_until {
            Some(until) => now <= until,
            None => true,
        }
    }

    /// Whether the key expired before `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        matches!(self.valid_until, Some(until) if until < now)
    }
}

//------------ InventoryKey --------------------------------------------------

/// A configured KSK with its HSM handles, checked against the HSM.
#[derive(Debug)]
pub struct InventoryKey {
    identifier: String,
    config: KskKey,

    /// The DNSKEY public key field derived from the HSM material.
    dnskey: Bytes,

    private: KeyHandle,
}

impl InventoryKey {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn config(&self) -> &KskKey {
        &self.config
    }

    pub fn algorithm(&self) -> SecAlg {
        self.config.algorithm
    }

    pub fn dnskey(&self) -> &Bytes {
        &self.dnskey
    }

    pub fn private_handle(&self) -> &KeyHandle {
        &self.private
    }

    /// Builds the key record this KSK publishes as.
    ///
    /// The key tag is computed over the flagged RDATA: setting the REVOKE
    /// bit changes the tag, so a revoked key publishes under a different
    /// tag than the configured one.
    pub fn make_key(
        &self,
        key_identifier: String,
        ttl: u32,
        revoked: bool,
    ) -> Key {
        let mut flags = FLAG_ZONE | FLAG_SEP;
        if revoked {
            flags |= crate::base::FLAG_REVOKE;
        }
        let key = Key::new(
            key_identifier,
            0,
            ttl,
            flags,
            PROTOCOL_DNSSEC,
            self.config.algorithm,
            self.dnskey.clone(),
        );
        let tag = wire::key_tag(&key);
        Key::new(
            key.key_identifier().to_string(),
            tag,
            ttl,
            flags,
            PROTOCOL_DNSSEC,
            self.config.algorithm,
            self.dnskey.clone(),
        )
    }
}

//------------ Inventory -----------------------------------------------------

/// The reconciled inventory a ceremony runs against.
#[derive(Debug)]
pub struct Inventory {
    keys: BTreeMap<String, InventoryKey>,
}

impl Inventory {
    pub fn get(&self, identifier: &str) -> Option<&InventoryKey> {
        self.keys.get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.keys.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InventoryKey> {
        self.keys.values()
    }
}

//------------ reconcile -----------------------------------------------------

/// Reconciles the configured inventory with the HSM.
///
/// Every configured key whose validity window contains `now` is located
/// and checked. Keys listed in `required` (the identifiers the active
/// schema references) are reconciled even when already expired, since a
/// schema may still publish them revoked. Required keys must exist in the
/// configuration and must not lie in the future.
pub fn reconcile<H: Hsm>(
    keys: &BTreeMap<String, KskKey>,
    required: &BTreeSet<String>,
    hsm: &H,
    now: Timestamp,
    owner: &str,
) -> Result<Inventory, InventoryError> {
    for identifier in required {
        match keys.get(identifier) {
            None => {
                return Err(InventoryError::UnknownKey(identifier.clone()))
            }
            Some(key) if now < key.valid_from => {
                return Err(InventoryError::NotYetValid {
                    identifier: identifier.clone(),
                })
            }
            Some(_) => {}
        }
    }

    let mut res = BTreeMap::new();
    for (identifier, config) in keys {
        if !config.is_valid_at(now) && !required.contains(identifier) {
            debug!(
                "skipping {} ({}): outside validity window",
                identifier, config.label
            );
            continue;
        }
        let key = reconcile_key(identifier, config, hsm, owner)?;
        info!(
            "inventory: {} ({}) tag {} verified against HSM",
            identifier, config.label, config.key_tag
        );
        res.insert(identifier.clone(), key);
    }
    Ok(Inventory { keys: res })
}

fn reconcile_key<H: Hsm>(
    identifier: &str,
    config: &KskKey,
    hsm: &H,
    owner: &str,
) -> Result<InventoryKey, InventoryError> {
    let handles = hsm.find_keys(&config.label)?;
    if handles.is_empty() {
        return Err(InventoryError::KeyNotFound {
            identifier: identifier.to_string(),
            label: config.label.clone(),
        });
    }
    let public = handles
        .iter()
        .find(|handle| handle.class() == KeyClass::Public);
    let private = handles
        .iter()
        .find(|handle| handle.class() == KeyClass::Private);
    let (Some(public), Some(private)) = (public, private) else {
        return Err(InventoryError::IncompletePair {
            identifier: identifier.to_string(),
            label: config.label.clone(),
        });
    };

    let material = hsm.public_key(public)?;
    if material.algorithm() != config.algorithm {
        return Err(InventoryError::Mismatch {
            identifier: identifier.to_string(),
            field: "algorithm",
            expected: config.algorithm.to_string(),
            actual: material.algorithm().to_string(),
        });
    }
    if let PublicKey::Rsa { key, .. } = &material {
        if let Some(size) = config.rsa_size {
            if key.bits() != size {
                return Err(InventoryError::Mismatch {
                    identifier: identifier.to_string(),
                    field: "rsa_size",
                    expected: size.to_string(),
                    actual: key.bits().to_string(),
                });
            }
        }
        if let Some(exponent) = config.rsa_exponent {
            if key.exponent() != exponent {
                return Err(InventoryError::Mismatch {
                    identifier: identifier.to_string(),
                    field: "rsa_exponent",
                    expected: exponent.to_string(),
                    actual: key.exponent().to_string(),
                });
            }
        }
    }

    let dnskey = material.to_dnskey();
    let key = Key::new(
        identifier.to_string(),
        config.key_tag,
        0,
        FLAG_ZONE | FLAG_SEP,
        PROTOCOL_DNSSEC,
        config.algorithm,
        dnskey.clone(),
    );

    let tag = wire::key_tag(&key);
    if tag != config.key_tag {
        return Err(InventoryError::Mismatch {
            identifier: identifier.to_string(),
            field: "key_tag",
            expected: config.key_tag.to_string(),
            actual: tag.to_string(),
        });
    }

    if let Some(expected) = &config.ds_sha256 {
        let expected_digest = base16::decode(expected).map_err(|_| {
            InventoryError::BadDigest {
                identifier: identifier.to_string(),
            }
        })?;
        let digest = wire::ds_digest_sha256(owner, &key)
            .map_err(|_| InventoryError::BadDigest {
                identifier: identifier.to_string(),
            })?;
        if digest != expected_digest {
            return Err(InventoryError::Mismatch {
                identifier: identifier.to_string(),
                field: "ds_sha256",
                expected: expected.to_lowercase(),
                actual: base16::encode_string(&digest),
            });
        }
    }

    Ok(InventoryKey {
        identifier: identifier.to_string(),
        config: config.clone(),
        dnskey,
        private: private.clone(),
    })
}

//============ Error Types ===================================================

//------------ InventoryError ------------------------------------------------

/// The configured inventory and the HSM disagree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InventoryError {
    /// A schema references a key the configuration does not define.
    UnknownKey(String),

    /// A schema references a key whose validity starts in the future.
    NotYetValid { identifier: String },

    /// The HSM has nothing under the configured label.
    KeyNotFound { identifier: String, label: String },

    /// The HSM lacks one half of the key pair.
    IncompletePair { identifier: String, label: String },

    /// A configured value does not match what the HSM material yields.
    Mismatch {
        identifier: String,
        field: &'static str,
        expected: String,
        actual: String,
    },

    /// A DS digest could not be computed or decoded.
    BadDigest { identifier: String },

    /// Talking to the HSM failed.
    Hsm(HsmError),
}

//--- From

impl From<HsmError> for InventoryError {
    fn from(err: HsmError) -> Self {
        InventoryError::Hsm(err)
    }
}

//--- Display and Error

impl fmt::Display for InventoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InventoryError::UnknownKey(identifier) => {
                write!(f, "key '{}' is not in the inventory", identifier)
            }
            InventoryError::NotYetValid { identifier } => {
                write!(f, "key '{}' is not yet valid", identifier)
            }
            InventoryError::KeyNotFound { identifier, label } => {
                write!(
                    f,
                    "key '{}': nothing in the HSM under label '{}'",
                    identifier, label
                )
            }
            InventoryError::IncompletePair { identifier, label } => {
                write!(
                    f,
                    "key '{}': incomplete key pair under label '{}'",
                    identifier, label
                )
            }
            InventoryError::Mismatch {
                identifier,
                field,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "key '{}': configured {} is {}, HSM material yields {}",
                    identifier, field, expected, actual
                )
            }
            InventoryError::BadDigest { identifier } => {
                write!(f, "key '{}': bad DS digest", identifier)
            }
            InventoryError::Hsm(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for InventoryError {}

//============ Test ==========================================================
