//! Configuration.
//!
//! The whole configuration is one YAML document with explicitly typed
//! sections. Every recognized option is a field with a default; unknown
//! keys anywhere are rejected loudly so that a typo cannot silently turn
//! a check off. The SHA-256 checksum of the loaded file is logged so that
//! ceremony transcripts pin down exactly which configuration ran.

use crate::base::time::{de_duration, parse_duration};
use crate::base::{AlgorithmPolicy, SignaturePolicy};
use crate::inventory::KskKey;
use crate::policy::{RequestPolicy, ResponsePolicy};
use crate::schema::{self, Schema, SchemaAction, SchemaError};
use crate::utils::base16;
use ring::digest;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use time::Duration;
use tracing::info;

//------------ Config --------------------------------------------------------

/// The complete configuration of the signer.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub filenames: Filenames,
    pub ksk_policy: KskPolicy,
    pub request_policy: RequestPolicy,
    pub response_policy: ResponsePolicy,

    /// The KSK inventory, keyed by identifier.
    pub keys: BTreeMap<String, KskKey>,

    /// Operator-defined schemas, overriding or extending the built-ins.
    pub schemas: BTreeMap<String, SchemaConfig>,
}

impl Config {
    /// Parses a configuration from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml)
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads a configuration file, logging its checksum.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let checksum = digest::digest(&digest::SHA256, &data);
        info!(
            "loaded configuration from {} sha256 {}",
            path.display(),
            base16::encode_string(&checksum.as_ref())
        );
        let yaml = String::from_utf8(data).map_err(|_| ConfigError::Io {
            path: path.to_path_buf(),
            reason: "not valid UTF-8".to_string(),
        })?;
        Self::from_yaml(&yaml)
    }

    /// The request policy with `dns_ttl` resolved.
    ///
    /// A `dns_ttl` of zero means "whatever TTL the KSK policy signs
    /// with".
    pub fn request_policy(&self) -> RequestPolicy {
        let mut policy = self.request_policy.clone();
        if policy.dns_ttl == 0 {
            policy.dns_ttl = self.ksk_policy.ttl;
        }
        policy
    }

    /// Resolves a schema by name, sized to the configured cycle length.
    ///
    /// Operator-defined schemas shadow the built-in ones.
    pub fn schema(&self, name: &str) -> Result<Schema, SchemaError> {
        let slots = self.request_policy.num_bundles;
        match self.schemas.get(name) {
            Some(config) => config.to_schema(name, slots),
            None => schema::builtin(name, slots),
        }
    }
}

//------------ Filenames -----------------------------------------------------

/// Default file locations, overridable from the command line.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Filenames {
    pub previous_skr: Option<PathBuf>,
    pub input_ksr: Option<PathBuf>,
    pub output_skr: Option<PathBuf>,
}

//------------ KskPolicy -----------------------------------------------------

/// The KSK operator's own signing policy.
///
/// The durations end up in the KSK half of the response policy; the TTL
/// and signer name go onto every record the ceremony emits.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct KskPolicy {
    pub ttl: u32,
    pub signers_name: String,
    #[serde(deserialize_with = "de_duration")]
    pub publish_safety: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub retire_safety: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub max_signature_validity: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub min_signature_validity: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub max_validity_overlap: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub min_validity_overlap: Duration,
}

impl KskPolicy {
    /// Builds the wire policy record with the given algorithm entries.
    pub fn signature_policy(
        &self,
        algorithms: Vec<AlgorithmPolicy>,
    ) -> SignaturePolicy {
        SignaturePolicy::new(
            self.publish_safety,
            self.retire_safety,
            self.max_signature_validity,
            self.min_signature_validity,
            self.max_validity_overlap,
            self.min_validity_overlap,
            algorithms,
        )
    }
}

impl Default for KskPolicy {
    fn default() -> Self {
        KskPolicy {
            ttl: 172800,
            signers_name: ".".to_string(),
            publish_safety: parse_duration("P10D").unwrap(),
            retire_safety: parse_duration("P10D").unwrap(),
            max_signature_validity: parse_duration("P21D").unwrap(),
            min_signature_validity: parse_duration("P21D").unwrap(),
            max_validity_overlap: parse_duration("P16D").unwrap(),
            min_validity_overlap: parse_duration("P9D").unwrap(),
        }
    }
}

//------------ SchemaConfig --------------------------------------------------

/// An operator-defined schema: one action per 1-based slot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct SchemaConfig(BTreeMap<usize, SlotConfig>);

impl SchemaConfig {
    /// Builds and validates the schema for a cycle of `slots` bundles.
    fn to_schema(
        &self,
        name: &str,
        slots: usize,
    ) -> Result<Schema, SchemaError> {
        if self.0.len() != slots
            || (1..=slots).any(|slot| !self.0.contains_key(&slot))
        {
            return Err(SchemaError::WrongSlotCount {
                schema: name.to_string(),
                expected: slots,
                actual: self.0.len(),
            });
        }
        let actions = (1..=slots)
            .map(|slot| {
                let config = &self.0[&slot];
                SchemaAction::new(
                    config.publish.to_vec(),
                    config.sign.to_vec(),
                    config.revoke.to_vec(),
                )
            })
            .collect();
        Schema::new(name.to_string(), actions)
    }
}

/// The action of one slot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SlotConfig {
    publish: KeyList,
    sign: KeyList,
    #[serde(default)]
    revoke: KeyList,
}

/// One key name or a list of key names.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum KeyList {
    One(String),
    Many(Vec<String>),
}

impl KeyList {
    fn to_vec(&self) -> Vec<String> {
        match self {
            KeyList::One(name) => vec![name.clone()],
            KeyList::Many(names) => names.clone(),
        }
    }
}

impl Default for KeyList {
    fn default() -> Self {
        KeyList::Many(Vec::new())
    }
}

//============ Error Types ===================================================

//------------ ConfigError ---------------------------------------------------

/// The configuration cannot be used.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// The file cannot be read.
    Io { path: PathBuf, reason: String },

    /// The YAML does not deserialize into the recognized options.
    Parse(String),
}

//--- Display and Error

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io { path, reason } => {
                write!(f, "cannot read {}: {}", path.display(), reason)
            }
            ConfigError::Parse(reason) => reason.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

//============ Test ==========================================================
