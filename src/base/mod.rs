//! The document model.
//!
//! The types in this module are the canonical in-memory form of Key Signing
//! Requests and Signed Key Responses. They carry exactly the information
//! present in the interchange format; everything derived (canonical RRset
//! bytes, key tags, digests) lives in [`wire`].
//!
//! Documents are immutable once constructed: the XML codec and the ceremony
//! build them through the `new` constructors and only ever read them
//! afterwards.

pub mod alg;
pub mod time;
pub mod wire;

use ::time::Duration;
use bytes::Bytes;
use std::fmt;

pub use self::alg::SecAlg;
pub use self::time::Timestamp;

//------------ DNSKEY flag bits ----------------------------------------------

/// The ZONE flag. Set on every DNSSEC key.
pub const FLAG_ZONE: u16 = 0x0100;

/// The Secure Entry Point flag. Set on KSKs.
pub const FLAG_SEP: u16 = 0x0001;

/// The REVOKE flag per RFC 5011.
pub const FLAG_REVOKE: u16 = 0x0080;

/// The DNSKEY protocol field. Fixed by RFC 4034, section 2.1.2.
pub const PROTOCOL_DNSSEC: u8 = 3;

//------------ Key -----------------------------------------------------------

/// A DNSKEY record within a bundle.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Key {
    /// Document-scoped identifier, referenced by signatures.
    key_identifier: String,
    key_tag: u16,
    ttl: u32,
    flags: u16,
    protocol: u8,
    algorithm: SecAlg,
    public_key: Bytes,
}

impl Key {
    pub fn new(
        key_identifier: String,
        key_tag: u16,
        ttl: u32,
        flags: u16,
        protocol: u8,
        algorithm: SecAlg,
        public_key: Bytes,
    ) -> Self {
        Key {
            key_identifier,
            key_tag,
            ttl,
            flags,
            protocol,
            algorithm,
            public_key,
        }
    }

    pub fn key_identifier(&self) -> &str {
        &self.key_identifier
    }

    pub fn key_tag(&self) -> u16 {
        self.key_tag
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn algorithm(&self) -> SecAlg {
        self.algorithm
    }

    pub fn public_key(&self) -> &Bytes {
        &self.public_key
    }

    /// Returns whether the flags are exactly those of a ZSK.
    pub fn is_zsk(&self) -> bool {
        self.flags == FLAG_ZONE
    }

    /// Returns whether the REVOKE bit is set.
    pub fn is_revoked(&self) -> bool {
        self.flags & FLAG_REVOKE != 0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} tag={} flags={} alg={}",
            self.key_identifier, self.key_tag, self.flags, self.algorithm
        )
    }
}

//------------ Signature -----------------------------------------------------

/// An RRSIG over the DNSKEY RRset of a bundle.
///
/// The type covered is always DNSKEY; the parser rejects anything else, so
/// it is not carried here.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Signature {
    /// Identifier of the key this signature was made with.
    ///
    /// Must resolve to a [`Key`] in the same bundle.
    key_identifier: String,
    ttl: u32,
    algorithm: SecAlg,
    labels: u8,
    original_ttl: u32,
    inception: Timestamp,
    expiration: Timestamp,
    key_tag: u16,
    signers_name: String,
    signature: Bytes,
}

impl Signature {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key_identifier: String,
        ttl: u32,
        algorithm: SecAlg,
        labels: u8,
        original_ttl: u32,
        inception: Timestamp,
        expiration: Timestamp,
        key_tag: u16,
        signers_name: String,
        signature: Bytes,
    ) -> Self {
        Signature {
            key_identifier,
            ttl,
            algorithm,
            labels,
            original_ttl,
            inception,
            expiration,
            key_tag,
            signers_name,
            signature,
        }
    }

    pub fn key_identifier(&self) -> &str {
        &self.key_identifier
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn algorithm(&self) -> SecAlg {
        self.algorithm
    }

    pub fn labels(&self) -> u8 {
        self.labels
    }

    pub fn original_ttl(&self) -> u32 {
        self.original_ttl
    }

    pub fn inception(&self) -> Timestamp {
        self.inception
    }

    pub fn expiration(&self) -> Timestamp {
        self.expiration
    }

    pub fn key_tag(&self) -> u16 {
        self.key_tag
    }

    pub fn signers_name(&self) -> &str {
        &self.signers_name
    }

    pub fn signature(&self) -> &Bytes {
        &self.signature
    }
}

//------------ Bundle --------------------------------------------------------

/// A time slot within a cycle, with the DNSKEY RRset valid in that window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bundle {
    id: String,
    inception: Timestamp,
    expiration: Timestamp,
    keys: Vec<Key>,
    signatures: Vec<Signature>,

    /// Key identifier hints naming the KSKs asked to sign this bundle.
    ///
    /// Only present in request bundles.
    signers: Vec<String>,
}

impl Bundle {
    pub fn new(
        id: String,
        inception: Timestamp,
        expiration: Timestamp,
        keys: Vec<Key>,
        signatures: Vec<Signature>,
        signers: Vec<String>,
    ) -> Self {
        Bundle {
            id,
            inception,
            expiration,
            keys,
            signatures,
            signers,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn inception(&self) -> Timestamp {
        self.inception
    }

    pub fn expiration(&self) -> Timestamp {
        self.expiration
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn signers(&self) -> &[String] {
        &self.signers
    }

    /// Looks up a key by its document-scoped identifier.
    pub fn key_by_identifier(&self, key_identifier: &str) -> Option<&Key> {
        self.keys
            .iter()
            .find(|key| key.key_identifier() == key_identifier)
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut tags: Vec<_> =
            self.keys.iter().map(|key| key.key_tag()).collect();
        tags.sort_unstable();
        write!(
            f,
            "{} {} -> {} keys {:?} sigs {}",
            self.id,
            self.inception,
            self.expiration,
            tags,
            self.signatures.len()
        )
    }
}

//------------ AlgorithmPolicy -----------------------------------------------

/// A single `SignatureAlgorithm` entry of a signature policy.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum AlgorithmPolicy {
    Rsa {
        algorithm: SecAlg,
        bits: u16,
        exponent: u64,
    },
    Dsa {
        algorithm: SecAlg,
        bits: u16,
    },
    Ecdsa {
        algorithm: SecAlg,
        bits: u16,
    },
}

impl AlgorithmPolicy {
    pub fn algorithm(&self) -> SecAlg {
        match *self {
            AlgorithmPolicy::Rsa { algorithm, .. } => algorithm,
            AlgorithmPolicy::Dsa { algorithm, .. } => algorithm,
            AlgorithmPolicy::Ecdsa { algorithm, .. } => algorithm,
        }
    }

    pub fn bits(&self) -> u16 {
        match *self {
            AlgorithmPolicy::Rsa { bits, .. } => bits,
            AlgorithmPolicy::Dsa { bits, .. } => bits,
            AlgorithmPolicy::Ecdsa { bits, .. } => bits,
        }
    }
}

//------------ SignaturePolicy -----------------------------------------------

/// The signature policy a ZSK or KSK operator declares in a document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignaturePolicy {
    publish_safety: Duration,
    retire_safety: Duration,
    max_signature_validity: Duration,
    min_signature_validity: Duration,
    max_validity_overlap: Duration,
    min_validity_overlap: Duration,
    algorithms: Vec<AlgorithmPolicy>,
}

impl SignaturePolicy {
    pub fn new(
        publish_safety: Duration,
        retire_safety: Duration,
        max_signature_validity: Duration,
        min_signature_validity: Duration,
        max_validity_overlap: Duration,
        min_validity_overlap: Duration,
        algorithms: Vec<AlgorithmPolicy>,
    ) -> Self {
        SignaturePolicy {
            publish_safety,
            retire_safety,
            max_signature_validity,
            min_signature_validity,
            max_validity_overlap,
            min_validity_overlap,
            algorithms,
        }
    }

    pub fn publish_safety(&self) -> Duration {
        self.publish_safety
    }

    pub fn retire_safety(&self) -> Duration {
        self.retire_safety
    }

    pub fn max_signature_validity(&self) -> Duration {
        self.max_signature_validity
    }

    pub fn min_signature_validity(&self) -> Duration {
        self.min_signature_validity
    }

    pub fn max_validity_overlap(&self) -> Duration {
        self.max_validity_overlap
    }

    pub fn min_validity_overlap(&self) -> Duration {
        self.min_validity_overlap
    }

    pub fn algorithms(&self) -> &[AlgorithmPolicy] {
        &self.algorithms
    }
}

//------------ Request -------------------------------------------------------

/// A parsed Key Signing Request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    id: String,
    serial: u32,
    domain: String,
    timestamp: Option<Timestamp>,
    zsk_policy: SignaturePolicy,
    bundles: Vec<Bundle>,
}

impl Request {
    pub fn new(
        id: String,
        serial: u32,
        domain: String,
        timestamp: Option<Timestamp>,
        zsk_policy: SignaturePolicy,
        bundles: Vec<Bundle>,
    ) -> Self {
        Request {
            id,
            serial,
            domain,
            timestamp,
            zsk_policy,
            bundles,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn zsk_policy(&self) -> &SignaturePolicy {
        &self.zsk_policy
    }

    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }
}

//------------ Response ------------------------------------------------------

/// A parsed or freshly produced Signed Key Response.
///
/// The ZSK policy echoes the one from the request the response was made
/// for; the KSK policy is the KSK operator's own.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    id: String,
    serial: u32,
    domain: String,
    timestamp: Option<Timestamp>,
    ksk_policy: SignaturePolicy,
    zsk_policy: SignaturePolicy,
    bundles: Vec<Bundle>,
}

impl Response {
    pub fn new(
        id: String,
        serial: u32,
        domain: String,
        timestamp: Option<Timestamp>,
        ksk_policy: SignaturePolicy,
        zsk_policy: SignaturePolicy,
        bundles: Vec<Bundle>,
    ) -> Self {
        Response {
            id,
            serial,
            domain,
            timestamp,
            ksk_policy,
            zsk_policy,
            bundles,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn ksk_policy(&self) -> &SignaturePolicy {
        &self.ksk_policy
    }

    pub fn zsk_policy(&self) -> &SignaturePolicy {
        &self.zsk_policy
    }

    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }

    /// The last bundle, carrying the keys the next request must chain from.
    pub fn last_bundle(&self) -> Option<&Bundle> {
        self.bundles.last()
    }
}
