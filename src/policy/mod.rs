//! The policy engine.
//!
//! Verification is a composable set of named checks. Each check is a plain
//! function from a context to violations; the engine is an ordered list of
//! enabled checks. Structural checks run before cryptographic ones, and
//! every enabled check runs even after a failure, so one pass reports the
//! complete violation set. Disabling a check is possible but never silent:
//! the engine logs a warning for every check skipped by policy.

pub mod chain;
pub mod request;
pub mod response;

use crate::base::time::{de_duration, parse_duration};
use serde::Deserialize;
use std::fmt;
use time::Duration;
use tracing::{info, warn};

pub use self::chain::validate_chain;
pub use self::request::validate_request;
pub use self::response::validate_response;

//------------ RequestPolicy -------------------------------------------------

/// The KSK operator's knobs for validating a request.
///
/// Every recognized option is an explicit field; unknown keys in a
/// configuration file are rejected. The defaults are the operational
/// profile for the root zone.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RequestPolicy {
    // Header checks.
    pub acceptable_domains: Vec<String>,

    // Bundle checks.
    pub num_bundles: usize,
    pub num_keys_per_bundle: Vec<usize>,
    pub num_different_keys_in_all_bundles: usize,
    pub validate_signatures: bool,
    pub keys_match_zsk_policy: bool,
    pub rsa_exponent_match_zsk_policy: bool,
    pub enable_unsupported_ecdsa: bool,

    // Timing checks.
    pub check_cycle_length: bool,
    #[serde(deserialize_with = "de_duration")]
    pub min_cycle_inception_length: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub max_cycle_inception_length: Duration,
    pub check_bundle_intervals: bool,
    #[serde(deserialize_with = "de_duration")]
    pub min_bundle_interval: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub max_bundle_interval: Duration,
    pub check_bundle_overlap: bool,

    // Policy parameter checks.
    pub signature_algorithms_match_zsk_policy: bool,
    pub signature_validity_match_zsk_policy: bool,
    pub check_keys_match_ksk_operator_policy: bool,
    pub approved_algorithms: Vec<crate::base::SecAlg>,
    pub rsa_approved_exponents: Vec<u64>,
    pub rsa_approved_key_sizes: Vec<u16>,
    pub signature_check_expire_horizon: bool,
    pub signature_horizon_days: u32,

    /// TTL expected on emitted records; 0 means "use the KSK policy TTL".
    pub dns_ttl: u32,

    // Chain checks against the previous response.
    pub check_chain_keys: bool,
    pub check_chain_overlap: bool,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        RequestPolicy {
            acceptable_domains: vec![".".to_string()],
            num_bundles: 9,
            num_keys_per_bundle: vec![2, 1, 1, 1, 1, 1, 1, 1, 2],
            num_different_keys_in_all_bundles: 3,
            validate_signatures: true,
            keys_match_zsk_policy: true,
            rsa_exponent_match_zsk_policy: true,
            enable_unsupported_ecdsa: false,
            check_cycle_length: true,
            min_cycle_inception_length: parse_duration("P79D").unwrap(),
            max_cycle_inception_length: parse_duration("P81D").unwrap(),
            check_bundle_intervals: true,
            min_bundle_interval: parse_duration("P9D").unwrap(),
            max_bundle_interval: parse_duration("P11D").unwrap(),
            check_bundle_overlap: true,
            signature_algorithms_match_zsk_policy: true,
            signature_validity_match_zsk_policy: true,
            check_keys_match_ksk_operator_policy: true,
            approved_algorithms: vec![crate::base::SecAlg::RsaSha256],
            rsa_approved_exponents: vec![65537],
            rsa_approved_key_sizes: vec![2048],
            signature_check_expire_horizon: true,
            signature_horizon_days: 180,
            dns_ttl: 0,
            check_chain_keys: true,
            check_chain_overlap: true,
        }
    }
}

//------------ ResponsePolicy ------------------------------------------------

/// Validation knobs for responses, inbound or freshly produced.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ResponsePolicy {
    pub num_bundles: usize,
    pub validate_signatures: bool,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        ResponsePolicy {
            num_bundles: 9,
            validate_signatures: true,
        }
    }
}

//------------ PolicyViolation -----------------------------------------------

/// One failed invariant, named after the check that found it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PolicyViolation {
    check: &'static str,
    message: String,
    bundle_id: Option<String>,
    key_identifier: Option<String>,
}

impl PolicyViolation {
    pub fn new(check: &'static str, message: String) -> Self {
        PolicyViolation {
            check,
            message,
            bundle_id: None,
            key_identifier: None,
        }
    }

    /// Attaches the offending bundle.
    pub fn in_bundle(mut self, bundle_id: &str) -> Self {
        self.bundle_id = Some(bundle_id.to_string());
        self
    }

    /// Attaches the offending key.
    pub fn for_key(mut self, key_identifier: &str) -> Self {
        self.key_identifier = Some(key_identifier.to_string());
        self
    }

    pub fn check(&self) -> &'static str {
        self.check
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn bundle_id(&self) -> Option<&str> {
        self.bundle_id.as_deref()
    }

    pub fn key_identifier(&self) -> Option<&str> {
        self.key_identifier.as_deref()
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.check, self.message)?;
        if let Some(bundle_id) = &self.bundle_id {
            write!(f, " (bundle {})", bundle_id)?;
        }
        if let Some(key_identifier) = &self.key_identifier {
            write!(f, " (key {})", key_identifier)?;
        }
        Ok(())
    }
}

//------------ Violations ----------------------------------------------------

/// The violations collected by one validation pass.
#[derive(Debug, Default)]
pub struct Violations {
    list: Vec<PolicyViolation>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, violation: PolicyViolation) {
        self.list.push(violation);
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyViolation> {
        self.list.iter()
    }

    pub fn into_vec(self) -> Vec<PolicyViolation> {
        self.list
    }

    /// Extends with the violations of another pass.
    pub fn append(&mut self, other: Violations) {
        self.list.extend(other.list);
    }
}

//------------ Check Running -------------------------------------------------

/// One named check over a context.
pub(crate) struct Check<Ctx> {
    pub name: &'static str,
    pub enabled: bool,
    pub run: fn(&Ctx, &mut Violations),
}

/// Runs every enabled check, collecting all violations.
pub(crate) fn run_checks<Ctx>(
    checks: &[Check<Ctx>],
    ctx: &Ctx,
) -> Violations {
    let mut violations = Violations::new();
    for check in checks {
        if !check.enabled {
            warn!("{}: disabled by policy", check.name);
            continue;
        }
        let before = violations.len();
        (check.run)(ctx, &mut violations);
        if violations.len() == before {
            info!("{}: ok", check.name);
        } else {
            for violation in violations.iter().skip(before) {
                warn!("{}", violation);
            }
        }
    }
    violations
}

//============ Test ==========================================================
