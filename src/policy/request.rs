//! Checks on a request by itself.
//!
//! Everything here can be decided from the request document, the operator
//! policy and "now". Checks involving the previous response live in
//! [`chain`][super::chain].

use super::{run_checks, Check, PolicyViolation, RequestPolicy, Violations};
use crate::base::time::{fmt_duration, Timestamp};
use crate::base::wire::{self, RsaPublicKey};
use crate::base::{
    AlgorithmPolicy, Bundle, Request, SignaturePolicy, FLAG_ZONE,
};
use crate::validate;
use std::collections::{HashMap, HashSet};
use time::Duration;
use tracing::warn;

//------------ Context -------------------------------------------------------

/// What the request checks look at.
pub struct RequestContext<'a> {
    pub request: &'a Request,
    pub policy: &'a RequestPolicy,
    pub now: Timestamp,
}

//------------ Entry Point ---------------------------------------------------

/// Runs every enabled request check and returns the full violation set.
pub fn validate_request(
    request: &Request,
    policy: &RequestPolicy,
    now: Timestamp,
) -> Violations {
    let ctx = RequestContext {
        request,
        policy,
        now,
    };
    // Structural checks first, cryptographic verification last.
    let checks = [
        Check {
            name: "acceptable_domains",
            enabled: true,
            run: check_domain,
        },
        Check {
            name: "bundle_unique_ids",
            enabled: true,
            run: check_unique_ids,
        },
        Check {
            name: "bundle_windows",
            enabled: true,
            run: check_bundle_windows,
        },
        Check {
            name: "num_bundles",
            enabled: true,
            run: check_num_bundles,
        },
        Check {
            name: "num_keys_per_bundle",
            enabled: true,
            run: check_num_keys_per_bundle,
        },
        Check {
            name: "num_different_keys_in_all_bundles",
            enabled: true,
            run: check_num_different_keys,
        },
        Check {
            name: "keys_match_zsk_policy",
            enabled: ctx.policy.keys_match_zsk_policy,
            run: check_keys_match_zsk_policy,
        },
        Check {
            name: "approved_algorithms",
            enabled: ctx.policy.check_keys_match_ksk_operator_policy,
            run: check_approved_algorithms,
        },
        Check {
            name: "signature_algorithms_match_zsk_policy",
            enabled: ctx.policy.signature_algorithms_match_zsk_policy,
            run: check_signature_algorithms,
        },
        Check {
            name: "signature_validity_match_zsk_policy",
            enabled: ctx.policy.signature_validity_match_zsk_policy,
            run: check_signature_validity,
        },
        Check {
            name: "check_bundle_overlap",
            enabled: ctx.policy.check_bundle_overlap,
            run: check_bundle_overlap,
        },
        Check {
            name: "check_bundle_intervals",
            enabled: ctx.policy.check_bundle_intervals,
            run: check_bundle_intervals,
        },
        Check {
            name: "check_cycle_length",
            enabled: ctx.policy.check_cycle_length,
            run: check_cycle_length,
        },
        Check {
            name: "signature_check_expire_horizon",
            enabled: ctx.policy.signature_check_expire_horizon,
            run: check_expire_horizon,
        },
        Check {
            name: "validate_signatures",
            enabled: ctx.policy.validate_signatures,
            run: check_proof_of_possession,
        },
    ];
    run_checks(&checks, &ctx)
}

//------------ Header Checks -------------------------------------------------

fn check_domain(ctx: &RequestContext, violations: &mut Violations) {
    let domain = ctx.request.domain();
    if !ctx
        .policy
        .acceptable_domains
        .iter()
        .any(|acceptable| acceptable == domain)
    {
        violations.report(PolicyViolation::new(
            "acceptable_domains",
            format!(
                "request domain '{}' not in acceptable domains {:?}",
                domain, ctx.policy.acceptable_domains
            ),
        ));
    }
}

//------------ Bundle Structure Checks ---------------------------------------

fn check_unique_ids(ctx: &RequestContext, violations: &mut Violations) {
    let mut seen = HashSet::new();
    for bundle in ctx.request.bundles() {
        if !seen.insert(bundle.id()) {
            violations.report(
                PolicyViolation::new(
                    "bundle_unique_ids",
                    format!("more than one bundle with id {}", bundle.id()),
                )
                .in_bundle(bundle.id()),
            );
        }
    }
}

fn check_bundle_windows(ctx: &RequestContext, violations: &mut Violations) {
    for bundle in ctx.request.bundles() {
        if bundle.expiration() <= bundle.inception() {
            violations.report(
                PolicyViolation::new(
                    "bundle_windows",
                    format!(
                        "bundle expires {} at or before its inception {}",
                        bundle.expiration(),
                        bundle.inception()
                    ),
                )
                .in_bundle(bundle.id()),
            );
        }
    }
    for pair in ctx.request.bundles().windows(2) {
        if pair[1].inception() < pair[0].inception() {
            violations.report(
                PolicyViolation::new(
                    "bundle_windows",
                    "bundles are not ordered by inception".to_string(),
                )
                .in_bundle(pair[1].id()),
            );
        }
    }
}

fn check_num_bundles(ctx: &RequestContext, violations: &mut Violations) {
    let num = ctx.request.bundles().len();
    if num != ctx.policy.num_bundles {
        violations.report(PolicyViolation::new(
            "num_bundles",
            format!(
                "wrong number of bundles in request ({}, expected {})",
                num, ctx.policy.num_bundles
            ),
        ));
    }
}

fn check_num_keys_per_bundle(
    ctx: &RequestContext,
    violations: &mut Violations,
) {
    let expected = &ctx.policy.num_keys_per_bundle;
    if expected.len() != ctx.request.bundles().len() {
        violations.report(PolicyViolation::new(
            "num_keys_per_bundle",
            format!(
                "policy lists {} slots, request has {} bundles",
                expected.len(),
                ctx.request.bundles().len()
            ),
        ));
    }
    for (bundle, &count) in ctx.request.bundles().iter().zip(expected) {
        if bundle.keys().len() != count {
            violations.report(
                PolicyViolation::new(
                    "num_keys_per_bundle",
                    format!(
                        "bundle has {} keys, expected {}",
                        bundle.keys().len(),
                        count
                    ),
                )
                .in_bundle(bundle.id()),
            );
        }
    }
}

fn check_num_different_keys(
    ctx: &RequestContext,
    violations: &mut Violations,
) {
    let mut distinct = HashSet::new();
    for bundle in ctx.request.bundles() {
        for key in bundle.keys() {
            distinct.insert(key.public_key().clone());
        }
    }
    if distinct.len() != ctx.policy.num_different_keys_in_all_bundles {
        violations.report(PolicyViolation::new(
            "num_different_keys_in_all_bundles",
            format!(
                "{} distinct keys across all bundles, expected {}",
                distinct.len(),
                ctx.policy.num_different_keys_in_all_bundles
            ),
        ));
    }
}

//------------ ZSK Policy Checks ---------------------------------------------

fn check_keys_match_zsk_policy(
    ctx: &RequestContext,
    violations: &mut Violations,
) {
    let mut seen: HashMap<&str, &crate::base::Key> = HashMap::new();

    for bundle in ctx.request.bundles() {
        for key in bundle.keys() {
            if let Some(&previous) = seen.get(key.key_identifier()) {
                if previous != key {
                    violations.report(
                        PolicyViolation::new(
                            "keys_match_zsk_policy",
                            format!(
                                "key identifier '{}' matches two different \
                                 keys",
                                key.key_identifier()
                            ),
                        )
                        .in_bundle(bundle.id())
                        .for_key(key.key_identifier()),
                    );
                }
                continue;
            }
            seen.insert(key.key_identifier(), key);

            if key.flags() != FLAG_ZONE {
                violations.report(
                    PolicyViolation::new(
                        "keys_match_zsk_policy",
                        format!(
                            "key has flags {}, only {} acceptable for a ZSK",
                            key.flags(),
                            FLAG_ZONE
                        ),
                    )
                    .in_bundle(bundle.id())
                    .for_key(key.key_identifier()),
                );
            }

            let computed = wire::key_tag(key);
            if computed != key.key_tag() {
                violations.report(
                    PolicyViolation::new(
                        "keys_match_zsk_policy",
                        format!(
                            "key has key tag {}, should be {}",
                            key.key_tag(),
                            computed
                        ),
                    )
                    .in_bundle(bundle.id())
                    .for_key(key.key_identifier()),
                );
            }

            if !key_matches_policy(ctx, key, ctx.request.zsk_policy()) {
                violations.report(
                    PolicyViolation::new(
                        "keys_match_zsk_policy",
                        "key does not match the declared ZSK policy"
                            .to_string(),
                    )
                    .in_bundle(bundle.id())
                    .for_key(key.key_identifier()),
                );
            }
        }
    }
}

fn key_matches_policy(
    ctx: &RequestContext,
    key: &crate::base::Key,
    policy: &SignaturePolicy,
) -> bool {
    if key.algorithm().is_rsa() {
        let Ok(pubkey) = RsaPublicKey::decode(key.public_key()) else {
            return false;
        };
        let matches = |check_exponent: bool| {
            policy.algorithms().iter().any(|entry| match *entry {
                AlgorithmPolicy::Rsa {
                    algorithm,
                    bits,
                    exponent,
                } => {
                    algorithm == key.algorithm()
                        && bits == pubkey.bits()
                        && (!check_exponent || exponent == pubkey.exponent())
                }
                _ => false,
            })
        };
        if matches(true) {
            return true;
        }
        // Historic requests sometimes declare a different exponent than
        // the keys actually carry; the policy can choose to accept that.
        if !ctx.policy.rsa_exponent_match_zsk_policy && matches(false) {
            warn!(
                "key {} exponent {} differs from the declared ZSK policy",
                key.key_identifier(),
                pubkey.exponent()
            );
            return true;
        }
        false
    } else if key.algorithm().is_ecdsa() {
        let bits = wire::ecdsa_point_bits(key.public_key());
        policy.algorithms().iter().any(|entry| match *entry {
            AlgorithmPolicy::Ecdsa { algorithm, bits: policy_bits } => {
                algorithm == key.algorithm() && policy_bits == bits
            }
            _ => false,
        })
    } else {
        false
    }
}

fn check_approved_algorithms(
    ctx: &RequestContext,
    violations: &mut Violations,
) {
    for bundle in ctx.request.bundles() {
        for key in bundle.keys() {
            if !ctx
                .policy
                .approved_algorithms
                .contains(&key.algorithm())
            {
                violations.report(
                    PolicyViolation::new(
                        "approved_algorithms",
                        format!(
                            "algorithm {} is not approved",
                            key.algorithm()
                        ),
                    )
                    .in_bundle(bundle.id())
                    .for_key(key.key_identifier()),
                );
                continue;
            }
            if key.algorithm().is_ecdsa()
                && !ctx.policy.enable_unsupported_ecdsa
            {
                violations.report(
                    PolicyViolation::new(
                        "approved_algorithms",
                        "ECDSA keys require enable_unsupported_ecdsa"
                            .to_string(),
                    )
                    .in_bundle(bundle.id())
                    .for_key(key.key_identifier()),
                );
                continue;
            }
            if key.algorithm().is_rsa() {
                let Ok(pubkey) = RsaPublicKey::decode(key.public_key())
                else {
                    violations.report(
                        PolicyViolation::new(
                            "approved_algorithms",
                            "RSA public key does not decode".to_string(),
                        )
                        .in_bundle(bundle.id())
                        .for_key(key.key_identifier()),
                    );
                    continue;
                };
                if !ctx
                    .policy
                    .rsa_approved_key_sizes
                    .contains(&pubkey.bits())
                {
                    violations.report(
                        PolicyViolation::new(
                            "approved_algorithms",
                            format!(
                                "RSA key size {} is not approved",
                                pubkey.bits()
                            ),
                        )
                        .in_bundle(bundle.id())
                        .for_key(key.key_identifier()),
                    );
                }
                if !ctx
                    .policy
                    .rsa_approved_exponents
                    .contains(&pubkey.exponent())
                {
                    violations.report(
                        PolicyViolation::new(
                            "approved_algorithms",
                            format!(
                                "RSA exponent {} is not approved",
                                pubkey.exponent()
                            ),
                        )
                        .in_bundle(bundle.id())
                        .for_key(key.key_identifier()),
                    );
                }
            }
        }
    }
}

fn check_signature_algorithms(
    ctx: &RequestContext,
    violations: &mut Violations,
) {
    let policy = ctx.request.zsk_policy();
    for bundle in ctx.request.bundles() {
        for sig in bundle.signatures() {
            if let Some(key) = bundle.key_by_identifier(sig.key_identifier())
            {
                if key.algorithm() != sig.algorithm() {
                    violations.report(
                        PolicyViolation::new(
                            "signature_algorithms_match_zsk_policy",
                            format!(
                                "signature algorithm {} differs from key \
                                 algorithm {}",
                                sig.algorithm(),
                                key.algorithm()
                            ),
                        )
                        .in_bundle(bundle.id())
                        .for_key(sig.key_identifier()),
                    );
                }
            }
            if !policy
                .algorithms()
                .iter()
                .any(|entry| entry.algorithm() == sig.algorithm())
            {
                violations.report(
                    PolicyViolation::new(
                        "signature_algorithms_match_zsk_policy",
                        format!(
                            "signature algorithm {} is not in the declared \
                             ZSK policy",
                            sig.algorithm()
                        ),
                    )
                    .in_bundle(bundle.id())
                    .for_key(sig.key_identifier()),
                );
            }
        }
    }
}

fn check_signature_validity(
    ctx: &RequestContext,
    violations: &mut Violations,
) {
    let policy = ctx.request.zsk_policy();
    for bundle in ctx.request.bundles() {
        for sig in bundle.signatures() {
            let validity = sig.expiration() - sig.inception();
            if validity < policy.min_signature_validity()
                || validity > policy.max_signature_validity()
            {
                violations.report(
                    PolicyViolation::new(
                        "signature_validity_match_zsk_policy",
                        format!(
                            "signature validity {} outside [{}, {}]",
                            fmt_duration(validity),
                            fmt_duration(policy.min_signature_validity()),
                            fmt_duration(policy.max_signature_validity()),
                        ),
                    )
                    .in_bundle(bundle.id())
                    .for_key(sig.key_identifier()),
                );
            }
        }
    }
}

//------------ Timing Checks -------------------------------------------------

fn check_bundle_overlap(ctx: &RequestContext, violations: &mut Violations) {
    let policy = ctx.request.zsk_policy();
    for pair in ctx.request.bundles().windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.inception() >= prev.expiration() {
            violations.report(
                PolicyViolation::new(
                    "check_bundle_overlap",
                    format!(
                        "bundle does not overlap its predecessor {}",
                        prev.id()
                    ),
                )
                .in_bundle(next.id()),
            );
            continue;
        }
        let overlap = prev.expiration() - next.inception();
        if overlap < policy.min_validity_overlap()
            || overlap > policy.max_validity_overlap()
        {
            violations.report(
                PolicyViolation::new(
                    "check_bundle_overlap",
                    format!(
                        "overlap {} with {} outside [{}, {}]",
                        fmt_duration(overlap),
                        prev.id(),
                        fmt_duration(policy.min_validity_overlap()),
                        fmt_duration(policy.max_validity_overlap()),
                    ),
                )
                .in_bundle(next.id()),
            );
        }
    }
}

fn check_bundle_intervals(
    ctx: &RequestContext,
    violations: &mut Violations,
) {
    for pair in ctx.request.bundles().windows(2) {
        let interval = pair[1].inception() - pair[0].inception();
        if interval < ctx.policy.min_bundle_interval
            || interval > ctx.policy.max_bundle_interval
        {
            violations.report(
                PolicyViolation::new(
                    "check_bundle_intervals",
                    format!(
                        "inception interval {} after {} outside [{}, {}]",
                        fmt_duration(interval),
                        pair[0].id(),
                        fmt_duration(ctx.policy.min_bundle_interval),
                        fmt_duration(ctx.policy.max_bundle_interval),
                    ),
                )
                .in_bundle(pair[1].id()),
            );
        }
    }
}

fn check_cycle_length(ctx: &RequestContext, violations: &mut Violations) {
    let bundles = ctx.request.bundles();
    let (Some(first), Some(last)) = (bundles.first(), bundles.last()) else {
        return;
    };
    let length = last.inception() - first.inception();
    if length < ctx.policy.min_cycle_inception_length
        || length > ctx.policy.max_cycle_inception_length
    {
        violations.report(PolicyViolation::new(
            "check_cycle_length",
            format!(
                "cycle inception length {} outside [{}, {}]",
                fmt_duration(length),
                fmt_duration(ctx.policy.min_cycle_inception_length),
                fmt_duration(ctx.policy.max_cycle_inception_length),
            ),
        ));
    }
}

fn check_expire_horizon(ctx: &RequestContext, violations: &mut Violations) {
    let horizon = ctx
        .now
        .checked_add(Duration::days(ctx.policy.signature_horizon_days.into()));
    let Some(horizon) = horizon else {
        violations.report(PolicyViolation::new(
            "signature_check_expire_horizon",
            "signature horizon overflows the timestamp range".to_string(),
        ));
        return;
    };
    for bundle in ctx.request.bundles() {
        for sig in bundle.signatures() {
            if sig.expiration() > horizon {
                violations.report(
                    PolicyViolation::new(
                        "signature_check_expire_horizon",
                        format!(
                            "signature expires {}, more than {} days after \
                             now",
                            sig.expiration(),
                            ctx.policy.signature_horizon_days
                        ),
                    )
                    .in_bundle(bundle.id())
                    .for_key(sig.key_identifier()),
                );
            }
        }
    }
}

//------------ Proof of Possession -------------------------------------------

fn check_proof_of_possession(
    ctx: &RequestContext,
    violations: &mut Violations,
) {
    for bundle in ctx.request.bundles() {
        check_bundle_signatures(bundle, "validate_signatures", violations);

        // Every key must prove possession, not just every signature
        // verify.
        for key in bundle.keys() {
            if !bundle
                .signatures()
                .iter()
                .any(|sig| sig.key_identifier() == key.key_identifier())
            {
                violations.report(
                    PolicyViolation::new(
                        "validate_signatures",
                        "key was not used to sign the bundle".to_string(),
                    )
                    .in_bundle(bundle.id())
                    .for_key(key.key_identifier()),
                );
            }
        }
    }
}

/// Verifies every signature of a bundle against the key it references.
///
/// Shared between the request and response validation passes.
pub(crate) fn check_bundle_signatures(
    bundle: &Bundle,
    check: &'static str,
    violations: &mut Violations,
) {
    for sig in bundle.signatures() {
        let Some(key) = bundle.key_by_identifier(sig.key_identifier())
        else {
            violations.report(
                PolicyViolation::new(
                    check,
                    "signature references a key not in the bundle"
                        .to_string(),
                )
                .in_bundle(bundle.id())
                .for_key(sig.key_identifier()),
            );
            continue;
        };
        if key.key_tag() != sig.key_tag() {
            violations.report(
                PolicyViolation::new(
                    check,
                    format!(
                        "signature key tag {} differs from key tag {}",
                        sig.key_tag(),
                        key.key_tag()
                    ),
                )
                .in_bundle(bundle.id())
                .for_key(sig.key_identifier()),
            );
            continue;
        }
        if let Err(err) = validate::verify_signature(key, sig, bundle.keys())
        {
            violations.report(
                PolicyViolation::new(
                    check,
                    format!("signature does not verify: {}", err),
                )
                .in_bundle(bundle.id())
                .for_key(sig.key_identifier()),
            );
        }
    }
}

//============ Test ==========================================================
