//! Chain linkage against the previous response.
//!
//! A request continues the chain its predecessor response ended: the ZSKs
//! of the previous last bundle reappear in the new first bundle, the time
//! windows overlap within the declared bounds, the serial moves forward
//! and no bundle id is reused. Breaking any of these would hand validators
//! a DNSKEY RRset they cannot chain to.

use super::{run_checks, Check, PolicyViolation, RequestPolicy, Violations};
use crate::base::time::fmt_duration;
use crate::base::{Request, Response};
use std::collections::HashSet;

//------------ Context -------------------------------------------------------

/// What the chain checks look at.
pub struct ChainContext<'a> {
    pub request: &'a Request,
    pub previous: &'a Response,
    pub policy: &'a RequestPolicy,
}

//------------ Entry Point ---------------------------------------------------

/// Runs the chain checks of a request against the previous response.
pub fn validate_chain(
    request: &Request,
    previous: &Response,
    policy: &RequestPolicy,
) -> Violations {
    let ctx = ChainContext {
        request,
        previous,
        policy,
    };
    let checks = [
        Check {
            name: "chain_serial",
            enabled: true,
            run: check_serial,
        },
        Check {
            name: "check_chain_keys",
            enabled: ctx.policy.check_chain_keys,
            run: check_chain_keys,
        },
        Check {
            name: "check_chain_overlap",
            enabled: ctx.policy.check_chain_overlap,
            run: check_chain_overlap,
        },
    ];
    run_checks(&checks, &ctx)
}

//------------ Checks --------------------------------------------------------

fn check_serial(ctx: &ChainContext, violations: &mut Violations) {
    if ctx.request.serial() <= ctx.previous.serial() {
        violations.report(PolicyViolation::new(
            "chain_serial",
            format!(
                "request serial {} does not advance past the previous \
                 response serial {}",
                ctx.request.serial(),
                ctx.previous.serial()
            ),
        ));
    }

    let previous_ids: HashSet<&str> = ctx
        .previous
        .bundles()
        .iter()
        .map(|bundle| bundle.id())
        .collect();
    for bundle in ctx.request.bundles() {
        if previous_ids.contains(bundle.id()) {
            violations.report(
                PolicyViolation::new(
                    "chain_serial",
                    "bundle id already used in the previous response"
                        .to_string(),
                )
                .in_bundle(bundle.id()),
            );
        }
    }
}

fn check_chain_keys(ctx: &ChainContext, violations: &mut Violations) {
    let Some(last) = ctx.previous.last_bundle() else { return };
    let Some(first) = ctx.request.bundles().first() else { return };

    for key in last.keys() {
        if !key.is_zsk() {
            // KSKs in the previous response are the signer's own; only
            // the ZSK set must carry over.
            continue;
        }
        let carried = first
            .keys()
            .iter()
            .any(|candidate| candidate.public_key() == key.public_key());
        if !carried {
            violations.report(
                PolicyViolation::new(
                    "check_chain_keys",
                    format!(
                        "ZSK tag {} from the previous response's last \
                         bundle {} is missing from the first bundle",
                        key.key_tag(),
                        last.id()
                    ),
                )
                .in_bundle(first.id())
                .for_key(key.key_identifier()),
            );
        }
    }
}

fn check_chain_overlap(ctx: &ChainContext, violations: &mut Violations) {
    let Some(last) = ctx.previous.last_bundle() else { return };
    let Some(first) = ctx.request.bundles().first() else { return };
    let policy = ctx.request.zsk_policy();

    if first.inception() >= last.expiration() {
        violations.report(
            PolicyViolation::new(
                "check_chain_overlap",
                format!(
                    "first bundle incepts {} at or after the previous \
                     response expires {}",
                    first.inception(),
                    last.expiration()
                ),
            )
            .in_bundle(first.id()),
        );
        return;
    }
    let overlap = last.expiration() - first.inception();
    if overlap < policy.min_validity_overlap()
        || overlap > policy.max_validity_overlap()
    {
        violations.report(
            PolicyViolation::new(
                "check_chain_overlap",
                format!(
                    "overlap {} with the previous response outside [{}, {}]",
                    fmt_duration(overlap),
                    fmt_duration(policy.min_validity_overlap()),
                    fmt_duration(policy.max_validity_overlap()),
                ),
            )
            .in_bundle(first.id()),
        );
    }
}

//============ Test ==========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::time::{parse_duration, Timestamp};
    use crate::base::{
        AlgorithmPolicy, Bundle, Key, SecAlg, SignaturePolicy, Signature,
        FLAG_SEP, FLAG_ZONE, PROTOCOL_DNSSEC,
    };
    use bytes::Bytes;
    use time::Duration;

    const NOW: Timestamp = Timestamp::from_unix(1_514_764_800);

    fn zsk_policy() -> SignaturePolicy {
        SignaturePolicy::new(
            parse_duration("P10D").unwrap(),
            parse_duration("P10D").unwrap(),
            parse_duration("P21D").unwrap(),
            parse_duration("P21D").unwrap(),
            parse_duration("P16D").unwrap(),
            parse_duration("P9D").unwrap(),
            vec![AlgorithmPolicy::Ecdsa {
                algorithm: SecAlg::EcdsaP256Sha256,
                bits: 256,
            }],
        )
    }

    fn key(id: &str, flags: u16, fill: u8) -> Key {
        Key::new(
            id.to_string(),
            1,
            172800,
            flags,
            PROTOCOL_DNSSEC,
            SecAlg::EcdsaP256Sha256,
            Bytes::from(vec![fill; 64]),
        )
    }

    fn sig(key: &Key, inception: Timestamp, expiration: Timestamp) -> Signature {
        Signature::new(
            key.key_identifier().to_string(),
            172800,
            key.algorithm(),
            0,
            172800,
            inception,
            expiration,
            key.key_tag(),
            ".".to_string(),
            Bytes::from_static(b"sig"),
        )
    }

    fn bundle(id: &str, start_day: i64, keys: Vec<Key>) -> Bundle {
        let inception =
            NOW.checked_add(Duration::days(start_day)).unwrap();
        let expiration =
            inception.checked_add(Duration::days(21)).unwrap();
        let signatures = keys
            .iter()
            .map(|key| sig(key, inception, expiration))
            .collect();
        Bundle::new(
            id.to_string(),
            inception,
            expiration,
            keys,
            signatures,
            Vec::new(),
        )
    }

    fn previous() -> Response {
        // The last bundle ends 21 days after day -10.
        let bundles = vec![
            bundle("prev-1", -20, vec![key("z0", FLAG_ZONE, 0xAA)]),
            bundle(
                "prev-2",
                -10,
                vec![
                    key("z0", FLAG_ZONE, 0xAA),
                    key("k0", FLAG_ZONE | FLAG_SEP, 0xBB),
                ],
            ),
        ];
        Response::new(
            "resp-1".to_string(),
            7,
            ".".to_string(),
            None,
            zsk_policy(),
            zsk_policy(),
            bundles,
        )
    }

    fn request_with(first_key: Key, serial: u32) -> Request {
        Request::new(
            "req-2".to_string(),
            serial,
            ".".to_string(),
            None,
            zsk_policy(),
            vec![
                bundle("next-1", 0, vec![first_key.clone()]),
                bundle("next-2", 10, vec![first_key]),
            ],
        )
    }

    #[test]
    fn intact_chain_passes() {
        // Same ZSK bytes as the previous last bundle, overlap 11 days.
        let request = request_with(key("z9", FLAG_ZONE, 0xAA), 8);
        let violations =
            validate_chain(&request, &previous(), &RequestPolicy::default());
        assert!(
            violations.is_empty(),
            "unexpected violations: {:?}",
            violations.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn changed_zsk_bytes_break_the_chain() {
        let request = request_with(key("z9", FLAG_ZONE, 0xCC), 8);
        let violations =
            validate_chain(&request, &previous(), &RequestPolicy::default());
        assert!(violations
            .iter()
            .any(|violation| violation.check() == "check_chain_keys"));
    }

    #[test]
    fn ksk_of_previous_response_need_not_carry_over() {
        // The previous last bundle carries a KSK (flags 257); its absence
        // from the request is fine.
        let request = request_with(key("z9", FLAG_ZONE, 0xAA), 8);
        let violations =
            validate_chain(&request, &previous(), &RequestPolicy::default());
        assert!(violations.is_empty());
    }

    #[test]
    fn serial_must_advance() {
        let request = request_with(key("z9", FLAG_ZONE, 0xAA), 7);
        let violations =
            validate_chain(&request, &previous(), &RequestPolicy::default());
        assert!(violations
            .iter()
            .any(|violation| violation.check() == "chain_serial"));
    }

    #[test]
    fn bundle_ids_must_be_fresh() {
        let request = Request::new(
            "req-2".to_string(),
            8,
            ".".to_string(),
            None,
            zsk_policy(),
            vec![bundle("prev-2", 0, vec![key("z9", FLAG_ZONE, 0xAA)])],
        );
        let violations =
            validate_chain(&request, &previous(), &RequestPolicy::default());
        assert!(violations
            .iter()
            .any(|violation| violation.check() == "chain_serial"));
    }

    #[test]
    fn missing_overlap_is_reported() {
        let request = Request::new(
            "req-2".to_string(),
            8,
            ".".to_string(),
            None,
            zsk_policy(),
            // Day 20 is past the previous expiration (day 11).
            vec![bundle("next-1", 20, vec![key("z9", FLAG_ZONE, 0xAA)])],
        );
        let violations =
            validate_chain(&request, &previous(), &RequestPolicy::default());
        assert!(violations
            .iter()
            .any(|violation| violation.check() == "check_chain_overlap"));
    }

    #[test]
    fn disabled_chain_checks_stay_silent() {
        let policy = RequestPolicy {
            check_chain_keys: false,
            check_chain_overlap: false,
            ..RequestPolicy::default()
        };
        let request = request_with(key("z9", FLAG_ZONE, 0xCC), 8);
        let violations = validate_chain(&request, &previous(), &policy);
        assert!(violations.is_empty());
    }
}
