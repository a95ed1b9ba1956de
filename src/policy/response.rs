//! Checks on a response.
//!
//! The same machinery validates an inbound previous response and the
//! response a ceremony just produced: bundle ids are unique, the bundle
//! count matches policy, and every signature verifies over the canonical
//! DNSKEY RRset of its bundle.

use super::request::check_bundle_signatures;
use super::{run_checks, Check, PolicyViolation, ResponsePolicy, Violations};
use crate::base::Response;
use std::collections::HashSet;

//------------ Context -------------------------------------------------------

/// What the response checks look at.
pub struct ResponseContext<'a> {
    pub response: &'a Response,
    pub policy: &'a ResponsePolicy,
}

//------------ Entry Point ---------------------------------------------------

/// Runs every enabled response check and returns the full violation set.
pub fn validate_response(
    response: &Response,
    policy: &ResponsePolicy,
) -> Violations {
    let ctx = ResponseContext { response, policy };
    let checks = [
        Check {
            name: "bundle_unique_ids",
            enabled: true,
            run: check_unique_ids,
        },
        Check {
            name: "num_bundles",
            enabled: true,
            run: check_num_bundles,
        },
        Check {
            name: "validate_signatures",
            enabled: ctx.policy.validate_signatures,
            run: check_signatures,
        },
    ];
    run_checks(&checks, &ctx)
}

//------------ Checks --------------------------------------------------------

fn check_unique_ids(ctx: &ResponseContext, violations: &mut Violations) {
    let mut seen = HashSet::new();
    for bundle in ctx.response.bundles() {
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

fn check_num_bundles(ctx: &ResponseContext, violations: &mut Violations) {
    let num = ctx.response.bundles().len();
    if num != ctx.policy.num_bundles {
        violations.report(PolicyViolation::new(
            "num_bundles",
            format!(
                "wrong number of bundles in response ({}, expected {})",
                num, ctx.policy.num_bundles
            ),
        ));
    }
}

fn check_signatures(ctx: &ResponseContext, violations: &mut Violations) {
    for bundle in ctx.response.bundles() {
        check_bundle_signatures(bundle, "validate_signatures", violations);
    }
}

//============ Test ==========================================================
