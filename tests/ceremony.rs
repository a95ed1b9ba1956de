//! End-to-end ceremony scenarios against the software keystore.
//!
//! Each scenario builds a complete nine-bundle request cycle with
//! generated ECDSA P-256 keys, runs the full ceremony and inspects the
//! produced response. A counting signer wrapper asserts that no signing
//! call is ever made once a policy check has failed.

use bytes::Bytes;
use ksrsigner::base::time::{parse_duration, Timestamp};
use ksrsigner::base::wire;
use ksrsigner::base::{
    AlgorithmPolicy, Bundle, Key, Request, SecAlg, Signature,
    SignaturePolicy, FLAG_REVOKE, FLAG_SEP, FLAG_ZONE, PROTOCOL_DNSSEC,
};
use ksrsigner::ceremony::Ceremony;
use ksrsigner::config::Config;
use ksrsigner::error::Error;
use ksrsigner::hsm::{Hsm, HsmError, KeyHandle, PublicKey, SoftHsm};
use ksrsigner::inventory::KskKey;
use ksrsigner::utils::base16;
use ksrsigner::xml;
use std::cell::Cell;
use std::collections::BTreeMap;
use time::Duration;

/// 2018-01-01T00:00:00Z.
const NOW: Timestamp = Timestamp::from_unix(1_514_764_800);

//------------ SpyHsm --------------------------------------------------------

/// Counts signing calls on the way through.
struct SpyHsm<'a> {
    inner: &'a SoftHsm,
    sign_calls: Cell<usize>,
}

impl<'a> SpyHsm<'a> {
    fn new(inner: &'a SoftHsm) -> Self {
        SpyHsm {
            inner,
            sign_calls: Cell::new(0),
        }
    }
}

impl Hsm for SpyHsm<'_> {
    fn find_keys(&self, label: &str) -> Result<Vec<KeyHandle>, HsmError> {
        self.inner.find_keys(label)
    }

    fn public_key(&self, handle: &KeyHandle) -> Result<PublicKey, HsmError> {
        self.inner.public_key(handle)
    }

    fn sign(
        &self,
        handle: &KeyHandle,
        algorithm: SecAlg,
        message: &[u8],
    ) -> Result<Bytes, HsmError> {
        self.sign_calls.set(self.sign_calls.get() + 1);
        self.inner.sign(handle, algorithm, message)
    }
}

//------------ Fixtures ------------------------------------------------------

/// A generated ZSK with its signing handle.
struct Zsk {
    key: Key,
    private: KeyHandle,
}

fn generate_zsk(hsm: &mut SoftHsm, label: &str, identifier: &str) -> Zsk {
    hsm.generate_ecdsa_p256(label).unwrap();
    let handles = hsm.find_keys(label).unwrap();
    let material = hsm.public_key(&handles[0]).unwrap();
    let untagged = Key::new(
        identifier.to_string(),
        0,
        172800,
        FLAG_ZONE,
        PROTOCOL_DNSSEC,
        SecAlg::EcdsaP256Sha256,
        material.to_dnskey(),
    );
    let key = Key::new(
        identifier.to_string(),
        wire::key_tag(&untagged),
        172800,
        FLAG_ZONE,
        PROTOCOL_DNSSEC,
        SecAlg::EcdsaP256Sha256,
        material.to_dnskey(),
    );
    Zsk {
        key,
        private: handles[1].clone(),
    }
}

/// Builds the configuration entry for a generated KSK.
fn configure_ksk(hsm: &mut SoftHsm, label: &str) -> KskKey {
    hsm.generate_ecdsa_p256(label).unwrap();
    let handles = hsm.find_keys(label).unwrap();
    let material = hsm.public_key(&handles[0]).unwrap();
    let key = Key::new(
        label.to_string(),
        0,
        172800,
        FLAG_ZONE | FLAG_SEP,
        PROTOCOL_DNSSEC,
        SecAlg::EcdsaP256Sha256,
        material.to_dnskey(),
    );
    KskKey {
        description: String::new(),
        label: label.to_string(),
        key_tag: wire::key_tag(&key),
        algorithm: SecAlg::EcdsaP256Sha256,
        rsa_size: None,
        rsa_exponent: None,
        valid_from: Timestamp::from_unix(0),
        valid_until: None,
        ds_sha256: Some(base16::encode_string(
            &wire::ds_digest_sha256(".", &key).unwrap(),
        )),
    }
}

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

/// Builds one self-signed request bundle: every key present signs.
fn request_bundle(
    hsm: &SoftHsm,
    id: &str,
    inception: Timestamp,
    zsks: &[&Zsk],
) -> Bundle {
    let expiration = inception.checked_add(Duration::days(21)).unwrap();
    let keys: Vec<Key> = zsks.iter().map(|zsk| zsk.key.clone()).collect();
    let signatures = zsks
        .iter()
        .map(|zsk| {
            let template = Signature::new(
                zsk.key.key_identifier().to_string(),
                172800,
                SecAlg::EcdsaP256Sha256,
                0,
                172800,
                inception,
                expiration,
                zsk.key.key_tag(),
                ".".to_string(),
                Bytes::new(),
            );
            let message = wire::signed_data(&template, &keys).unwrap();
            let raw = hsm
                .sign(&zsk.private, SecAlg::EcdsaP256Sha256, &message)
                .unwrap();
            Signature::new(
                template.key_identifier().to_string(),
                template.ttl(),
                template.algorithm(),
                template.labels(),
                template.original_ttl(),
                template.inception(),
                template.expiration(),
                template.key_tag(),
                template.signers_name().to_string(),
                raw,
            )
        })
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

/// Builds the canonical nine-bundle request cycle.
///
/// Slot one carries the outgoing and the incumbent ZSK, slots two to
/// eight the incumbent alone, slot nine the incumbent and its successor;
/// bundles incept ten days apart and run for twenty-one.
fn request_cycle(
    hsm: &SoftHsm,
    prefix: &str,
    serial: u32,
    start: Timestamp,
    outgoing: &Zsk,
    incumbent: &Zsk,
    successor: &Zsk,
) -> Request {
    let mut bundles = Vec::new();
    for slot in 0..9u8 {
        let inception = start
            .checked_add(Duration::days(10 * i64::from(slot)))
            .unwrap();
        let zsks: Vec<&Zsk> = match slot {
            0 => vec![outgoing, incumbent],
            8 => vec![incumbent, successor],
            _ => vec![incumbent],
        };
        bundles.push(request_bundle(
            hsm,
            &format!("{}-bundle-{}", prefix, slot + 1),
            inception,
            &zsks,
        ));
    }
    Request::new(
        format!("{}-request", prefix),
        serial,
        ".".to_string(),
        None,
        zsk_policy(),
        bundles,
    )
}

/// A configuration accepting the generated ECDSA cycle.
fn test_config(keys: BTreeMap<String, KskKey>) -> Config {
    let mut config = Config::default();
    config.keys = keys;
    config.request_policy.approved_algorithms =
        vec![SecAlg::EcdsaP256Sha256];
    config.request_policy.enable_unsupported_ecdsa = true;
    config
}

/// One HSM holding four generations of ZSKs and both KSKs.
struct Fixture {
    hsm: SoftHsm,
    keys: BTreeMap<String, KskKey>,
    outgoing: Zsk,
    incumbent: Zsk,
    successor: Zsk,
    future: Zsk,
}

fn fixture() -> Fixture {
    let mut hsm = SoftHsm::new();
    let mut keys = BTreeMap::new();
    keys.insert(
        "ksk_current".to_string(),
        configure_ksk(&mut hsm, "label-current"),
    );
    keys.insert(
        "ksk_next".to_string(),
        configure_ksk(&mut hsm, "label-next"),
    );
    let outgoing = generate_zsk(&mut hsm, "zsk-a", "zsk-a");
    let incumbent = generate_zsk(&mut hsm, "zsk-b", "zsk-b");
    let successor = generate_zsk(&mut hsm, "zsk-c", "zsk-c");
    let future = generate_zsk(&mut hsm, "zsk-d", "zsk-d");
    Fixture {
        hsm,
        keys,
        outgoing,
        incumbent,
        successor,
        future,
    }
}

impl Fixture {
    fn request(&self, prefix: &str, serial: u32, start: Timestamp) -> Request {
        request_cycle(
            &self.hsm,
            prefix,
            serial,
            start,
            &self.outgoing,
            &self.incumbent,
            &self.successor,
        )
    }

    /// The key tag `label` publishes under, unrevoked.
    fn ksk_tag(&self, identifier: &str) -> u16 {
        self.keys[identifier].key_tag
    }
}

fn ksk_signatures<'a>(
    bundle: &'a Bundle,
    label: &str,
) -> Vec<&'a Signature> {
    bundle
        .signatures()
        .iter()
        .filter(|sig| sig.key_identifier() == label)
        .collect()
}

//------------ Scenarios -----------------------------------------------------

#[test]
fn normal_cycle_publishes_and_signs_with_current() {
    let fixture = fixture();
    let mut keys = fixture.keys.clone();
    keys.remove("ksk_next");
    let config = test_config(keys);

    let request = fixture.request("c1", 1, NOW);
    let ceremony =
        Ceremony::new(&config, "normal", &fixture.hsm, NOW).unwrap();
    let response = ceremony.run(None, &request).unwrap();

    assert_eq!(response.id(), request.id());
    assert_eq!(response.serial(), request.serial());
    assert_eq!(response.bundles().len(), 9);
    for (bundle, request_bundle) in
        response.bundles().iter().zip(request.bundles())
    {
        // All request keys plus the published KSK.
        assert_eq!(
            bundle.keys().len(),
            request_bundle.keys().len() + 1
        );
        assert!(bundle
            .keys()
            .iter()
            .any(|key| key.key_identifier() == "label-current"
                && key.key_tag() == fixture.ksk_tag("ksk_current")));

        // Exactly one KSK signature, made by ksk_current.
        assert_eq!(bundle.signatures().len(), 1);
        assert_eq!(
            bundle.signatures()[0].key_identifier(),
            "label-current"
        );
        assert_eq!(bundle.inception(), request_bundle.inception());
        assert_eq!(bundle.expiration(), request_bundle.expiration());
    }

    // The emitted document round-trips.
    let xml = xml::write_response(&response);
    assert_eq!(xml::parse_response(&xml).unwrap(), response);
}

#[test]
fn pre_publish_introduces_next_without_signing() {
    let fixture = fixture();
    let config = test_config(fixture.keys.clone());
    let request = fixture.request("c1", 1, NOW);
    let ceremony =
        Ceremony::new(&config, "pre-publish", &fixture.hsm, NOW).unwrap();
    let response = ceremony.run(None, &request).unwrap();

    for (index, bundle) in response.bundles().iter().enumerate() {
        let has_next = bundle
            .keys()
            .iter()
            .any(|key| key.key_identifier() == "label-next");
        assert_eq!(has_next, index > 0, "bundle {}", index + 1);

        assert_eq!(bundle.signatures().len(), 1);
        assert_eq!(
            bundle.signatures()[0].key_identifier(),
            "label-current"
        );
    }
}

#[test]
fn rollover_hands_signing_to_next() {
    let fixture = fixture();
    let config = test_config(fixture.keys.clone());
    let request = fixture.request("c1", 1, NOW);
    let ceremony =
        Ceremony::new(&config, "rollover", &fixture.hsm, NOW).unwrap();
    let response = ceremony.run(None, &request).unwrap();

    for (index, bundle) in response.bundles().iter().enumerate() {
        for label in ["label-current", "label-next"] {
            assert!(bundle
                .keys()
                .iter()
                .any(|key| key.key_identifier() == label));
        }
        let signer = if index == 0 { "label-current" } else { "label-next" };
        assert_eq!(bundle.signatures().len(), 1);
        assert_eq!(bundle.signatures()[0].key_identifier(), signer);
    }
}

#[test]
fn revoke_publishes_flagged_current_signed_by_both() {
    let fixture = fixture();
    let config = test_config(fixture.keys.clone());
    let request = fixture.request("c1", 1, NOW);
    let ceremony =
        Ceremony::new(&config, "revoke", &fixture.hsm, NOW).unwrap();
    let response = ceremony.run(None, &request).unwrap();

    for (index, bundle) in response.bundles().iter().enumerate() {
        let current = bundle
            .keys()
            .iter()
            .find(|key| key.key_identifier() == "label-current");
        match index {
            0 => {
                // Both published plainly, next signs.
                let current = current.unwrap();
                assert!(!current.is_revoked());
                assert_eq!(bundle.signatures().len(), 1);
                assert_eq!(
                    bundle.signatures()[0].key_identifier(),
                    "label-next"
                );
            }
            8 => {
                assert!(current.is_none());
                assert_eq!(bundle.signatures().len(), 1);
                assert_eq!(
                    bundle.signatures()[0].key_identifier(),
                    "label-next"
                );
            }
            _ => {
                // Revoked current changes its tag and keeps signing.
                let current = current.unwrap();
                assert!(current.flags() & FLAG_REVOKE != 0);
                assert_ne!(
                    current.key_tag(),
                    fixture.ksk_tag("ksk_current")
                );
                assert_eq!(bundle.signatures().len(), 2);
                assert!(!ksk_signatures(bundle, "label-current")
                    .is_empty());
                assert!(!ksk_signatures(bundle, "label-next").is_empty());
                // The revoked signature carries the revoked tag.
                assert_eq!(
                    ksk_signatures(bundle, "label-current")[0].key_tag(),
                    current.key_tag()
                );
            }
        }
    }
}

#[test]
fn chain_break_fails_without_any_signing_call() {
    let fixture = fixture();
    let mut keys = fixture.keys.clone();
    keys.remove("ksk_next");
    let config = test_config(keys);

    let request1 = fixture.request("c1", 1, NOW);
    let ceremony =
        Ceremony::new(&config, "normal", &fixture.hsm, NOW).unwrap();
    let response1 = ceremony.run(None, &request1).unwrap();

    // A second cycle whose first bundle carries entirely different ZSK
    // bytes than the previous last bundle.
    let mut other = SoftHsm::new();
    let a = generate_zsk(&mut other, "zsk-x", "zsk-x");
    let b = generate_zsk(&mut other, "zsk-y", "zsk-y");
    let c = generate_zsk(&mut other, "zsk-z", "zsk-z");
    let now2 = NOW.checked_add(Duration::days(90)).unwrap();
    let request2 = request_cycle(&other, "c2", 2, now2, &a, &b, &c);

    let spy = SpyHsm::new(&fixture.hsm);
    let ceremony2 = Ceremony::new(&config, "normal", &spy, now2).unwrap();
    let err = ceremony2.run(Some(&response1), &request2).unwrap_err();
    match err {
        Error::ChainLinkage(violations) => {
            assert!(violations
                .iter()
                .any(|violation| violation.check() == "check_chain_keys"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(spy.sign_calls.get(), 0);
}

#[test]
fn horizon_violation_fails_without_any_signing_call() {
    let fixture = fixture();
    let mut keys = fixture.keys.clone();
    keys.remove("ksk_next");
    let config = test_config(keys);

    // Rebuild the last bundle with a signature expiring 200 days out.
    let request = fixture.request("c1", 1, NOW);
    let mut bundles = request.bundles().to_vec();
    let last = bundles.pop().unwrap();
    let late = NOW.checked_add(Duration::days(200)).unwrap();
    let keys_of_last: Vec<Key> = last.keys().to_vec();
    let signatures: Vec<Signature> = [&fixture.incumbent, &fixture.successor]
        .iter()
        .map(|zsk| {
            let template = Signature::new(
                zsk.key.key_identifier().to_string(),
                172800,
                SecAlg::EcdsaP256Sha256,
                0,
                172800,
                last.inception(),
                late,
                zsk.key.key_tag(),
                ".".to_string(),
                Bytes::new(),
            );
            let message =
                wire::signed_data(&template, &keys_of_last).unwrap();
            let raw = fixture
                .hsm
                .sign(&zsk.private, SecAlg::EcdsaP256Sha256, &message)
                .unwrap();
            Signature::new(
                template.key_identifier().to_string(),
                template.ttl(),
                template.algorithm(),
                template.labels(),
                template.original_ttl(),
                template.inception(),
                template.expiration(),
                template.key_tag(),
                template.signers_name().to_string(),
                raw,
            )
        })
        .collect();
    bundles.push(Bundle::new(
        last.id().to_string(),
        last.inception(),
        last.expiration(),
        keys_of_last,
        signatures,
        Vec::new(),
    ));
    let request = Request::new(
        request.id().to_string(),
        request.serial(),
        request.domain().to_string(),
        None,
        request.zsk_policy().clone(),
        bundles,
    );

    let spy = SpyHsm::new(&fixture.hsm);
    let ceremony = Ceremony::new(&config, "normal", &spy, NOW).unwrap();
    let err = ceremony.run(None, &request).unwrap_err();
    match err {
        Error::Policy(violations) => {
            assert!(violations.iter().any(|violation| {
                violation.check() == "signature_check_expire_horizon"
            }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(spy.sign_calls.get(), 0);
}

#[test]
fn produced_response_survives_file_round_trip() {
    let fixture = fixture();
    let mut keys = fixture.keys.clone();
    keys.remove("ksk_next");
    let config = test_config(keys);

    let request = fixture.request("c1", 1, NOW);
    let dir = tempfile::tempdir().unwrap();
    let ksr_path = dir.path().join("ksr.xml");
    let skr_path = dir.path().join("skr.xml");
    std::fs::write(&ksr_path, xml::write_request(&request)).unwrap();

    let ceremony =
        Ceremony::new(&config, "normal", &fixture.hsm, NOW).unwrap();
    let response =
        ceremony.run_files(None, &ksr_path, &skr_path).unwrap();

    let reread = std::fs::read_to_string(&skr_path).unwrap();
    assert_eq!(xml::parse_response(&reread).unwrap(), response);
}

#[test]
fn chain_continuity_accepts_the_next_cycle() {
    let fixture = fixture();
    let mut keys = fixture.keys.clone();
    keys.remove("ksk_next");
    let config = test_config(keys);

    let request1 = fixture.request("c1", 1, NOW);
    let ceremony =
        Ceremony::new(&config, "normal", &fixture.hsm, NOW).unwrap();
    let response1 = ceremony.run(None, &request1).unwrap();

    // The next cycle starts where the previous one ends: its first
    // bundle carries exactly the ZSKs of the previous last bundle, and
    // every generation advances by one.
    let now2 = NOW.checked_add(Duration::days(90)).unwrap();
    let request2 = request_cycle(
        &fixture.hsm,
        "c2",
        2,
        now2,
        &fixture.incumbent,
        &fixture.successor,
        &fixture.future,
    );
    let ceremony2 =
        Ceremony::new(&config, "normal", &fixture.hsm, now2).unwrap();
    let response2 =
        ceremony2.run(Some(&response1), &request2).unwrap();

    assert_eq!(response2.serial(), 2);
    let carried: Vec<_> = response1
        .last_bundle()
        .unwrap()
        .keys()
        .iter()
        .filter(|key| key.is_zsk())
        .collect();
    let first = &response2.bundles()[0];
    for key in carried {
        assert!(first
            .keys()
            .iter()
            .any(|candidate| candidate.public_key() == key.public_key()));
    }
}
