//! The ceremony orchestrator.
//!
//! One ceremony turns a request into a response: load and verify the
//! previous response, load the request, run every enabled policy check,
//! reconcile the KSK inventory with the HSM, build one response bundle
//! per request bundle according to the schema, and emit the result. The
//! policy gate sits strictly before the first signing call, signing is
//! all or nothing, and the produced response passes through the same
//! validation machinery an inbound one would.
//!
//! The HSM session lives exactly as long as the `Hsm` value handed in;
//! dropping it, on success and on every error path alike, releases the
//! private key handles.

use crate::base::time::Timestamp;
use crate::base::wire;
use crate::base::{
    AlgorithmPolicy, Bundle, Key, Request, Response, Signature,
};
use crate::config::{Config, KskPolicy};
use crate::error::Error;
use crate::hsm::Hsm;
use crate::inventory::{self, Inventory, KskKey};
use crate::policy::{
    validate_chain, validate_request, validate_response, RequestPolicy,
    ResponsePolicy, Violations,
};
use crate::schema::{Schema, SchemaError};
use crate::xml;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

//------------ Ceremony ------------------------------------------------------

/// A configured ceremony, ready to process requests.
pub struct Ceremony<'a, H> {
    request_policy: RequestPolicy,
    response_policy: ResponsePolicy,
    ksk_policy: KskPolicy,
    keys: &'a BTreeMap<String, KskKey>,
    schema: Schema,
    hsm: &'a H,
    now: Timestamp,
}

impl<'a, H: Hsm> Ceremony<'a, H> {
    /// Prepares a ceremony from the configuration.
    ///
    /// The schema is resolved and validated here; "now" is a parameter so
    /// that horizon and chain checks are reproducible.
    pub fn new(
        config: &'a Config,
        schema_name: &str,
        hsm: &'a H,
        now: Timestamp,
    ) -> Result<Self, Error> {
        let schema = config.schema(schema_name)?;
        Ok(Ceremony {
            request_policy: config.request_policy(),
            response_policy: config.response_policy.clone(),
            ksk_policy: config.ksk_policy.clone(),
            keys: &config.keys,
            schema,
            hsm,
            now,
        })
    }

    /// Runs the ceremony over parsed documents.
    pub fn run(
        &self,
        previous: Option<&Response>,
        request: &Request,
    ) -> Result<Response, Error> {
        // Step 1: the previous response must itself hold up.
        if let Some(previous) = previous {
            info!("validating previous response {}", previous.id());
            fail_on_violations(validate_response(
                previous,
                &self.response_policy,
            ))?;
        } else {
            info!("no previous response: chain checks skipped (bootstrap)");
        }

        // Step 2: the full request-policy gate, chain linkage included.
        info!("validating request {}", request.id());
        let violations =
            validate_request(request, &self.request_policy, self.now);
        if let Some(previous) = previous {
            let chain =
                validate_chain(request, previous, &self.request_policy);
            if !chain.is_empty() {
                // A broken chain is its own failure mode; the remaining
                // violations ride along for the report.
                let mut all = chain;
                all.append(violations);
                return Err(Error::ChainLinkage(all.into_vec()));
            }
        }
        if !violations.is_empty() {
            return Err(Error::Policy(violations.into_vec()));
        }

        // Step 3: reconcile the inventory against the HSM.
        if self.schema.num_slots() != request.bundles().len() {
            return Err(SchemaError::WrongSlotCount {
                schema: self.schema.name().to_string(),
                expected: request.bundles().len(),
                actual: self.schema.num_slots(),
            }
            .into());
        }
        let inventory = inventory::reconcile(
            self.keys,
            &self.schema.referenced_keys(),
            self.hsm,
            self.now,
            &self.ksk_policy.signers_name,
        )?;

        // Step 4: build and sign the response bundles.
        let mut bundles = Vec::with_capacity(request.bundles().len());
        for (index, bundle) in request.bundles().iter().enumerate() {
            bundles.push(self.sign_bundle(bundle, index + 1, &inventory)?);
        }

        let response = Response::new(
            request.id().to_string(),
            request.serial(),
            request.domain().to_string(),
            Some(self.now),
            self.ksk_policy
                .signature_policy(self.algorithm_policies(&inventory)),
            request.zsk_policy().clone(),
            bundles,
        );

        // Step 5: the produced response goes through the same gate an
        // inbound one would.
        fail_on_violations(validate_response(
            &response,
            &self.response_policy,
        ))?;

        info!(
            "produced response {} with {} bundles",
            response.id(),
            response.bundles().len()
        );
        Ok(response)
    }

    /// Runs the ceremony over files, writing the response atomically.
    pub fn run_files(
        &self,
        previous_path: Option<&Path>,
        request_path: &Path,
        response_path: &Path,
    ) -> Result<Response, Error> {
        let previous = match previous_path {
            Some(path) => {
                Some(xml::parse_response(&fs::read_to_string(path)?)?)
            }
            None => None,
        };
        let request = xml::parse_request(&fs::read_to_string(request_path)?)?;

        let response = self.run(previous.as_ref(), &request)?;

        write_atomic(response_path, &xml::write_response(&response))?;
        info!("wrote response to {}", response_path.display());
        Ok(response)
    }

    /// Builds one response bundle.
    fn sign_bundle(
        &self,
        bundle: &Bundle,
        slot: usize,
        inventory: &Inventory,
    ) -> Result<Bundle, Error> {
        let action = self.schema.action(slot).ok_or_else(|| {
            SchemaError::WrongSlotCount {
                schema: self.schema.name().to_string(),
                expected: slot,
                actual: self.schema.num_slots(),
            }
        })?;

        let ttl = self.request_policy.dns_ttl;
        let mut keys: Vec<Key> = bundle.keys().to_vec();
        for identifier in action.publish() {
            let ksk = lookup(inventory, identifier)?;
            keys.push(ksk.make_key(
                ksk.config().label.clone(),
                ttl,
                false,
            ));
        }
        for identifier in action.revoke() {
            let ksk = lookup(inventory, identifier)?;
            keys.push(ksk.make_key(ksk.config().label.clone(), ttl, true));
        }
        keys.sort_by(wire::canonical_key_cmp);

        let mut signatures = Vec::with_capacity(action.sign().len());
        for identifier in action.sign() {
            let ksk = lookup(inventory, identifier)?;
            let key_identifier = ksk.config().label.clone();
            // Schema validation guarantees a signer is published or
            // revoked in its own slot.
            let published = keys
                .iter()
                .find(|key| key.key_identifier() == key_identifier)
                .ok_or_else(|| SchemaError::SignerNotPublished {
                    schema: self.schema.name().to_string(),
                    slot,
                    identifier: identifier.clone(),
                })?;

            let template = Signature::new(
                key_identifier,
                ttl,
                ksk.algorithm(),
                wire::label_count(&self.ksk_policy.signers_name),
                ttl,
                bundle.inception(),
                bundle.expiration(),
                published.key_tag(),
                self.ksk_policy.signers_name.clone(),
                bytes::Bytes::new(),
            );
            let message =
                wire::signed_data(&template, &keys).map_err(|_| {
                    Error::Signing {
                        bundle_id: bundle.id().to_string(),
                        err: crate::hsm::HsmError::SigningFailed,
                    }
                })?;
            let raw = self
                .hsm
                .sign(ksk.private_handle(), ksk.algorithm(), &message)
                .map_err(|err| Error::Signing {
                    bundle_id: bundle.id().to_string(),
                    err,
                })?;
            info!(
                "bundle {}: signed DNSKEY RRset with {} (tag {})",
                bundle.id(),
                ksk.identifier(),
                published.key_tag()
            );

            signatures.push(Signature::new(
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
            ));
        }
        signatures.sort_by_key(|sig| (sig.key_tag(), sig.algorithm()));

        Ok(Bundle::new(
            bundle.id().to_string(),
            bundle.inception(),
            bundle.expiration(),
            keys,
            signatures,
            Vec::new(),
        ))
    }

    /// The algorithm entries for the KSK half of the response policy.
    ///
    /// Derived from the keys the schema actually uses, one entry per
    /// distinct parameter set.
    fn algorithm_policies(
        &self,
        inventory: &Inventory,
    ) -> Vec<AlgorithmPolicy> {
        let mut res: Vec<AlgorithmPolicy> = Vec::new();
        for identifier in self.schema.referenced_keys() {
            let Some(ksk) = inventory.get(&identifier) else { continue };
            let entry = if ksk.algorithm().is_rsa() {
                match wire::RsaPublicKey::decode(ksk.dnskey()) {
                    Ok(pubkey) => AlgorithmPolicy::Rsa {
                        algorithm: ksk.algorithm(),
                        bits: pubkey.bits(),
                        exponent: pubkey.exponent(),
                    },
                    Err(_) => continue,
                }
            } else {
                AlgorithmPolicy::Ecdsa {
                    algorithm: ksk.algorithm(),
                    bits: wire::ecdsa_point_bits(ksk.dnskey()),
                }
            };
            if !res.contains(&entry) {
                res.push(entry);
            }
        }
        res
    }
}

//------------ Helpers -------------------------------------------------------

/// Turns a non-empty violation set into a policy error.
fn fail_on_violations(violations: Violations) -> Result<(), Error> {
    if violations.is_empty() {
        return Ok(());
    }
    Err(Error::Policy(violations.into_vec()))
}

/// Looks up a reconciled key the schema references.
fn lookup<'i>(
    inventory: &'i Inventory,
    identifier: &str,
) -> Result<&'i crate::inventory::InventoryKey, Error> {
    inventory.get(identifier).ok_or_else(|| {
        crate::inventory::InventoryError::UnknownKey(identifier.to_string())
            .into()
    })
}

/// Writes a file atomically: temp file in the same directory, fsync,
/// rename.
fn write_atomic(path: &Path, content: &str) -> Result<(), Error> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| Error::Io(err.error))?;
    Ok(())
}
