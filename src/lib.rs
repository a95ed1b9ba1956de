//! Signing DNSSEC root zone key signing requests.
//!
//! Periodically the ZSK operator submits a Key Signing Request: a sequence
//! of time-adjacent bundles, each carrying a DNSKEY RRset and proof of
//! possession of the ZSK private keys. This crate verifies such a request
//! against the KSK operator's policy and the previously issued response,
//! signs the DNSKEY RRsets with KSKs held in an HSM, and emits the Signed
//! Key Response the world's validators will chain to for the following
//! months.
//!
//! The pipeline is deliberately boring: XML in, canonical model, policy
//! gate, schema-driven signing, canonical model, XML out. Everything is
//! synchronous and deterministic; "now" is an input, never the system
//! clock.
//!
//! The crate is organized along that pipeline:
//!
//! * [`base`]: the document model, canonical DNSSEC serialization,
//!   timestamps and durations;
//! * [`xml`]: the interchange format;
//! * [`hsm`]: the signer capability and the software implementation;
//! * [`validate`]: signature verification;
//! * [`inventory`]: configured KSKs, reconciled against the HSM;
//! * [`policy`]: the named checks over requests, responses and chains;
//! * [`schema`]: which keys publish, sign and revoke per bundle slot;
//! * [`ceremony`]: the orchestrator tying it all together;
//! * [`config`]: the typed configuration surface.

pub mod base;
pub mod ceremony;
pub mod config;
pub mod error;
pub mod hsm;
pub mod inventory;
pub mod policy;
pub mod schema;
pub mod utils;
pub mod validate;
pub mod xml;

pub use self::ceremony::Ceremony;
pub use self::config::Config;
pub use self::error::Error;
