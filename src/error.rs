//! The ceremony error taxonomy.
//!
//! Policy violations are collected and surfaced together; everything else
//! fails fast. Every kind maps onto the exit code contract of the CLI
//! wrapper: 1 policy violation, 2 malformed input, 3 HSM or signing
//! failure, 4 configuration or inventory mismatch.

use crate::config::ConfigError;
use crate::hsm::HsmError;
use crate::inventory::InventoryError;
use crate::policy::PolicyViolation;
use crate::schema::SchemaError;
use crate::xml::XmlError;
use std::fmt;
use std::io;

//------------ Error ---------------------------------------------------------

/// Any way a ceremony can fail.
#[derive(Debug)]
pub enum Error {
    /// The configuration is unusable.
    Config(ConfigError),

    /// An input document failed to parse.
    Xml(XmlError),

    /// Reading an input or writing the output failed.
    Io(io::Error),

    /// The request (or a produced response) violates policy.
    Policy(Vec<PolicyViolation>),

    /// The request does not chain to the previous response.
    ChainLinkage(Vec<PolicyViolation>),

    /// The schema is unusable for this request.
    Schema(SchemaError),

    /// The configured inventory and the HSM disagree.
    Inventory(InventoryError),

    /// Talking to the HSM failed outside of signing.
    Hsm(HsmError),

    /// Signing failed mid-ceremony; the partial response was discarded.
    Signing { bundle_id: String, err: HsmError },
}

impl Error {
    /// The process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Policy(_) | Error::ChainLinkage(_) => 1,
            Error::Xml(_) | Error::Io(_) => 2,
            Error::Hsm(_) | Error::Signing { .. } => 3,
            Error::Config(_) | Error::Schema(_) | Error::Inventory(_) => 4,
        }
    }
}

//--- From

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<XmlError> for Error {
    fn from(err: XmlError) -> Self {
        Error::Xml(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<InventoryError> for Error {
    fn from(err: InventoryError) -> Self {
        Error::Inventory(err)
    }
}

impl From<HsmError> for Error {
    fn from(err: HsmError) -> Self {
        Error::Hsm(err)
    }
}

//--- Display and Error

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Config(err) => write!(f, "configuration error: {}", err),
            Error::Xml(err) => err.fmt(f),
            Error::Io(err) => err.fmt(f),
            Error::Policy(violations) => {
                write!(f, "{} policy violation(s)", violations.len())?;
                for violation in violations {
                    write!(f, "\n  {}", violation)?;
                }
                Ok(())
            }
            Error::ChainLinkage(violations) => {
                write!(
                    f,
                    "chain linkage failed, {} violation(s)",
                    violations.len()
                )?;
                for violation in violations {
                    write!(f, "\n  {}", violation)?;
                }
                Ok(())
            }
            Error::Schema(err) => err.fmt(f),
            Error::Inventory(err) => {
                write!(f, "inventory mismatch: {}", err)
            }
            Error::Hsm(err) => err.fmt(f),
            Error::Signing { bundle_id, err } => {
                write!(f, "signing failed in bundle {}: {}", bundle_id, err)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(err) => Some(err),
            Error::Xml(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Schema(err) => Some(err),
            Error::Inventory(err) => Some(err),
            Error::Hsm(err) => Some(err),
            Error::Signing { err, .. } => Some(err),
            Error::Policy(_) | Error::ChainLinkage(_) => None,
        }
    }
}

//============ Test ==========================================================
