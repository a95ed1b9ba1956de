//! Signing schemas.
//!
//! A schema decides, per bundle slot, which KSKs are published, which are
//! published with the REVOKE bit set, and which sign the bundle. The named
//! schemas cover the phases of a KSK rollover; the `+` variants repeat the
//! final slot of their base schema across the whole cycle, extending the
//! phase the base schema ends in without advancing the rollover.

use std::collections::BTreeSet;
use std::fmt;

/// The inventory identifier of the incumbent KSK in built-in schemas.
const KSK_CURRENT: &str = "ksk_current";

/// The inventory identifier of the incoming KSK in built-in schemas.
const KSK_NEXT: &str = "ksk_next";

//------------ SchemaAction --------------------------------------------------

/// What happens in one bundle slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchemaAction {
    publish: Vec<String>,
    sign: Vec<String>,
    revoke: Vec<String>,
}

impl SchemaAction {
    pub fn new(
        publish: Vec<String>,
        sign: Vec<String>,
        revoke: Vec<String>,
    ) -> Self {
        SchemaAction {
            publish,
            sign,
            revoke,
        }
    }

    /// Identifiers published with ordinary KSK flags.
    pub fn publish(&self) -> &[String] {
        &self.publish
    }

    /// Identifiers that sign the bundle.
    pub fn sign(&self) -> &[String] {
        &self.sign
    }

    /// Identifiers published with the REVOKE bit set.
    pub fn revoke(&self) -> &[String] {
        &self.revoke
    }
}

//------------ Schema --------------------------------------------------------

/// A named signing schema, one action per bundle slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Schema {
    name: String,
    actions: Vec<SchemaAction>,
}

impl Schema {
    /// Creates a schema after validating its actions.
    pub fn new(
        name: String,
        actions: Vec<SchemaAction>,
    ) -> Result<Self, SchemaError> {
        let res = Schema { name, actions };
        res.validate()?;
        Ok(res)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_slots(&self) -> usize {
        self.actions.len()
    }

    /// Returns the action for a 1-based slot number.
    pub fn action(&self, slot: usize) -> Option<&SchemaAction> {
        if slot == 0 {
            return None;
        }
        self.actions.get(slot - 1)
    }

    /// Every inventory identifier the schema references.
    pub fn referenced_keys(&self) -> BTreeSet<String> {
        let mut res = BTreeSet::new();
        for action in &self.actions {
            res.extend(action.publish.iter().cloned());
            res.extend(action.sign.iter().cloned());
            res.extend(action.revoke.iter().cloned());
        }
        res
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.actions.is_empty() {
            return Err(SchemaError::Empty(self.name.clone()));
        }
        for (index, action) in self.actions.iter().enumerate() {
            let slot = index + 1;
            if action.sign.is_empty() {
                return Err(SchemaError::NoSigner {
                    schema: self.name.clone(),
                    slot,
                });
            }
            for identifier in &action.sign {
                // A revoked key keeps signing the transition; everything
                // else that signs must also be published.
                if !action.publish.contains(identifier)
                    && !action.revoke.contains(identifier)
                {
                    return Err(SchemaError::SignerNotPublished {
                        schema: self.name.clone(),
                        slot,
                        identifier: identifier.clone(),
                    });
                }
            }
            for identifier in &action.revoke {
                if action.publish.contains(identifier) {
                    return Err(SchemaError::PublishedAndRevoked {
                        schema: self.name.clone(),
                        slot,
                        identifier: identifier.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

//------------ Built-in schemas ----------------------------------------------

/// Returns a built-in schema by name, sized to `slots` bundle slots.
///
/// The names are `normal`, `pre-publish`, `rollover` and `revoke`, plus
/// the `+` variant of each.
pub fn builtin(name: &str, slots: usize) -> Result<Schema, SchemaError> {
    if slots == 0 {
        return Err(SchemaError::Empty(name.to_string()));
    }
    if let Some(base) = name.strip_suffix('+') {
        let base = builtin(base, slots)?;
        let last = base.actions[base.actions.len() - 1].clone();
        return Schema::new(name.to_string(), vec![last; slots]);
    }

    let current = || KSK_CURRENT.to_string();
    let next = || KSK_NEXT.to_string();
    let actions: Vec<SchemaAction> = match name {
        "normal" => (1..=slots)
            .map(|_| {
                SchemaAction::new(vec![current()], vec![current()], vec![])
            })
            .collect(),
        "pre-publish" => (1..=slots)
            .map(|slot| {
                if slot == 1 {
                    SchemaAction::new(
                        vec![current()],
                        vec![current()],
                        vec![],
                    )
                } else {
                    SchemaAction::new(
                        vec![current(), next()],
                        vec![current()],
                        vec![],
                    )
                }
            })
            .collect(),
        "rollover" => (1..=slots)
            .map(|slot| {
                let sign = if slot == 1 { current() } else { next() };
                SchemaAction::new(
                    vec![current(), next()],
                    vec![sign],
                    vec![],
                )
            })
            .collect(),
        "revoke" => (1..=slots)
            .map(|slot| {
                if slot == 1 {
                    SchemaAction::new(
                        vec![current(), next()],
                        vec![next()],
                        vec![],
                    )
                } else if slot == slots {
                    SchemaAction::new(vec![next()], vec![next()], vec![])
                } else {
                    SchemaAction::new(
                        vec![next()],
                        vec![current(), next()],
                        vec![current()],
                    )
                }
            })
            .collect(),
        _ => return Err(SchemaError::UnknownSchema(name.to_string())),
    };
    Schema::new(name.to_string(), actions)
}

/// The names of every built-in schema.
pub const BUILTIN_NAMES: &[&str] = &[
    "normal",
    "normal+",
    "pre-publish",
    "pre-publish+",
    "rollover",
    "rollover+",
    "revoke",
    "revoke+",
];

//============ Error Types ===================================================

//------------ SchemaError ---------------------------------------------------

/// A schema is unusable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SchemaError {
    /// No schema is known under this name.
    UnknownSchema(String),

    /// The schema has no slots.
    Empty(String),

    /// A slot has an empty sign set.
    NoSigner { schema: String, slot: usize },

    /// A slot signs with a key it neither publishes nor revokes.
    SignerNotPublished {
        schema: String,
        slot: usize,
        identifier: String,
    },

    /// A slot both publishes and revokes the same key.
    PublishedAndRevoked {
        schema: String,
        slot: usize,
        identifier: String,
    },

    /// The schema's slot count does not match the bundle count.
    WrongSlotCount {
        schema: String,
        expected: usize,
        actual: usize,
    },
}

//--- Display and Error

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchemaError::UnknownSchema(name) => {
                write!(f, "unknown schema '{}'", name)
            }
            SchemaError::Empty(name) => {
                write!(f, "schema '{}' has no slots", name)
            }
            SchemaError::NoSigner { schema, slot } => {
                write!(f, "schema '{}' slot {} has no signer", schema, slot)
            }
            SchemaError::SignerNotPublished {
                schema,
                slot,
                identifier,
            } => {
                write!(
                    f,
                    "schema '{}' slot {} signs with '{}' without \
                     publishing it",
                    schema, slot, identifier
                )
            }
            SchemaError::PublishedAndRevoked {
                schema,
                slot,
                identifier,
            } => {
                write!(
                    f,
                    "schema '{}' slot {} both publishes and revokes '{}'",
                    schema, slot, identifier
                )
            }
            SchemaError::WrongSlotCount {
                schema,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "schema '{}' has {} slots, the cycle has {} bundles",
                    schema, actual, expected
                )
            }
        }
    }
}

impl std::error::Error for SchemaError {}

//============ Test ==========================================================
