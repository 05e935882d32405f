//! Stable identifiers.
//!
//! Identifiers are derived from content rather than drawn at random so that a
//! run repeated against identical collaborator responses reproduces the same
//! ids, and therefore the same report.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derives a v5 UUID from the blake3 digest of the given parts.
///
/// Parts are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
#[must_use]
pub fn stable_uuid(namespace: &str, parts: &[&str]) -> Uuid {
    let mut hasher = blake3::Hasher::new();
    hasher.update(namespace.as_bytes());
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    Uuid::new_v5(&Uuid::NAMESPACE_OID, hasher.finalize().as_bytes())
}

/// Unique identifier for a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HypothesisId(Uuid);

impl HypothesisId {
    /// Derives the id of a hypothesis from its entity and category.
    #[must_use]
    pub fn derive(entity_id: &str, category: &str) -> Self {
        Self(stable_uuid("hypothesis", &[entity_id, category]))
    }
}

impl fmt::Display for HypothesisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceId(Uuid);

impl EvidenceId {
    /// Derives the id of an evidence item from its source and content.
    #[must_use]
    pub fn derive(source: &str, content: &str) -> Self {
        Self(stable_uuid("evidence", &[source, content]))
    }
}

impl fmt::Display for EvidenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a decided signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(Uuid);

impl SignalId {
    /// Derives the id of a signal from its hypothesis, pass and lead evidence.
    #[must_use]
    pub fn derive(hypothesis: HypothesisId, pass: u32, discriminator: &str) -> Self {
        Self(stable_uuid(
            "signal",
            &[&hypothesis.to_string(), &pass.to_string(), discriminator],
        ))
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
