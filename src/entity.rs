//! Entity identity and profile (dossier) types.
//!
//! An `EntityProfile` is an immutable snapshot of what is known about an
//! organization's needs. It is created once per discovery run, or supplied
//! by a `ProfileSupplier`, and never mutated afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Identifier of the organization being evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity id. Surrounding whitespace is trimmed.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    /// Creates an entity id, rejecting empty values.
    ///
    /// # Errors
    ///
    /// Returns `InputError::EmptyEntityId` if the trimmed id is empty.
    pub fn parse(id: impl Into<String>) -> Result<Self, InputError> {
        let id = Self::new(id);
        if id.0.is_empty() {
            return Err(InputError::EmptyEntityId);
        }
        Ok(id)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Kind of need section found in a dossier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedKind {
    TechnologyGap,
    HiringSignal,
    StrategicInitiative,
}

impl fmt::Display for NeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TechnologyGap => write!(f, "technology_gap"),
            Self::HiringSignal => write!(f, "hiring_signal"),
            Self::StrategicInitiative => write!(f, "strategic_initiative"),
        }
    }
}

/// How strongly the source of a need section can be trusted.
///
/// Official sources (annual reports, the entity's own site) outrank
/// inferred ones (analyst commentary, third-party coverage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStrength {
    Official,
    #[default]
    Inferred,
}

impl SourceStrength {
    /// Additive prior bonus for hypotheses derived from this source.
    #[must_use]
    pub const fn prior_bonus(self) -> f64 {
        match self {
            Self::Official => 0.15,
            Self::Inferred => 0.05,
        }
    }
}

/// One structured need section of a dossier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedSection {
    pub kind: NeedKind,

    /// Supporting text the need statement is extracted from.
    pub text: String,

    /// Where the text came from (e.g. "annual report 2025").
    pub source_label: String,

    #[serde(default)]
    pub strength: SourceStrength,
}

impl NeedSection {
    /// Creates a need section.
    #[must_use]
    pub fn new(
        kind: NeedKind,
        text: impl Into<String>,
        source_label: impl Into<String>,
        strength: SourceStrength,
    ) -> Self {
        Self {
            kind,
            text: text.into(),
            source_label: source_label.into(),
            strength,
        }
    }
}

/// Structured summary of an entity's needs and context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub entity_id: EntityId,
    pub name: String,

    /// Industry vertical, normalized to lowercase snake case.
    pub vertical: String,

    #[serde(default)]
    pub needs: Vec<NeedSection>,
}

impl EntityProfile {
    /// Creates a profile with no need sections.
    #[must_use]
    pub fn new(entity_id: EntityId, name: impl Into<String>, vertical: impl AsRef<str>) -> Self {
        Self {
            entity_id,
            name: name.into(),
            vertical: normalize_vertical(vertical.as_ref()),
            needs: Vec::new(),
        }
    }

    /// Adds a need section.
    #[must_use]
    pub fn with_need(mut self, need: NeedSection) -> Self {
        self.needs.push(need);
        self
    }

    /// Returns true if the profile carries no need sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.needs.is_empty()
    }
}

/// Normalizes a vertical name: lowercase, whitespace and dashes to `_`.
#[must_use]
pub fn normalize_vertical(vertical: &str) -> String {
    vertical
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .collect()
}
