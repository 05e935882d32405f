//! Service traits the discovery core calls through.
//!
//! Every call may fail with a `CollaboratorError`. Retrieval failures are
//! retried by the collector; validation failures degrade the affected signal
//! to a rule-only decision.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::entity::{EntityId, EntityProfile};
use crate::error::CollaboratorError;
use crate::evidence::{ChannelType, Evidence};
use crate::hypothesis::Hypothesis;
use crate::signal::Decision;

/// Supplies entity dossiers.
pub trait ProfileSupplier: Send + Sync {
    /// Returns the profile for an entity, or `None` if none is available.
    fn fetch_profile(
        &self,
        entity_id: &EntityId,
    ) -> Result<Option<EntityProfile>, CollaboratorError>;
}

/// One evidence collection request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub entity_id: EntityId,
    pub pass: u32,
    pub channel: ChannelType,

    /// Categories the request covers: one, or two for a cross-category
    /// combination.
    pub categories: Vec<Category>,

    /// Statements of the covered hypotheses, joined for combinations.
    pub statement: String,

    /// Union of the covered hypotheses' keywords.
    pub keywords: Vec<String>,

    /// Search depth the retriever should use.
    pub depth: u32,

    /// Maximum number of evidence items that will be kept.
    pub max_results: usize,
}

impl RetrievalRequest {
    /// Returns true if the request covers more than one category.
    #[must_use]
    pub fn is_combination(&self) -> bool {
        self.categories.len() > 1
    }

    /// Label used in logs and notes, e.g. `crm+ticketing`.
    #[must_use]
    pub fn label(&self) -> String {
        self.categories
            .iter()
            .map(Category::as_str)
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Fetches raw evidence candidates.
pub trait ContentRetriever: Send + Sync {
    /// Returns evidence candidates for a request. May fail transiently.
    fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Evidence>, CollaboratorError>;
}

/// Decisions a reasoning service may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictDecision {
    Accept,
    WeakAccept,
    Reject,
}

impl From<VerdictDecision> for Decision {
    fn from(value: VerdictDecision) -> Self {
        match value {
            VerdictDecision::Accept => Self::Accept,
            VerdictDecision::WeakAccept => Self::WeakAccept,
            VerdictDecision::Reject => Self::Reject,
        }
    }
}

impl fmt::Display for VerdictDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Decision::from(*self).fmt(f)
    }
}

/// Judgment returned by a reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: VerdictDecision,
    pub rationale: String,

    /// Optional service confidence in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Verdict {
    #[must_use]
    pub fn new(decision: VerdictDecision, rationale: impl Into<String>) -> Self {
        Self {
            decision,
            rationale: rationale.into(),
            confidence: None,
        }
    }

    #[must_use]
    pub fn accept(rationale: impl Into<String>) -> Self {
        Self::new(VerdictDecision::Accept, rationale)
    }

    #[must_use]
    pub fn weak_accept(rationale: impl Into<String>) -> Self {
        Self::new(VerdictDecision::WeakAccept, rationale)
    }

    #[must_use]
    pub fn reject(rationale: impl Into<String>) -> Self {
        Self::new(VerdictDecision::Reject, rationale)
    }

    /// Attaches a service confidence, clamped to [0, 1].
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        });
        self
    }
}

/// Semantic judgment of hypothesis and evidence pairs.
pub trait ReasoningValidator: Send + Sync {
    /// Judges whether `evidence` supports `hypothesis`.
    fn validate(
        &self,
        hypothesis: &Hypothesis,
        evidence: &Evidence,
    ) -> Result<Verdict, CollaboratorError>;
}
